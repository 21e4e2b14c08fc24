//! Shared-secret request authentication.
//!
//! Every API request carries the secret in the [`API_KEY_HEADER`] header.
//! The presented value is compared in constant time so response timing does
//! not reveal how much of a guess was correct.

use subtle::ConstantTimeEq;

/// Header carrying the API secret.
pub const API_KEY_HEADER: &str = "action-api-key";

/// Authentication failures. Both map to `401 Unauthorized`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Missing API key")]
    Missing,

    #[error("Invalid API key")]
    Invalid,
}

/// Validates presented credentials against the configured secret.
#[derive(Clone)]
pub struct TokenAuthenticator {
    secret: String,
}

impl std::fmt::Debug for TokenAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenAuthenticator")
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl TokenAuthenticator {
    /// Create an authenticator for the given secret.
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Check a presented token.
    ///
    /// A missing or empty token is always rejected, even if the configured
    /// secret were empty.
    pub fn verify(&self, presented: Option<&str>) -> Result<(), AuthError> {
        let presented = match presented {
            Some(token) if !token.is_empty() => token,
            _ => return Err(AuthError::Missing),
        };

        if self.secret.is_empty() {
            return Err(AuthError::Invalid);
        }

        if bool::from(presented.as_bytes().ct_eq(self.secret.as_bytes())) {
            Ok(())
        } else {
            Err(AuthError::Invalid)
        }
    }
}
