// Security module for the request gatekeeper
//
// This module holds the checks every request passes before it is allowed
// to touch the workspace: credential verification, per-client throttling,
// and confinement of caller-supplied paths to the workspace root.

pub mod path_guard;
pub mod rate_limit;
pub mod token;

pub use path_guard::{PathError, PathGuard};
pub use rate_limit::{Admission, RateLimitError, RateLimiter, RateStore, ShardedMemoryStore};
pub use token::{API_KEY_HEADER, AuthError, TokenAuthenticator};
