//! Error types and handling for the RWX API server.
//!
//! This module defines a unified error type that can represent errors from
//! all domains and the security layer, plus the [`ErrorKind`] taxonomy the
//! transport maps onto status codes.

use serde::Serialize;
use thiserror::Error;

use super::security::{AuthError, PathError, RateLimitError};
use crate::domains::{exec::ExecError, files::FileError};

/// A specialized Result type for RWX server operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the RWX server.
#[derive(Debug, Error)]
pub enum Error {
    /// Credential check failed.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Client exceeded its request budget.
    #[error(transparent)]
    RateLimit(#[from] RateLimitError),

    /// Path could not be resolved inside the workspace.
    #[error(transparent)]
    Path(#[from] PathError),

    /// Error originating from the files domain.
    #[error(transparent)]
    File(#[from] FileError),

    /// Error originating from the exec domain.
    #[error(transparent)]
    Exec(#[from] ExecError),

    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Classification of every failure the service can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Unauthorized,
    Forbidden,
    InvalidPath,
    InvalidRequest,
    NotFound,
    Conflict,
    TooManyRequests,
    CommandNotAllowed,
    CommandFailed,
    Timeout,
    ExecutionError,
    InternalError,
}

impl Error {
    /// Create a new configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Auth(_) => ErrorKind::Unauthorized,
            Self::RateLimit(_) => ErrorKind::TooManyRequests,
            Self::Path(e) | Self::File(FileError::Path(e)) => path_kind(e),
            Self::File(e) => match e {
                FileError::NotFound(_) => ErrorKind::NotFound,
                FileError::Conflict(_) => ErrorKind::Conflict,
                FileError::WorkspaceRoot => ErrorKind::Forbidden,
                FileError::Io { .. } | FileError::Path(_) => ErrorKind::InternalError,
            },
            Self::Exec(e) => match e {
                ExecError::EmptyCommand => ErrorKind::InvalidRequest,
                ExecError::NotAllowed(_) => ErrorKind::CommandNotAllowed,
                ExecError::Failed { .. } => ErrorKind::CommandFailed,
                ExecError::Timeout { .. } => ErrorKind::Timeout,
                ExecError::Spawn { .. } | ExecError::Internal(_) => ErrorKind::ExecutionError,
            },
            Self::Config(_) => ErrorKind::InternalError,
        }
    }
}

fn path_kind(e: &PathError) -> ErrorKind {
    match e {
        PathError::InvalidPath { .. } => ErrorKind::InvalidPath,
        PathError::Forbidden { .. } => ErrorKind::Forbidden,
        PathError::InvalidRoot { .. } => ErrorKind::InternalError,
    }
}
