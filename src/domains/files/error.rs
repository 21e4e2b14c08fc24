//! File operation error types.

use thiserror::Error;

use crate::core::security::PathError;

/// Errors that can occur during file and directory operations.
#[derive(Debug, Error)]
pub enum FileError {
    /// The caller-supplied path was rejected by the path guard.
    #[error(transparent)]
    Path(#[from] PathError),

    /// The target does not exist (or is not of the expected kind).
    #[error("{0}")]
    NotFound(String),

    /// The target already exists.
    #[error("{0}")]
    Conflict(String),

    /// The operation would remove or replace the workspace root itself.
    #[error("Operation not permitted on the workspace root")]
    WorkspaceRoot,

    /// The underlying filesystem call failed.
    #[error("Failed to {action}: {source}")]
    Io {
        action: String,
        #[source]
        source: std::io::Error,
    },
}

impl FileError {
    /// Create a new "not found" error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a new "conflict" error.
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Wrap an I/O error with the action that failed.
    pub fn io(action: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            action: action.into(),
            source,
        }
    }
}
