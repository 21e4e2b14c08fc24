//! Command execution error types.

use std::time::Duration;
use thiserror::Error;

use super::executor::ExecutionResult;

/// Errors that can occur while vetting or running a command.
#[derive(Debug, Error)]
pub enum ExecError {
    /// The request carried no command at all.
    #[error("Command cannot be empty")]
    EmptyCommand,

    /// The whitelist rejected the command.
    #[error("Command not allowed: {0}")]
    NotAllowed(String),

    /// The command ran and exited unsuccessfully.
    #[error("Command failed ({})", .result.exit_description())]
    Failed { result: ExecutionResult },

    /// The command exceeded its wall-clock budget and was killed.
    #[error("Command timed out after {}s", .timeout.as_secs())]
    Timeout {
        timeout: Duration,
        result: ExecutionResult,
    },

    /// The process could not be started.
    #[error("Failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The process was started but could not be supervised.
    #[error("Execution error: {0}")]
    Internal(String),
}

impl ExecError {
    /// Create a new "not allowed" error.
    pub fn not_allowed(command: impl Into<String>) -> Self {
        Self::NotAllowed(command.into())
    }

    /// Create a new internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Output captured before the failure, if the process ran at all.
    pub fn captured(&self) -> Option<&ExecutionResult> {
        match self {
            Self::Failed { result } | Self::Timeout { result, .. } => Some(result),
            _ => None,
        }
    }
}
