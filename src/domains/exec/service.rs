//! Execution service - vets and runs caller commands.

use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

use super::error::ExecError;
use super::executor::{ExecutionResult, ExecutionStatus, ProcessExecutor};
use super::whitelist::{CommandWhitelist, tokenize};

/// Service that turns a raw command string into an execution result.
///
/// The whitelist decides first; only approved commands reach the executor,
/// and they do so as an argv built by the same tokenizer the whitelist used.
#[derive(Debug, Clone)]
pub struct ExecService {
    whitelist: Arc<CommandWhitelist>,
    executor: ProcessExecutor,
    timeout: Duration,
}

impl ExecService {
    /// Create a new execution service.
    pub fn new(whitelist: Arc<CommandWhitelist>, executor: ProcessExecutor, timeout: Duration) -> Self {
        Self {
            whitelist,
            executor,
            timeout,
        }
    }

    /// Get the whitelist (for explicit reloads).
    pub fn whitelist(&self) -> &Arc<CommandWhitelist> {
        &self.whitelist
    }

    /// Run `command` if the whitelist allows it.
    ///
    /// Successful runs return the result; non-zero exits, timeouts and spawn
    /// failures come back as the matching [`ExecError`] with whatever output
    /// was captured.
    #[instrument(skip(self))]
    pub async fn run(&self, command: &str) -> Result<ExecutionResult, ExecError> {
        let command = command.trim();
        if command.is_empty() {
            return Err(ExecError::EmptyCommand);
        }

        let decision = self.whitelist.evaluate(command);
        if !decision.is_allowed() {
            warn!("Unauthorized command attempt: {}", command);
            return Err(ExecError::not_allowed(command));
        }

        // The whitelist already proved the command tokenizes
        let tokens = tokenize(command).map_err(|_| ExecError::not_allowed(command))?;

        info!("Executing command ({:?} match): {}", decision, command);
        let result = self.executor.execute(&tokens, self.timeout).await.inspect_err(|e| {
            error!("OS error executing command: {} | {}", command, e);
        })?;

        match result.status() {
            ExecutionStatus::Success => Ok(result),
            ExecutionStatus::Timeout => {
                error!("Command timed out: {}", command);
                Err(ExecError::Timeout {
                    timeout: self.timeout,
                    result,
                })
            }
            ExecutionStatus::CommandFailed => {
                error!(
                    "Command failed: {} | {} | {}",
                    command,
                    result.exit_description(),
                    result.stderr.trim()
                );
                Err(ExecError::Failed { result })
            }
        }
    }
}
