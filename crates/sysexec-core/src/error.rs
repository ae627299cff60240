use thiserror::Error;

/// Failures surfaced by command execution.
///
/// A non-zero exit code is not an error: it is returned from
/// [`execute`](crate::ProcessController::execute) as a regular value.
#[derive(Error, Debug)]
pub enum ExecError {
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Could not execute command: {command}")]
    Launch {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command is already running: {0}")]
    AlreadyRunning(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl ExecError {
    /// Check if retrying the same call may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExecError::AlreadyRunning(_))
    }

    /// Check if this error indicates a permanent failure
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            ExecError::InvalidCommand(_) | ExecError::Configuration(_)
        )
    }
}
