//! Runner errors.
//!
//! Only child spawn and runner-directory setup are unrecoverable; every
//! other failure is logged by its component and the session carries on.

use agent_run_terminal::PtyError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("PTY error: {0}")]
    Pty(#[from] PtyError),
    #[error("Runner directory setup failed during {operation}: {reason}")]
    Setup { operation: String, reason: String },
    #[error("Status file error during {operation}: {reason}")]
    Status { operation: String, reason: String },
    #[error("Intervention service error: {0}")]
    Intervention(String),
    #[error("Failed to setup signal handler: {0}")]
    SignalSetup(String),
}

impl RunnerError {
    /// Fatal errors abort the session before any loop starts.
    pub fn is_fatal(&self) -> bool {
        match self {
            RunnerError::Pty(e) => matches!(e, PtyError::Spawn(_) | PtyError::Open(_)),
            RunnerError::Setup { .. } | RunnerError::SignalSetup(_) => true,
            RunnerError::Status { .. } | RunnerError::Intervention(_) => false,
        }
    }

    /// Status reads race the external writer and may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            RunnerError::Status { .. } => true,
            RunnerError::Intervention(_) => true,
            RunnerError::Pty(e) => e.is_retryable(),
            _ => false,
        }
    }

    pub(crate) fn status(operation: &str, reason: impl ToString) -> Self {
        RunnerError::Status {
            operation: operation.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn setup(operation: &str, reason: impl ToString) -> Self {
        RunnerError::Setup {
            operation: operation.to_string(),
            reason: reason.to_string(),
        }
    }
}
