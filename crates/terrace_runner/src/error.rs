//! Error types for the runner module.

use thiserror::Error;

/// Result type alias for runner operations.
pub type RunnerResult<T> = Result<T, RunnerError>;

/// Errors that prevent a process from producing an exit code.
///
/// A process that runs and exits non-zero is not an error here; callers
/// inspect [`crate::ExecutionResult::exit_code`].
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Executable not found: {0}")]
    NotFound(String),

    #[error("Failed to start {program}: {message}")]
    SpawnFailed { program: String, message: String },

    #[error("Process execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Process timed out after {0} seconds")]
    Timeout(u64),

    #[error("Process cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
