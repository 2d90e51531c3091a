//! Error types for the parsing engine.

use std::path::PathBuf;
use thiserror::Error;

use terrace_runner::RunnerError;

/// Result type alias for parsing engine operations.
pub type HclResult<T> = Result<T, HclError>;

#[derive(Error, Debug)]
pub enum HclError {
    #[error("Failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    /// The requested engine cannot be used. A configuration problem.
    #[error("HCL engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("Invalid HCL engine '{0}' (expected external, embedded or auto)")]
    InvalidEngine(String),

    #[error("HCL helper exited with code {code}: {stderr}")]
    HelperFailed { code: i64, stderr: String },

    #[error("Invalid response from HCL helper: {0}")]
    InvalidResponse(String),

    #[error("HCL helper timed out after {0} seconds")]
    Timeout(u64),

    #[error("Runner error: {0}")]
    Runner(#[from] RunnerError),

    #[error("HCL error: {0}")]
    Hcl(#[from] hcl::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
