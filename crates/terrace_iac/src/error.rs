//! Error types for IaC operations.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for IaC operations.
pub type IacResult<T> = Result<T, IacError>;

/// Errors that can occur during IaC operations.
#[derive(Error, Debug)]
pub enum IacError {
    #[error("Terraform not available: {0}")]
    TerraformNotAvailable(String),

    #[error("Module of '{definition}' could not be parsed: {message}")]
    Discovery { definition: String, message: String },

    #[error(
        "Provider '{provider}' of definition '{definition}': constraint '{discovered}' does not overlap '{declared}'"
    )]
    IncompatibleConstraint {
        definition: String,
        provider: String,
        declared: String,
        discovered: String,
    },

    #[error("Provider '{provider}' has conflicting sources: '{first}' ({first_origin}) and '{second}' ({second_origin})")]
    SourceConflict {
        provider: String,
        first: String,
        first_origin: String,
        second: String,
        second_origin: String,
    },

    #[error("Definition '{definition}' reads output '{output}' of '{source_definition}', which does not exist")]
    MissingOutput {
        definition: String,
        source_definition: String,
        output: String,
    },

    #[error("Invalid working directory {0}")]
    InvalidWorkspace(PathBuf),

    #[error("Render failed: {0}")]
    Render(String),

    #[error("Hook {script} {message}")]
    Hook {
        script: String,
        message: String,
        output: String,
    },

    #[error("Terraform output could not be read: {0}")]
    InvalidOutput(String),

    #[error("Credentials error: {0}")]
    Credentials(String),

    #[error("Configuration error: {0}")]
    Config(#[from] terrace_config::ConfigError),

    #[error("Parser error: {0}")]
    Hcl(#[from] terrace_hcl::HclError),

    #[error("Runner error: {0}")]
    Runner(#[from] terrace_runner::RunnerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl IacError {
    /// Errors that stop a run before anything executes.
    pub fn is_reconciliation(&self) -> bool {
        matches!(
            self,
            IacError::IncompatibleConstraint { .. } | IacError::SourceConflict { .. }
        )
    }
}
