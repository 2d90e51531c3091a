//! Error types for configuration loading and validation.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised before any definition is executed.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid configuration in {path}: {message}")]
    InvalidFormat { path: PathBuf, message: String },

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("Invalid remote variable '{variable}' in definition '{definition}': {reason}")]
    InvalidBinding {
        definition: String,
        variable: String,
        reason: String,
    },

    #[error("Invalid version constraint '{constraint}': {message}")]
    InvalidConstraint { constraint: String, message: String },

    #[error("Unknown definition selected: {0}")]
    UnknownDefinition(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HCL parsing error: {0}")]
    Hcl(#[from] hcl::Error),
}
