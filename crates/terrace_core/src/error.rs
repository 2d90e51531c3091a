//! Error types for the core module.

use thiserror::Error;

use terrace_config::ConfigError;
use terrace_hcl::HclError;
use terrace_iac::IacError;

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Problems with the shape of the definition graph.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Definition '{definition}' binds '{variable}' to unknown definition '{source_definition}'")]
    UnknownSource {
        definition: String,
        variable: String,
        source_definition: String,
    },

    #[error("Definition '{definition}' binds '{variable}' to its own output")]
    SelfReference { definition: String, variable: String },

    #[error("Dependency cycle: {}", .path.join(" -> "))]
    Cycle {
        /// Participants in edge order, first node repeated at the end.
        path: Vec<String>,
    },
}

/// Errors that stop a run as a whole.
///
/// Failures of a single definition are not errors; they are recorded on its
/// [`crate::ExecutionRecord`].
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Provider reconciliation failed: {0}")]
    Reconciliation(IacError),

    #[error("Parser engine error: {0}")]
    Engine(#[from] HclError),

    #[error("{0}")]
    Iac(IacError),

    #[error("Invalid record transition: {0}")]
    InvalidState(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl CoreError {
    /// Whether the run was rejected before anything executed because of the
    /// configuration, its graph or its providers.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            CoreError::Config(_) | CoreError::Graph(_) | CoreError::Reconciliation(_) | CoreError::Engine(_)
        ) || matches!(self, CoreError::Iac(IacError::Config(_)))
    }
}

impl From<IacError> for CoreError {
    fn from(err: IacError) -> Self {
        if err.is_reconciliation() {
            CoreError::Reconciliation(err)
        } else {
            CoreError::Iac(err)
        }
    }
}
