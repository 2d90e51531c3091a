//! # terrace_core
//!
//! Orchestration engine for terrace.
//!
//! This crate turns a worker configuration into an ordered run over its
//! definitions and wires each definition's outputs into its dependents.
//!
//! # Architecture
//!
//! - **Graph**: remote bindings become edges; Kahn layering gives the order
//! - **Records**: one lifecycle record per definition, owned by the driver
//! - **Driver**: renders and runs terraform layer by layer, skipping the
//!   dependents of anything that failed
//! - **Pipeline**: validation, discovery and reconciliation before the driver
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use terrace_config::ConfigReader;
//! use terrace_core::{Pipeline, RunAction};
//! use terrace_hcl::EmbeddedParser;
//! use terrace_iac::AmbientCredentials;
//! use terrace_runner::SystemRunner;
//!
//! let loaded = ConfigReader::from_path("worker.yaml")?;
//! let pipeline = Pipeline::new(
//!     Arc::new(SystemRunner::new()),
//!     Arc::new(EmbeddedParser::new()),
//!     Arc::new(AmbientCredentials::from_env()),
//! );
//!
//! let prepared = pipeline.prepare(loaded.config.clone(), loaded.base_dir()).await?;
//! let report = pipeline.execute(&prepared, RunAction::Apply).await?;
//! assert!(report.is_success());
//! ```

pub mod driver;
pub mod error;
pub mod graph;
pub mod pipeline;
pub mod record;

pub use driver::{RunAction, RunDriver, RunReport, RUN_LOG_FILE};
pub use error::{CoreError, CoreResult, GraphError};
pub use graph::DependencyGraph;
pub use pipeline::{Pipeline, PipelineOptions, PreparedRun};
pub use record::{ExecutionRecord, FailureKind, FailureReport, RecordBook, RecordStatus};
