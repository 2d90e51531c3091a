//! # terrace_config
//!
//! Typed worker configuration for terrace.
//!
//! A worker configuration lives under a single top-level `terraform` key and
//! may be written as YAML, JSON or HCL. All three forms deserialize into the
//! same [`WorkerConfig`].
//!
//! ```rust,no_run
//! use terrace_config::{ConfigReader, ConfigValidator};
//!
//! let loaded = ConfigReader::from_path("worker.yaml")?;
//! ConfigValidator::ensure_valid(&loaded.config)?;
//! for (name, definition) in &loaded.config.definitions {
//!     println!("{name}: {}", definition.path);
//! }
//! # Ok::<(), terrace_config::ConfigError>(())
//! ```

pub mod constraint;
pub mod error;
pub mod models;
pub mod reader;
pub mod validator;

mod unique;

pub use constraint::{Operator, VersionConstraint};
pub use error::{ConfigError, ConfigResult};
pub use models::*;
pub use reader::{ConfigFormat, ConfigReader, LoadedConfig};
pub use validator::{ConfigValidator, ValidationResult};
