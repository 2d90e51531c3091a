//! # terrace_hcl
//!
//! Parsing engine turning terraform module sources into JSON trees.
//!
//! Two interchangeable implementations sit behind [`HclParser`]:
//!
//! - [`EmbeddedParser`]: in-process, built on `hcl-rs`
//! - [`ExternalParser`]: the `terrace-hcl2json` helper, one process per batch
//!
//! Both produce the same tree for the same input. Attributes map to their
//! values, and every block becomes a list of bodies nested under its type
//! and labels:
//!
//! ```text
//! terraform { required_providers { aws = { source = "hashicorp/aws" } } }
//! => {"terraform": [{"required_providers": [{"aws": {"source": "hashicorp/aws"}}]}]}
//! ```
//!
//! Expressions that are not literals are kept as `"${...}"` strings.
//!
//! [`EngineSelection`] decides which implementation a run uses.

pub mod embedded;
pub mod engine;
pub mod error;
pub mod external;
pub mod tree;

pub use embedded::EmbeddedParser;
pub use engine::{
    BatchOutcome, EngineKind, EngineSelection, HclParser, ResolvedEngine, ENGINE_ENV,
    HELPER_BINARY, HELPER_BIN_ENV,
};
pub use error::{HclError, HclResult};
pub use external::ExternalParser;
pub use tree::body_to_tree;
