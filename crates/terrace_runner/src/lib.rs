//! # terrace_runner
//!
//! External process execution for terrace.
//!
//! Every external program terrace drives (terraform, the HCL helper, the AWS
//! CLI) goes through the [`ProcessRunner`] trait, so tests can swap in the
//! scripted [`MockRunner`].
//!
//! # Features
//!
//! - **Timeouts**: a process exceeding `RunConfig::timeout_seconds` is killed
//! - **Cancellation**: a cancelled run sends SIGTERM, then kills after a grace period
//! - **Log streaming**: output lines forwarded to `tracing` as they arrive
//! - **Mock Runner**: scripted responses and captured calls for tests
//!
//! # Example
//!
//! ```rust,no_run
//! use terrace_runner::{CommandSpec, ProcessRunner, RunConfig, SystemRunner};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runner = SystemRunner::new();
//!     let spec = CommandSpec::new("terraform").arg("version").workdir("/tmp");
//!
//!     let result = runner.run(&spec, &RunConfig::default().timeout(30)).await?;
//!     println!("Exit code: {}", result.exit_code);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod mock;
pub mod runner;
pub mod system;

pub use config::{CommandSpec, RunConfig};
pub use error::{RunnerError, RunnerResult};
pub use mock::{CapturedCall, MockResponse, MockRunner};
pub use runner::{ExecutionResult, ProcessRunner};
pub use system::{find_executable, LogHandler, LogLine, LogStream, SystemRunner};
pub use tokio_util::sync::CancellationToken;
