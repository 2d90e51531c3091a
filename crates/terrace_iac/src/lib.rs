//! # terrace_iac
//!
//! Terraform-facing building blocks of a terrace run.
//!
//! - [`ModuleDiscovery`] reads a module's provider requirements, variables
//!   and outputs through the run's HCL parser
//! - [`ProviderReconciler`] merges those requirements with the configured
//!   providers
//! - [`RunWorkspace`] and [`WorkspaceRenderer`] materialize one root module
//!   per definition
//! - [`TerraformRunner`] drives the terraform binary inside it
//! - [`CredentialProvider`] supplies the credentials every invocation uses
//! - [`HookRunner`] runs a module's `hooks/` scripts around terraform steps
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::path::Path;
//! use indexmap::IndexMap;
//! use terrace_config::{BackendKind, Definition, WorkerOptions};
//! use terrace_iac::{ModuleInterface, RenderRequest, WorkspaceRenderer};
//!
//! let definition = Definition::new("network", "definitions/network");
//! let interface = ModuleInterface::default();
//! let backend = WorkerOptions { backend: BackendKind::Local, ..Default::default() }
//!     .backend_config(Path::new("/repo"));
//! let (providers, globals, wiring) = (IndexMap::new(), IndexMap::new(), IndexMap::new());
//!
//! let request = RenderRequest {
//!     definition: &definition,
//!     interface: &interface,
//!     providers: &providers,
//!     backend: &backend,
//!     globals: &globals,
//!     base_dir: Path::new("/repo"),
//!     wiring: &wiring,
//! };
//! WorkspaceRenderer::render(&request, Path::new("/tmp/run/network")).unwrap();
//! ```

pub mod backend;
pub mod credentials;
pub mod discovery;
pub mod error;
pub mod hcl_writer;
pub mod hooks;
pub mod providers;
pub mod renderer;
pub mod terraform;

pub use backend::StateLocation;
pub use credentials::{AmbientCredentials, AssumeRoleProvider, CredentialProvider, Credentials};
pub use discovery::{DiscoveredProvider, ModuleDiscovery, ModuleInterface, ModuleOutput};
pub use error::{IacError, IacResult};
pub use hooks::{DefinitionHooks, HookEnv, HookPhase, HookRunner, HookStep, HookVarKind};
pub use providers::{ProviderReconciler, ReconciledProviderSet};
pub use renderer::{
    OutputMap, RenderRequest, RenderedDefinition, RunWorkspace, Wiring, WorkspaceRenderer,
};
pub use terraform::{parse_outputs, TerraformResult, TerraformRunner, PLAN_FILE};
