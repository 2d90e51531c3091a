//! End-to-end run: configuration to report.

use std::path::PathBuf;
use std::sync::Arc;

use futures_util::future::join_all;
use indexmap::IndexMap;
use tracing::{debug, info, warn};

use terrace_config::{BackendConfig, ConfigValidator, WorkerConfig};
use terrace_hcl::HclParser;
use terrace_iac::{
    CredentialProvider, HookRunner, IacError, ModuleDiscovery, ModuleInterface, ProviderReconciler,
    ReconciledProviderSet, RunWorkspace, TerraformRunner,
};
use terrace_runner::{CancellationToken, ProcessRunner, RunConfig};

use crate::driver::{RunAction, RunDriver, RunReport};
use crate::error::CoreResult;
use crate::graph::DependencyGraph;

/// Per-invocation options that are not part of the worker configuration.
#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    /// Definitions to run; empty means all
    pub limit: Vec<String>,
    /// Parent of the run directory; a temporary directory when unset
    pub working_dir: Option<PathBuf>,
    pub keep_workspace: bool,
    /// Forward terraform output to the log as it arrives
    pub stream_logs: bool,
}

/// Everything checked and discovered before the first terraform call.
#[derive(Debug)]
pub struct PreparedRun {
    pub config: WorkerConfig,
    /// Directory relative module paths resolve against
    pub base_dir: PathBuf,
    pub backend: BackendConfig,
    /// Graph over every declared definition
    pub graph: DependencyGraph,
    /// Definitions this run covers, in declaration order
    pub selection: Vec<String>,
    pub interfaces: IndexMap<String, ModuleInterface>,
    /// Definitions whose modules could not be parsed, with the reason
    pub discovery_failures: IndexMap<String, String>,
    pub providers: ReconciledProviderSet,
    pub warnings: Vec<String>,
}

impl PreparedRun {
    pub fn is_selected(&self, name: &str) -> bool {
        self.selection.iter().any(|selected| selected == name)
    }

    /// Graph layers restricted to the selection; reversed for destroy.
    pub fn layers(&self, action: RunAction) -> Vec<Vec<String>> {
        let layers = if action.is_destroy() {
            self.graph.reverse_layers()
        } else {
            self.graph.layers().to_vec()
        };

        layers
            .into_iter()
            .map(|layer| {
                layer
                    .into_iter()
                    .filter(|name| self.is_selected(name))
                    .collect::<Vec<_>>()
            })
            .filter(|layer| !layer.is_empty())
            .collect()
    }
}

/// Ties configuration, discovery, reconciliation and the driver together.
pub struct Pipeline {
    runner: Arc<dyn ProcessRunner>,
    parser: Arc<dyn HclParser>,
    credentials: Arc<dyn CredentialProvider>,
    options: PipelineOptions,
    cancellation: CancellationToken,
}

impl Pipeline {
    pub fn new(
        runner: Arc<dyn ProcessRunner>,
        parser: Arc<dyn HclParser>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            runner,
            parser,
            credentials,
            options: PipelineOptions::default(),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Token that stops launching definitions and signals running ones.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Validate the configuration, build the graph, discover modules and
    /// reconcile providers.
    ///
    /// Configuration, graph and reconciliation problems are returned as
    /// errors. A module that fails to parse is remembered and reported as
    /// that definition's failure when the run reaches it.
    pub async fn prepare(&self, config: WorkerConfig, base_dir: impl Into<PathBuf>) -> CoreResult<PreparedRun> {
        let base_dir = base_dir.into();

        let validation = ConfigValidator::ensure_valid(&config)?;
        for warning in &validation.warnings {
            warn!("{}", warning);
        }

        let graph = DependencyGraph::build(&config.definitions)?;
        let selection = config.select(&self.options.limit)?;
        if selection.len() < config.definitions.len() {
            info!("Limited to {}", selection.join(", "));
        }

        let discovery = ModuleDiscovery::new(self.parser.clone());
        let (discovery, base) = (&discovery, base_dir.as_path());
        let discovered = join_all(
            selection
                .iter()
                .filter_map(|name| config.definition(name))
                .map(|definition| async move {
                    (definition.name.clone(), discovery.discover(definition, base).await)
                }),
        )
        .await;

        let mut interfaces = IndexMap::new();
        let mut discovery_failures = IndexMap::new();
        for (name, result) in discovered {
            match result {
                Ok(interface) => {
                    debug!(
                        "'{}' requires {} provider(s), declares {} variable(s) and {} output(s)",
                        name,
                        interface.providers.len(),
                        interface.variables.len(),
                        interface.outputs.len()
                    );
                    interfaces.insert(name, interface);
                }
                Err(IacError::Discovery { message, .. }) => {
                    warn!("Could not parse the module of '{}': {}", name, message);
                    discovery_failures.insert(name, message);
                }
                Err(other) => return Err(other.into()),
            }
        }

        let providers = ProviderReconciler::new(&config.providers).reconcile(&interfaces)?;

        for (index, layer) in graph.layers().iter().enumerate() {
            info!("Layer {}: {}", index + 1, layer.join(", "));
        }

        let backend = config.backend(&base_dir);
        Ok(PreparedRun {
            config,
            base_dir,
            backend,
            graph,
            selection,
            interfaces,
            discovery_failures,
            providers,
            warnings: validation.warnings,
        })
    }

    /// Run `action` over a prepared run and settle the workspace.
    pub async fn execute(&self, prepared: &PreparedRun, action: RunAction) -> CoreResult<RunReport> {
        let options = &prepared.config.worker_options;

        let mut terraform = TerraformRunner::new(self.runner.clone());
        if let Some(binary) = &options.terraform_bin {
            terraform = terraform.with_binary(binary.display().to_string());
        }

        let mut run_config = RunConfig::default()
            .stream_logs(self.options.stream_logs)
            .cancellation(self.cancellation.clone());
        if let Some(timeout) = options.timeout_seconds {
            run_config = run_config.timeout(timeout);
        }

        let version = terraform.version(&run_config).await?;
        info!("Using {} ({})", terraform.binary(), version);

        let workspace = RunWorkspace::allocate(
            self.options.working_dir.as_deref(),
            self.options.keep_workspace,
        )?;

        let mut driver = RunDriver::new(terraform, self.credentials.clone())
            .with_run_config(run_config)
            .with_hooks(HookRunner::new(self.runner.clone()));
        if let Some(parallelism) = options.parallelism {
            driver = driver.with_parallelism(parallelism);
        }

        let outcome = driver.run(prepared, action, &workspace).await;
        let retained = workspace.finish()?;

        let mut report = outcome?;
        report.retained = retained;
        Ok(report)
    }
}
