//! Execution driver.
//!
//! Walks the graph layer by layer. Definitions of one layer run concurrently,
//! bounded by the configured parallelism; a layer starts only when every
//! record of the previous one is terminal.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use terrace_config::Definition;
use terrace_iac::{
    parse_outputs, CredentialProvider, DefinitionHooks, HookPhase, HookRunner, HookStep, IacError,
    IacResult, OutputMap, RenderRequest, RunWorkspace, TerraformResult, TerraformRunner, Wiring,
    WorkspaceRenderer,
};
use terrace_runner::{CancellationToken, RunConfig, RunnerError};

use crate::error::{CoreError, CoreResult};
use crate::pipeline::PreparedRun;
use crate::record::{ExecutionRecord, FailureKind, FailureReport, RecordBook, RecordStatus};

/// Name of the run log written into the run directory.
pub const RUN_LOG_FILE: &str = "run.json";

const DEFAULT_PARALLELISM: usize = 4;

/// What a run does to each definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunAction {
    /// init + plan, nothing is changed
    Plan,
    /// init + plan + apply, outputs captured for dependents
    Apply,
    /// init + destroy, dependents first
    Destroy,
}

impl RunAction {
    pub fn is_destroy(&self) -> bool {
        matches!(self, Self::Destroy)
    }

    /// Only applies leave outputs that dependents can consume directly.
    pub fn captures_outputs(&self) -> bool {
        matches!(self, Self::Apply)
    }
}

impl fmt::Display for RunAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Plan => "plan",
            Self::Apply => "apply",
            Self::Destroy => "destroy",
        };
        write!(f, "{}", s)
    }
}

/// Outcome of a run, persisted as `run.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub action: RunAction,
    pub deployment: String,
    /// Run directory
    pub workspace: PathBuf,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Records in execution order
    pub records: Vec<ExecutionRecord>,
    /// Where the run directory was kept, if it was
    #[serde(skip)]
    pub retained: Option<PathBuf>,
}

impl RunReport {
    /// A run succeeds only when every definition it covered succeeded.
    pub fn is_success(&self) -> bool {
        self.records
            .iter()
            .all(|record| record.status == RecordStatus::Succeeded)
    }

    pub fn record(&self, definition: &str) -> Option<&ExecutionRecord> {
        self.records.iter().find(|record| record.definition == definition)
    }

    pub fn count(&self, status: RecordStatus) -> usize {
        self.records.iter().filter(|record| record.status == status).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &FailureReport> {
        self.records.iter().filter_map(|record| record.failure.as_ref())
    }

    /// Definitions in execution order.
    pub fn order(&self) -> Vec<&str> {
        self.records.iter().map(|record| record.definition.as_str()).collect()
    }

    pub fn log_path(dir: &Path) -> PathBuf {
        dir.join(RUN_LOG_FILE)
    }

    /// Write the report into `dir`.
    pub fn save(&self, dir: &Path) -> CoreResult<PathBuf> {
        let path = Self::log_path(dir);
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| CoreError::Serialization(e.to_string()))?;
        fs::write(&path, json)?;
        debug!("Saved run log to {:?}", path);
        Ok(path)
    }

    pub fn load(path: &Path) -> CoreResult<Self> {
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| CoreError::Serialization(e.to_string()))
    }
}

/// What a successful definition leaves behind.
struct Completed {
    outputs: Option<OutputMap>,
    changes: Option<bool>,
}

/// Drives terraform over a prepared run.
pub struct RunDriver {
    terraform: TerraformRunner,
    credentials: Arc<dyn CredentialProvider>,
    run_config: RunConfig,
    parallelism: usize,
    hooks: Option<HookRunner>,
}

impl RunDriver {
    pub fn new(terraform: TerraformRunner, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            terraform,
            credentials,
            run_config: RunConfig::default(),
            parallelism: DEFAULT_PARALLELISM,
            hooks: None,
        }
    }

    /// Run module hook scripts around each terraform step.
    pub fn with_hooks(mut self, hooks: HookRunner) -> Self {
        self.hooks = Some(hooks);
        self
    }

    /// Timeout, log streaming and cancellation for every invocation.
    pub fn with_run_config(mut self, config: RunConfig) -> Self {
        self.run_config = config;
        self
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    /// Token that cancels this driver's run.
    pub fn cancellation(&self) -> CancellationToken {
        self.run_config.cancellation.clone()
    }

    /// Run `action` over the selected definitions of `prepared`.
    ///
    /// Failures of single definitions are recorded, not returned. The
    /// returned error is reserved for problems with the run itself.
    pub async fn run(
        &self,
        prepared: &PreparedRun,
        action: RunAction,
        workspace: &RunWorkspace,
    ) -> CoreResult<RunReport> {
        let started_at = Utc::now();
        let layers = prepared.layers(action);
        let book = Mutex::new(RecordBook::new(layers.iter().flatten().cloned()));
        let semaphore = Semaphore::new(self.parallelism);

        info!(
            "Starting {} of {} definition(s) in {} layer(s) for deployment '{}'",
            action,
            layers.iter().map(Vec::len).sum::<usize>(),
            layers.len(),
            prepared.backend.deployment
        );

        for (index, layer) in layers.iter().enumerate() {
            let runnable = self.admit(prepared, action, layer, &book)?;
            if runnable.is_empty() {
                continue;
            }

            debug!("Layer {}: {}", index + 1, runnable.join(", "));
            let tasks = runnable.iter().map(|name| {
                self.run_definition(prepared, action, workspace, name, &book, &semaphore)
            });
            for result in join_all(tasks).await {
                result?;
            }
        }

        let book = book.into_inner();
        let report = RunReport {
            run_id: workspace.run_id().to_string(),
            action,
            deployment: prepared.backend.deployment.clone(),
            workspace: workspace.root().to_path_buf(),
            started_at,
            finished_at: Utc::now(),
            records: book.into_records(),
            retained: None,
        };
        report.save(workspace.root())?;

        info!(
            "{} finished: {} succeeded, {} failed, {} skipped",
            action,
            report.count(RecordStatus::Succeeded),
            report.count(RecordStatus::Failed),
            report.count(RecordStatus::Skipped)
        );
        Ok(report)
    }

    /// Skip what is blocked or cancelled; return what may start.
    fn admit<'a>(
        &self,
        prepared: &PreparedRun,
        action: RunAction,
        layer: &'a [String],
        book: &Mutex<RecordBook>,
    ) -> CoreResult<Vec<&'a str>> {
        let mut book = book.lock();
        let mut runnable = Vec::new();

        for name in layer {
            if self.run_config.cancellation.is_cancelled() {
                book.skip(name, "run cancelled")?;
                continue;
            }

            // Teardown waits on dependents instead of dependencies.
            let upstream = if action.is_destroy() {
                prepared.graph.dependents(name)
            } else {
                prepared.graph.dependencies(name)
            };
            match book.blocker(upstream) {
                Some((blocker, RecordStatus::Failed)) => {
                    book.skip(name, format!("'{}' failed", blocker))?;
                }
                Some((blocker, _)) => {
                    book.skip(name, format!("'{}' was skipped", blocker))?;
                }
                None => runnable.push(name.as_str()),
            }
        }

        Ok(runnable)
    }

    async fn run_definition(
        &self,
        prepared: &PreparedRun,
        action: RunAction,
        workspace: &RunWorkspace,
        name: &str,
        book: &Mutex<RecordBook>,
        semaphore: &Semaphore,
    ) -> CoreResult<()> {
        let _permit = semaphore
            .acquire()
            .await
            .map_err(|e| CoreError::InvalidState(e.to_string()))?;

        if self.run_config.cancellation.is_cancelled() {
            return book.lock().skip(name, "run cancelled");
        }

        let captured = if action.captures_outputs() {
            Self::captured_upstream(prepared, name, &book.lock())
        } else {
            IndexMap::new()
        };

        book.lock().start(name)?;
        let outcome = self
            .execute_definition(prepared, action, workspace, name, &captured)
            .await;

        let mut book = book.lock();
        match outcome {
            Ok(completed) => book.succeed(name, completed.outputs, completed.changes),
            Err(report) => {
                error!("{}", report);
                book.fail(name, report)
            }
        }
    }

    /// Outputs of dependencies that already succeeded in this run.
    fn captured_upstream(
        prepared: &PreparedRun,
        name: &str,
        book: &RecordBook,
    ) -> IndexMap<String, OutputMap> {
        prepared
            .graph
            .dependencies(name)
            .iter()
            .filter_map(|dependency| {
                book.outputs(dependency)
                    .map(|outputs| (dependency.clone(), outputs.clone()))
            })
            .collect()
    }

    async fn execute_definition(
        &self,
        prepared: &PreparedRun,
        action: RunAction,
        workspace: &RunWorkspace,
        name: &str,
        captured: &IndexMap<String, OutputMap>,
    ) -> Result<Completed, FailureReport> {
        let dir = workspace.definition_dir(name);
        let fail = |kind: FailureKind, message: String| {
            FailureReport::new(name, kind, message).with_workspace(&dir)
        };

        if let Some(message) = prepared.discovery_failures.get(name) {
            return Err(FailureReport::new(name, FailureKind::Parse, message.clone()));
        }
        let (Some(definition), Some(interface)) =
            (prepared.config.definition(name), prepared.interfaces.get(name))
        else {
            return Err(FailureReport::new(
                name,
                FailureKind::Render,
                "definition was not prepared for this run",
            ));
        };

        let wiring = wire(definition, captured).map_err(|e| match e {
            IacError::MissingOutput { .. } => fail(FailureKind::MissingOutput, e.to_string()),
            other => fail(FailureKind::Render, other.to_string()),
        })?;

        let no_providers = IndexMap::new();
        let request = RenderRequest {
            definition,
            interface,
            providers: prepared.providers.for_definition(name).unwrap_or(&no_providers),
            backend: &prepared.backend,
            globals: &prepared.config.terraform_vars,
            base_dir: &prepared.base_dir,
            wiring: &wiring,
        };
        let rendered = WorkspaceRenderer::render(&request, &dir)
            .map_err(|e| fail(FailureKind::Render, e.to_string()))?;
        if !rendered.deferred.is_empty() {
            debug!(
                "'{}' reads {} from remote state",
                name,
                rendered.deferred.join(", ")
            );
        }

        let credential_env = match self.credentials.credentials().await {
            Ok(Some(credentials)) => credentials.to_env(),
            Ok(None) => BTreeMap::new(),
            Err(e) => return Err(fail(FailureKind::Backend, e.to_string())),
        };
        let terraform = self.terraform.clone().with_env(credential_env.clone());
        let hooks = match &self.hooks {
            Some(runner) => DefinitionHooks::for_request(runner, &request, terraform.binary())
                .map_err(|e| fail(FailureKind::Hook, e.to_string()))?
                .map(|hooks| hooks.with_env(credential_env)),
            None => None,
        };
        let steps = Steps {
            name,
            dir: &dir,
            config: self.run_config.clone().label(name),
            hooks,
        };
        let config = &steps.config;

        steps.hook(HookPhase::Pre, HookStep::Init, None).await?;
        steps.check("init", terraform.init(&dir, config).await)?;
        steps.hook(HookPhase::Post, HookStep::Init, None).await?;

        match action {
            RunAction::Plan => {
                steps.hook(HookPhase::Pre, HookStep::Plan, None).await?;
                let plan = steps.check("plan", terraform.plan(&dir, false, config).await)?;
                steps.hook(HookPhase::Post, HookStep::Plan, None).await?;
                info!("'{}' planned: changes pending = {:?}", name, plan.changes);
                Ok(Completed {
                    outputs: None,
                    changes: plan.changes,
                })
            }
            RunAction::Apply => {
                steps.hook(HookPhase::Pre, HookStep::Plan, None).await?;
                let plan = steps.check("plan", terraform.plan(&dir, false, config).await)?;
                steps.hook(HookPhase::Post, HookStep::Plan, None).await?;

                let applied = plan.changes == Some(true);
                if applied {
                    steps.hook(HookPhase::Pre, HookStep::Apply, None).await?;
                    steps.check("apply", terraform.apply(&dir, config).await)?;
                } else {
                    info!("'{}' has no changes to apply", name);
                }

                let output = steps.check("output", terraform.output(&dir, config).await)?;
                let outputs = parse_outputs(&output.stdout)
                    .map_err(|e| fail(FailureKind::Execution, e.to_string()))?;
                debug!("'{}' produced {} output(s)", name, outputs.len());
                if applied {
                    steps.hook(HookPhase::Post, HookStep::Apply, Some(&outputs)).await?;
                }
                Ok(Completed {
                    outputs: Some(outputs),
                    changes: plan.changes,
                })
            }
            RunAction::Destroy => {
                steps.hook(HookPhase::Pre, HookStep::Destroy, None).await?;
                steps.check("destroy", terraform.destroy(&dir, config).await)?;
                steps.hook(HookPhase::Post, HookStep::Destroy, None).await?;
                Ok(Completed {
                    outputs: None,
                    changes: None,
                })
            }
        }
    }
}

/// One definition's terraform steps and the hooks around them.
struct Steps<'a> {
    name: &'a str,
    dir: &'a Path,
    config: RunConfig,
    hooks: Option<DefinitionHooks>,
}

impl Steps<'_> {
    fn check(&self, phase: &str, result: IacResult<TerraformResult>) -> Result<TerraformResult, FailureReport> {
        check(self.name, self.dir, phase, result)
    }

    async fn hook(
        &self,
        phase: HookPhase,
        step: HookStep,
        outputs: Option<&OutputMap>,
    ) -> Result<(), FailureReport> {
        let Some(hooks) = &self.hooks else {
            return Ok(());
        };
        match hooks.fire(phase, step, outputs, &self.config).await {
            Ok(_) => Ok(()),
            Err(e) => Err(hook_failure(self.name, self.dir, phase, step, e)),
        }
    }
}

/// Classify a hook failure. Cancellation and timeouts read like terraform's.
fn hook_failure(name: &str, dir: &Path, phase: HookPhase, step: HookStep, err: IacError) -> FailureReport {
    let report = |message: String| FailureReport::new(name, FailureKind::Hook, message).with_workspace(dir);
    match err {
        IacError::Hook { script, message, output } => {
            report(format!("{}_{} hook {} {}", phase, step, script, message)).with_tool_output(output)
        }
        IacError::Runner(RunnerError::Timeout(seconds)) => {
            report(format!("{}_{} hook timed out after {} seconds", phase, step, seconds))
        }
        IacError::Runner(RunnerError::Cancelled) => report(format!("{}_{} hook was cancelled", phase, step)),
        other => report(format!("{}_{} hook could not run: {}", phase, step, other)),
    }
}

/// Wiring for every remote binding of `definition`.
///
/// A source that ran in this run is wired directly; anything else is read
/// from its remote state.
fn wire(
    definition: &Definition,
    captured: &IndexMap<String, OutputMap>,
) -> IacResult<IndexMap<String, Wiring>> {
    let mut wiring = IndexMap::new();
    for binding in definition.bindings()? {
        let outputs = captured.get(&binding.source_definition);
        let resolved = Wiring::resolve(&definition.name, &binding, outputs)?;
        wiring.insert(binding.variable.clone(), resolved);
    }
    Ok(wiring)
}

/// Classify the result of one terraform invocation.
fn check(
    name: &str,
    dir: &Path,
    phase: &str,
    result: IacResult<TerraformResult>,
) -> Result<TerraformResult, FailureReport> {
    let report = |kind: FailureKind, message: String| {
        FailureReport::new(name, kind, message).with_workspace(dir)
    };

    match result {
        Ok(result) if result.success => Ok(result),
        Ok(result) if result.is_lock_error() => {
            warn!("'{}': state lock held during terraform {}", name, phase);
            Err(report(
                FailureKind::Backend,
                format!("terraform {} could not acquire the state lock", phase),
            )
            .with_tool_output(result.output))
        }
        Ok(result) => Err(report(
            FailureKind::Execution,
            format!("terraform {} exited with {}", phase, result.exit_code),
        )
        .with_tool_output(result.output)),
        Err(IacError::Runner(RunnerError::Timeout(seconds))) => Err(report(
            FailureKind::Execution,
            format!("terraform {} timed out after {} seconds", phase, seconds),
        )),
        Err(IacError::Runner(RunnerError::Cancelled)) => Err(report(
            FailureKind::Execution,
            format!("terraform {} was cancelled", phase),
        )),
        Err(e) => Err(report(
            FailureKind::Execution,
            format!("terraform {} could not run: {}", phase, e),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(exit_code: i64, stderr: &str) -> TerraformResult {
        TerraformResult {
            success: exit_code == 0,
            output: stderr.to_string(),
            exit_code,
            command: "terraform apply".to_string(),
            stdout: String::new(),
            stderr: stderr.to_string(),
            duration_ms: 5,
            changes: None,
        }
    }

    #[test]
    fn test_check_classifies_failures() {
        let dir = Path::new("/runs/run-1/network");

        assert!(check("network", dir, "apply", Ok(result(0, ""))).is_ok());

        let locked = check(
            "network",
            dir,
            "apply",
            Ok(result(1, "Error: Error acquiring the state lock")),
        )
        .unwrap_err();
        assert_eq!(locked.kind, FailureKind::Backend);
        assert_eq!(locked.workspace.as_deref(), Some(dir));
        assert!(locked.tool_output.unwrap().contains("state lock"));

        let failed = check("network", dir, "apply", Ok(result(1, "Error: Unsupported argument"))).unwrap_err();
        assert_eq!(failed.kind, FailureKind::Execution);
        assert_eq!(failed.message, "terraform apply exited with 1");

        let timed_out = check(
            "network",
            dir,
            "plan",
            Err(IacError::Runner(RunnerError::Timeout(30))),
        )
        .unwrap_err();
        assert_eq!(timed_out.kind, FailureKind::Execution);
        assert!(timed_out.message.contains("timed out after 30 seconds"));
    }

    #[test]
    fn test_wire_prefers_captured_outputs() {
        let definition = Definition::new("database", "modules/database")
            .with_remote_var("vpc_id", "network.vpc_id")
            .with_remote_var("zone_id", "dns.zone_id");

        let mut outputs = OutputMap::new();
        outputs.insert("vpc_id".to_string(), serde_json::json!("vpc-123"));
        let mut captured = IndexMap::new();
        captured.insert("network".to_string(), outputs);

        let wiring = wire(&definition, &captured).unwrap();
        assert_eq!(wiring["vpc_id"], Wiring::Direct(serde_json::json!("vpc-123")));
        assert!(matches!(wiring["zone_id"], Wiring::Deferred { ref source_definition, .. } if source_definition == "dns"));

        let missing = Definition::new("database", "modules/database")
            .with_remote_var("subnet_ids", "network.private_subnet_ids");
        assert!(matches!(
            wire(&missing, &captured),
            Err(IacError::MissingOutput { .. })
        ));
    }

    #[test]
    fn test_action_properties() {
        assert!(RunAction::Destroy.is_destroy());
        assert!(RunAction::Apply.captures_outputs());
        assert!(!RunAction::Plan.captures_outputs());
        assert_eq!(RunAction::Plan.to_string(), "plan");
    }
}
