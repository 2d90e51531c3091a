//! Terraform runner.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use terrace_runner::{CommandSpec, ExecutionResult, ProcessRunner, RunConfig, RunnerError};

use crate::error::{IacError, IacResult};
use crate::renderer::OutputMap;

/// Plan file written by `plan` and consumed by `apply`.
pub const PLAN_FILE: &str = "terrace.tfplan";

const LOCK_MARKERS: [&str; 2] = ["Error acquiring the state lock", "Error locking state"];

/// Result of a Terraform operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerraformResult {
    pub success: bool,
    pub output: String,
    pub exit_code: i64,
    pub command: String,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    /// For plans: whether changes are pending
    pub changes: Option<bool>,
}

impl TerraformResult {
    fn from_execution(result: ExecutionResult) -> Self {
        Self {
            success: result.success(),
            output: result.combined_output(),
            exit_code: result.exit_code,
            command: result.command,
            stdout: result.stdout,
            stderr: result.stderr,
            duration_ms: result.duration_ms,
            changes: None,
        }
    }

    /// Whether the failure came from state locking rather than the module.
    pub fn is_lock_error(&self) -> bool {
        LOCK_MARKERS
            .iter()
            .any(|marker| self.stderr.contains(marker) || self.output.contains(marker))
    }
}

/// Runs terraform commands in a rendered definition directory.
#[derive(Clone)]
pub struct TerraformRunner {
    runner: Arc<dyn ProcessRunner>,
    binary: String,
    env: BTreeMap<String, String>,
}

impl TerraformRunner {
    /// Create a new Terraform runner.
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        let mut env = BTreeMap::new();
        env.insert("TF_IN_AUTOMATION".to_string(), "1".to_string());
        env.insert("TF_INPUT".to_string(), "0".to_string());
        Self {
            runner,
            binary: "terraform".to_string(),
            env,
        }
    }

    /// Use a specific terraform binary.
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Add environment variables to every invocation.
    pub fn with_env(mut self, vars: impl IntoIterator<Item = (String, String)>) -> Self {
        self.env.extend(vars);
        self
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    /// Check the binary runs and report its version line.
    pub async fn version(&self, config: &RunConfig) -> IacResult<String> {
        let spec = CommandSpec::new(&self.binary)
            .arg("version")
            .envs(self.env.clone());
        let result = self.runner.run(&spec, config).await.map_err(|e| match e {
            RunnerError::NotFound(program) => IacError::TerraformNotAvailable(program),
            other => IacError::Runner(other),
        })?;
        if !result.success() {
            return Err(IacError::TerraformNotAvailable(result.combined_output()));
        }
        Ok(result.stdout.lines().next().unwrap_or_default().trim().to_string())
    }

    /// Run terraform init.
    pub async fn init(&self, working_dir: &Path, config: &RunConfig) -> IacResult<TerraformResult> {
        info!("Running terraform init in {:?}", working_dir);
        self.run_command(working_dir, &["init", "-input=false", "-no-color"], config)
            .await
    }

    /// Run terraform plan, saving the plan for `apply`.
    ///
    /// Uses `-detailed-exitcode`: exit 2 means changes are pending and counts
    /// as success.
    pub async fn plan(
        &self,
        working_dir: &Path,
        destroy: bool,
        config: &RunConfig,
    ) -> IacResult<TerraformResult> {
        info!("Running terraform plan in {:?}", working_dir);
        let out = format!("-out={}", PLAN_FILE);
        let mut args = vec!["plan", "-input=false", "-no-color", "-detailed-exitcode", out.as_str()];
        if destroy {
            args.push("-destroy");
        }

        let mut result = self.run_command(working_dir, &args, config).await?;
        match result.exit_code {
            0 => result.changes = Some(false),
            2 => {
                result.success = true;
                result.changes = Some(true);
            }
            _ => {}
        }
        Ok(result)
    }

    /// Apply the saved plan.
    pub async fn apply(&self, working_dir: &Path, config: &RunConfig) -> IacResult<TerraformResult> {
        info!("Running terraform apply in {:?}", working_dir);
        self.run_command(
            working_dir,
            &["apply", "-input=false", "-no-color", "-auto-approve", PLAN_FILE],
            config,
        )
        .await
    }

    /// Run terraform destroy.
    pub async fn destroy(&self, working_dir: &Path, config: &RunConfig) -> IacResult<TerraformResult> {
        info!("Running terraform destroy in {:?}", working_dir);
        self.run_command(
            working_dir,
            &["destroy", "-input=false", "-no-color", "-auto-approve"],
            config,
        )
        .await
    }

    /// Run `terraform output -json`.
    pub async fn output(&self, working_dir: &Path, config: &RunConfig) -> IacResult<TerraformResult> {
        debug!("Reading outputs in {:?}", working_dir);
        self.run_command(working_dir, &["output", "-json", "-no-color"], config)
            .await
    }

    /// Run arbitrary terraform command.
    async fn run_command(
        &self,
        working_dir: &Path,
        args: &[&str],
        config: &RunConfig,
    ) -> IacResult<TerraformResult> {
        let spec = CommandSpec::new(&self.binary)
            .args(args.iter().copied())
            .workdir(working_dir)
            .envs(self.env.clone());

        debug!("Executing terraform {:?}", args);

        let result = self.runner.run(&spec, config).await.map_err(|e| match e {
            RunnerError::NotFound(program) => IacError::TerraformNotAvailable(program),
            other => IacError::Runner(other),
        })?;

        Ok(TerraformResult::from_execution(result))
    }
}

/// Values of `terraform output -json`.
pub fn parse_outputs(stdout: &str) -> IacResult<OutputMap> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(OutputMap::new());
    }

    let document: Value = serde_json::from_str(trimmed)?;
    let Value::Object(entries) = document else {
        return Err(IacError::InvalidOutput(
            "expected a JSON object of outputs".to_string(),
        ));
    };

    let mut outputs = OutputMap::new();
    for (name, entry) in entries {
        let value = entry.get("value").cloned().ok_or_else(|| {
            IacError::InvalidOutput(format!("output '{}' has no value", name))
        })?;
        outputs.insert(name, value);
    }
    Ok(outputs)
}
