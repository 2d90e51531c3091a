//! Parser backed by the `terrace-hcl2json` helper process.
//!
//! Batch mode: `terrace-hcl2json --multi <paths...>` prints
//! `{"ok": {path: tree}, "errors": {path: message}}` and exits 0 even when
//! some files fail. Single mode: `terrace-hcl2json --stdin` prints one tree.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use terrace_runner::{CommandSpec, ExecutionResult, ProcessRunner, RunConfig, RunnerError};

use crate::engine::{path_key, BatchOutcome, EngineKind, HclParser};
use crate::error::{HclError, HclResult};

#[derive(Debug, Deserialize)]
struct MultiResponse {
    #[serde(default)]
    ok: BTreeMap<String, Value>,
    #[serde(default)]
    errors: BTreeMap<String, String>,
}

/// Runs the helper once per batch.
pub struct ExternalParser {
    binary: PathBuf,
    runner: Arc<dyn ProcessRunner>,
    run_config: RunConfig,
}

impl ExternalParser {
    pub fn new(binary: impl Into<PathBuf>, runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            binary: binary.into(),
            runner,
            run_config: RunConfig::default(),
        }
    }

    /// Timeout and cancellation applied to every helper invocation.
    pub fn with_run_config(mut self, run_config: RunConfig) -> Self {
        self.run_config = run_config;
        self
    }

    pub fn binary(&self) -> &PathBuf {
        &self.binary
    }

    async fn invoke(&self, spec: CommandSpec) -> HclResult<ExecutionResult> {
        let result = self
            .runner
            .run(&spec, &self.run_config)
            .await
            .map_err(|e| match e {
                RunnerError::Timeout(seconds) => HclError::Timeout(seconds),
                other => HclError::Runner(other),
            })?;

        if !result.success() {
            return Err(HclError::HelperFailed {
                code: result.exit_code,
                stderr: result.stderr.trim().to_string(),
            });
        }
        Ok(result)
    }
}

#[async_trait]
impl HclParser for ExternalParser {
    fn engine(&self) -> EngineKind {
        EngineKind::External
    }

    async fn parse_batch(&self, paths: &[PathBuf]) -> HclResult<BatchOutcome> {
        if paths.is_empty() {
            return Ok(BatchOutcome::default());
        }

        let spec = CommandSpec::new(self.binary.to_string_lossy())
            .arg("--multi")
            .args(paths.iter().map(|path| path_key(path)));
        debug!("Parsing {} files with {}", paths.len(), self.binary.display());

        let result = self.invoke(spec).await?;
        let response: MultiResponse = serde_json::from_str(&result.stdout)
            .map_err(|e| HclError::InvalidResponse(format!("malformed batch output: {}", e)))?;

        let requested: HashMap<String, &PathBuf> =
            paths.iter().map(|path| (path_key(path), path)).collect();
        let resolve = |key: &str| -> PathBuf {
            match requested.get(key) {
                Some(path) => (*path).clone(),
                None => {
                    warn!("HCL helper reported unrequested path {}", key);
                    PathBuf::from(key)
                }
            }
        };

        let mut outcome = BatchOutcome::default();
        for (key, tree) in response.ok {
            if !tree.is_object() {
                return Err(HclError::InvalidResponse(format!(
                    "tree for {} is not an object",
                    key
                )));
            }
            outcome.ok.insert(resolve(&key), tree);
        }
        for (key, message) in response.errors {
            outcome.errors.insert(resolve(&key), message);
        }

        for path in paths {
            if !outcome.ok.contains_key(path) && !outcome.errors.contains_key(path) {
                outcome
                    .errors
                    .insert(path.clone(), "no result returned by HCL helper".to_string());
            }
        }

        Ok(outcome)
    }

    async fn parse_str(&self, source: &str) -> HclResult<Value> {
        let spec = CommandSpec::new(self.binary.to_string_lossy())
            .arg("--stdin")
            .stdin(source.as_bytes().to_vec());

        let result = self.invoke(spec).await.map_err(|e| match e {
            HclError::HelperFailed { stderr, .. } => HclError::Parse {
                path: PathBuf::from("<stdin>"),
                message: stderr,
            },
            other => other,
        })?;

        let tree: Value = serde_json::from_str(&result.stdout)?;
        if !tree.is_object() {
            return Err(HclError::InvalidResponse("tree is not an object".to_string()));
        }
        Ok(tree)
    }
}
