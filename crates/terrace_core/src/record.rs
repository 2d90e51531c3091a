//! Per-definition execution records.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use terrace_iac::OutputMap;

use crate::error::{CoreError, CoreResult};

/// Where a definition is in its lifecycle.
///
/// `Pending -> Running -> {Succeeded | Failed}` or `Pending -> Skipped`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl RecordStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        write!(f, "{}", s)
    }
}

/// Category of a localized failure.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The module's files could not be parsed
    Parse,
    /// The workspace could not be rendered
    Render,
    /// A bound output was not produced by its source
    MissingOutput,
    /// terraform failed, timed out or was cancelled
    Execution,
    /// State backend or credentials failure, including lock contention
    Backend,
    /// A hook script was not executable or exited non-zero
    Hook,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Parse => "parse error",
            Self::Render => "render error",
            Self::MissingOutput => "missing output",
            Self::Execution => "execution error",
            Self::Backend => "backend error",
            Self::Hook => "hook error",
        };
        write!(f, "{}", s)
    }
}

/// What went wrong with one definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailureReport {
    pub definition: String,
    pub kind: FailureKind,
    pub message: String,
    /// Error output of the tool, when a tool ran
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_output: Option<String>,
    /// Rendered directory of the definition, when one was allocated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<PathBuf>,
}

impl FailureReport {
    pub fn new(definition: impl Into<String>, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            definition: definition.into(),
            kind,
            message: message.into(),
            tool_output: None,
            workspace: None,
        }
    }

    pub fn with_tool_output(mut self, output: impl Into<String>) -> Self {
        let output = output.into();
        if !output.trim().is_empty() {
            self.tool_output = Some(output);
        }
        self
    }

    pub fn with_workspace(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workspace = Some(dir.into());
        self
    }
}

impl fmt::Display for FailureReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.definition, self.kind, self.message)?;
        if let Some(dir) = &self.workspace {
            write!(f, "\n  workspace: {}", dir.display())?;
        }
        if let Some(output) = &self.tool_output {
            write!(f, "\n  output:")?;
            for line in output.trim_end().lines() {
                write!(f, "\n    {}", line)?;
            }
        }
        Ok(())
    }
}

/// State of one definition within a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionRecord {
    pub definition: String,
    pub status: RecordStatus,
    /// Outputs captured after a successful apply
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<OutputMap>,
    /// Whether the plan reported pending changes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changes: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReport>,
    /// Why the definition did not run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ExecutionRecord {
    pub fn new(definition: impl Into<String>) -> Self {
        Self {
            definition: definition.into(),
            status: RecordStatus::Pending,
            outputs: None,
            changes: None,
            failure: None,
            skip_reason: None,
            started_at: None,
            finished_at: None,
        }
    }

    fn transition(&mut self, from: RecordStatus, to: RecordStatus) -> CoreResult<()> {
        if self.status != from {
            return Err(CoreError::InvalidState(format!(
                "'{}' cannot move from {} to {}",
                self.definition, self.status, to
            )));
        }
        debug!("'{}': {} -> {}", self.definition, self.status, to);
        self.status = to;
        Ok(())
    }

    pub fn start(&mut self) -> CoreResult<()> {
        self.transition(RecordStatus::Pending, RecordStatus::Running)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    pub fn succeed(&mut self, outputs: Option<OutputMap>, changes: Option<bool>) -> CoreResult<()> {
        self.transition(RecordStatus::Running, RecordStatus::Succeeded)?;
        self.outputs = outputs;
        self.changes = changes;
        self.finished_at = Some(Utc::now());
        info!("Definition '{}' succeeded", self.definition);
        Ok(())
    }

    pub fn fail(&mut self, report: FailureReport) -> CoreResult<()> {
        self.transition(RecordStatus::Running, RecordStatus::Failed)?;
        warn!("Definition '{}' failed: {}", self.definition, report.message);
        self.failure = Some(report);
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    pub fn skip(&mut self, reason: impl Into<String>) -> CoreResult<()> {
        self.transition(RecordStatus::Pending, RecordStatus::Skipped)?;
        let reason = reason.into();
        warn!("Definition '{}' skipped: {}", self.definition, reason);
        self.skip_reason = Some(reason);
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Outputs usable by dependents; only a succeeded record has them.
    pub fn captured_outputs(&self) -> Option<&OutputMap> {
        match self.status {
            RecordStatus::Succeeded => self.outputs.as_ref(),
            _ => None,
        }
    }

    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }
}

/// Records of every definition in a run, in execution order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RecordBook {
    records: IndexMap<String, ExecutionRecord>,
}

impl RecordBook {
    /// A pending record for each name.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let records = names
            .into_iter()
            .map(|name| {
                let name = name.into();
                (name.clone(), ExecutionRecord::new(name))
            })
            .collect();
        Self { records }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.records.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&ExecutionRecord> {
        self.records.get(name)
    }

    fn record_mut(&mut self, name: &str) -> CoreResult<&mut ExecutionRecord> {
        self.records
            .get_mut(name)
            .ok_or_else(|| CoreError::InvalidState(format!("no record for '{}'", name)))
    }

    pub fn start(&mut self, name: &str) -> CoreResult<()> {
        self.record_mut(name)?.start()
    }

    pub fn succeed(&mut self, name: &str, outputs: Option<OutputMap>, changes: Option<bool>) -> CoreResult<()> {
        self.record_mut(name)?.succeed(outputs, changes)
    }

    pub fn fail(&mut self, name: &str, report: FailureReport) -> CoreResult<()> {
        self.record_mut(name)?.fail(report)
    }

    pub fn skip(&mut self, name: &str, reason: impl Into<String>) -> CoreResult<()> {
        self.record_mut(name)?.skip(reason)
    }

    /// Status of a definition in this run, `None` when it is not part of it.
    pub fn status(&self, name: &str) -> Option<RecordStatus> {
        self.records.get(name).map(|record| record.status)
    }

    /// Captured outputs of a succeeded definition.
    pub fn outputs(&self, name: &str) -> Option<&OutputMap> {
        self.records.get(name).and_then(ExecutionRecord::captured_outputs)
    }

    /// The first of `names` that failed or was skipped, with a reason.
    pub fn blocker<'a>(&self, names: &'a [String]) -> Option<(&'a str, RecordStatus)> {
        names.iter().find_map(|name| match self.status(name) {
            Some(status @ (RecordStatus::Failed | RecordStatus::Skipped)) => Some((name.as_str(), status)),
            _ => None,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExecutionRecord> {
        self.records.values()
    }

    pub fn count(&self, status: RecordStatus) -> usize {
        self.records.values().filter(|record| record.status == status).count()
    }

    pub fn into_records(self) -> Vec<ExecutionRecord> {
        self.records.into_values().collect()
    }
}
