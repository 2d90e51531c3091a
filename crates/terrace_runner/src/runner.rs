//! Process runner trait and types.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{CommandSpec, RunConfig};
use crate::error::RunnerResult;

/// Result of a process that ran to completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Command line as executed, for logs and failure reports
    pub command: String,
    /// Exit code, -1 when terminated by a signal
    pub exit_code: i64,
    /// Captured stdout
    pub stdout: String,
    /// Captured stderr
    pub stderr: String,
    /// Execution start time
    pub started_at: DateTime<Utc>,
    /// Execution end time
    pub finished_at: DateTime<Utc>,
    /// Duration in milliseconds
    pub duration_ms: u64,
}

impl ExecutionResult {
    /// Check if execution was successful (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Get combined output (stdout + stderr).
    pub fn combined_output(&self) -> String {
        if self.stdout.is_empty() {
            self.stderr.clone()
        } else if self.stderr.is_empty() {
            self.stdout.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Process runner trait.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run a process to completion, honouring the timeout and cancellation
    /// token in `config`.
    async fn run(&self, spec: &CommandSpec, config: &RunConfig) -> RunnerResult<ExecutionResult>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(stdout: &str, stderr: &str) -> ExecutionResult {
        let now = Utc::now();
        ExecutionResult {
            command: "true".to_string(),
            exit_code: 0,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            started_at: now,
            finished_at: now,
            duration_ms: 0,
        }
    }

    #[test]
    fn test_combined_output() {
        assert_eq!(result("out", "").combined_output(), "out");
        assert_eq!(result("", "err").combined_output(), "err");
        assert_eq!(result("out", "err").combined_output(), "out\nerr");
    }
}
