//! Process invocation types.

use std::collections::BTreeMap;
use std::path::PathBuf;

use tokio_util::sync::CancellationToken;

/// A process to run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    /// Program name or path
    pub program: String,
    /// Arguments
    pub args: Vec<String>,
    /// Working directory
    pub workdir: Option<PathBuf>,
    /// Variables added to the inherited environment
    pub env: BTreeMap<String, String>,
    /// Bytes written to stdin, which is closed afterwards
    pub stdin: Option<Vec<u8>>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn envs(mut self, vars: impl IntoIterator<Item = (String, String)>) -> Self {
        self.env.extend(vars);
        self
    }

    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Whether an argument equal to `arg` is present.
    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }

    /// Command line for logging. Environment values are never printed.
    pub fn display(&self) -> String {
        let mut cmd = self.program.clone();
        for arg in &self.args {
            if arg.contains(' ') || arg.contains('=') {
                cmd.push_str(&format!(" '{}'", arg));
            } else {
                cmd.push_str(&format!(" {}", arg));
            }
        }
        cmd
    }
}

/// Run configuration with timeouts and cancellation.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Timeout in seconds (0 = no timeout)
    pub timeout_seconds: u64,
    /// Seconds between SIGTERM and kill on cancellation
    pub grace_period_seconds: u64,
    /// Whether to forward output lines to the log as they arrive
    pub stream_logs: bool,
    /// Label attached to streamed lines, usually the definition name
    pub label: Option<String>,
    /// Run-level cancellation
    pub cancellation: CancellationToken,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 0,
            grace_period_seconds: 10,
            stream_logs: false,
            label: None,
            cancellation: CancellationToken::new(),
        }
    }
}

impl RunConfig {
    pub fn timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    pub fn grace_period(mut self, seconds: u64) -> Self {
        self.grace_period_seconds = seconds;
        self
    }

    /// Enable or disable log streaming.
    pub fn stream_logs(mut self, enabled: bool) -> Self {
        self.stream_logs = enabled;
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_spec_builder() {
        let spec = CommandSpec::new("terraform")
            .arg("plan")
            .args(["-input=false", "-out", "plan file"])
            .workdir("/work")
            .env("TF_IN_AUTOMATION", "1");

        assert_eq!(spec.args.len(), 4);
        assert!(spec.has_arg("plan"));
        assert_eq!(spec.workdir, Some(PathBuf::from("/work")));
        assert_eq!(spec.env.get("TF_IN_AUTOMATION").map(String::as_str), Some("1"));
        assert_eq!(
            spec.display(),
            "terraform plan '-input=false' -out 'plan file'"
        );
    }

    #[test]
    fn test_run_config_defaults() {
        let config = RunConfig::default().timeout(30).label("network");
        assert_eq!(config.timeout_seconds, 30);
        assert_eq!(config.label.as_deref(), Some("network"));
        assert!(!config.cancellation.is_cancelled());
    }
}
