//! Mock process runner for testing.
//!
//! Responses are scripted either by rule (first matching predicate wins) or
//! as a plain sequence used when no rule matches. Every call is captured for
//! later assertions.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use crate::config::{CommandSpec, RunConfig};
use crate::error::{RunnerError, RunnerResult};
use crate::runner::{ExecutionResult, ProcessRunner};

/// Predefined mock response for a process execution.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    /// Really wait this long before answering; cancellation interrupts the wait.
    pub delay_ms: u64,
    /// Answer with a timeout error instead of a result.
    pub timeout: bool,
}

impl MockResponse {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
            duration_ms: 100,
            delay_ms: 0,
            timeout: false,
        }
    }

    pub fn failure(exit_code: i64, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
            duration_ms: 100,
            delay_ms: 0,
            timeout: false,
        }
    }

    pub fn timeout() -> Self {
        Self {
            timeout: true,
            ..Self::success("")
        }
    }

    pub fn with_exit_code(mut self, exit_code: i64) -> Self {
        self.exit_code = exit_code;
        self
    }

    pub fn with_duration(mut self, ms: u64) -> Self {
        self.duration_ms = ms;
        self
    }

    pub fn with_delay(mut self, ms: u64) -> Self {
        self.delay_ms = ms;
        self
    }
}

/// Captured call information for verification.
#[derive(Debug, Clone)]
pub struct CapturedCall {
    pub program: String,
    pub args: Vec<String>,
    pub workdir: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    pub stdin: Option<String>,
}

impl CapturedCall {
    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }

    /// Last path component of the working directory.
    pub fn workdir_name(&self) -> Option<String> {
        self.workdir
            .as_ref()
            .and_then(|dir| dir.file_name())
            .map(|name| name.to_string_lossy().into_owned())
    }
}

type Matcher = Arc<dyn Fn(&CommandSpec) -> bool + Send + Sync>;

#[derive(Clone)]
struct Rule {
    matcher: Matcher,
    response: MockResponse,
}

/// Mock process runner for testing.
#[derive(Clone, Default)]
pub struct MockRunner {
    /// Responses chosen by predicate, checked in insertion order.
    rules: Arc<RwLock<Vec<Rule>>>,
    /// Fallback responses, cycled in order.
    responses: Arc<RwLock<Vec<MockResponse>>>,
    /// Index of next fallback response to return.
    response_index: Arc<AtomicUsize>,
    /// Captured calls for verification.
    captured_calls: Arc<RwLock<Vec<CapturedCall>>>,
    /// Simulated spawn failure.
    simulate_failure: Arc<RwLock<Option<String>>>,
}

impl MockRunner {
    /// Create a new mock runner.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer calls matching `matcher` with `response`.
    pub fn on<F>(self, matcher: F, response: MockResponse) -> Self
    where
        F: Fn(&CommandSpec) -> bool + Send + Sync + 'static,
    {
        self.rules.write().push(Rule {
            matcher: Arc::new(matcher),
            response,
        });
        self
    }

    /// Answer calls carrying every one of `args`.
    pub fn on_args(self, args: &[&str], response: MockResponse) -> Self {
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        self.on(move |spec| args.iter().all(|a| spec.has_arg(a)), response)
    }

    /// Add a fallback response.
    pub fn add_response(self, response: MockResponse) -> Self {
        self.responses.write().push(response);
        self
    }

    /// Set multiple fallback responses.
    pub fn with_responses(self, responses: Vec<MockResponse>) -> Self {
        *self.responses.write() = responses;
        self
    }

    /// Fail every call as if the program could not be started.
    pub fn simulate_failure(self, message: impl Into<String>) -> Self {
        *self.simulate_failure.write() = Some(message.into());
        self
    }

    /// Clear all captured calls.
    pub fn clear_calls(&self) {
        self.captured_calls.write().clear();
    }

    /// Get all captured calls.
    pub fn get_calls(&self) -> Vec<CapturedCall> {
        self.captured_calls.read().clone()
    }

    /// Get the number of calls made.
    pub fn call_count(&self) -> usize {
        self.captured_calls.read().len()
    }

    /// Calls satisfying a predicate, in call order.
    pub fn calls_where<F>(&self, predicate: F) -> Vec<CapturedCall>
    where
        F: Fn(&CapturedCall) -> bool,
    {
        self.captured_calls
            .read()
            .iter()
            .filter(|call| predicate(call))
            .cloned()
            .collect()
    }

    fn record_call(&self, spec: &CommandSpec) {
        self.captured_calls.write().push(CapturedCall {
            program: spec.program.clone(),
            args: spec.args.clone(),
            workdir: spec.workdir.clone(),
            env: spec.env.clone(),
            stdin: spec
                .stdin
                .as_ref()
                .map(|bytes| String::from_utf8_lossy(bytes).into_owned()),
        });
    }

    fn next_response(&self, spec: &CommandSpec) -> MockResponse {
        if let Some(rule) = self.rules.read().iter().find(|rule| (rule.matcher)(spec)) {
            return rule.response.clone();
        }

        let responses = self.responses.read();
        if responses.is_empty() {
            return MockResponse::success("");
        }
        let index = self.response_index.fetch_add(1, Ordering::SeqCst);
        responses
            .get(index % responses.len())
            .cloned()
            .unwrap_or_else(|| MockResponse::success(""))
    }
}

#[async_trait]
impl ProcessRunner for MockRunner {
    async fn run(&self, spec: &CommandSpec, config: &RunConfig) -> RunnerResult<ExecutionResult> {
        if config.cancellation.is_cancelled() {
            return Err(RunnerError::Cancelled);
        }

        self.record_call(spec);

        if let Some(message) = self.simulate_failure.read().clone() {
            return Err(RunnerError::SpawnFailed {
                program: spec.program.clone(),
                message,
            });
        }

        let response = self.next_response(spec);

        if response.delay_ms > 0 {
            tokio::select! {
                () = tokio::time::sleep(Duration::from_millis(response.delay_ms)) => {}
                () = config.cancellation.cancelled() => return Err(RunnerError::Cancelled),
            }
        }

        if response.timeout {
            return Err(RunnerError::Timeout(config.timeout_seconds));
        }

        let started_at = Utc::now();
        let finished_at = started_at + chrono::Duration::milliseconds(response.duration_ms as i64);

        Ok(ExecutionResult {
            command: spec.display(),
            exit_code: response.exit_code,
            stdout: response.stdout,
            stderr: response.stderr,
            started_at,
            finished_at,
            duration_ms: response.duration_ms,
        })
    }
}
