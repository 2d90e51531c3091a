//! Process runner backed by `tokio::process`.

use std::env;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::config::{CommandSpec, RunConfig};
use crate::error::{RunnerError, RunnerResult};
use crate::runner::{ExecutionResult, ProcessRunner};

/// Output line from a running process.
#[derive(Debug, Clone)]
pub struct LogLine {
    pub timestamp: chrono::DateTime<Utc>,
    pub label: Option<String>,
    pub stream: LogStream,
    pub message: String,
}

/// Log stream type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    Stdout,
    Stderr,
}

impl std::fmt::Display for LogStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdout => write!(f, "stdout"),
            Self::Stderr => write!(f, "stderr"),
        }
    }
}

/// Log handler callback type.
pub type LogHandler = Arc<dyn Fn(LogLine) + Send + Sync>;

/// Runs processes on the host.
#[derive(Default, Clone)]
pub struct SystemRunner {
    log_handler: Option<LogHandler>,
}

enum Outcome {
    Exited(std::io::Result<std::process::ExitStatus>, String, String),
    TimedOut,
    Cancelled,
}

impl SystemRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a handler receiving streamed lines in addition to the log.
    pub fn with_log_handler(mut self, handler: LogHandler) -> Self {
        self.log_handler = Some(handler);
        self
    }

    async fn drain<R>(&self, reader: Option<R>, stream: LogStream, config: &RunConfig) -> String
    where
        R: AsyncRead + Unpin,
    {
        let Some(mut reader) = reader else {
            return String::new();
        };

        if !config.stream_logs {
            let mut buf = Vec::new();
            if let Err(e) = reader.read_to_end(&mut buf).await {
                warn!("Failed to read {}: {}", stream, e);
            }
            return String::from_utf8_lossy(&buf).into_owned();
        }

        let mut output = String::new();
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    match &config.label {
                        Some(label) => info!("[{}] {}", label, line),
                        None => info!("{}", line),
                    }
                    if let Some(handler) = &self.log_handler {
                        handler(LogLine {
                            timestamp: Utc::now(),
                            label: config.label.clone(),
                            stream,
                            message: line.clone(),
                        });
                    }
                    output.push_str(&line);
                    output.push('\n');
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Failed to read {}: {}", stream, e);
                    break;
                }
            }
        }
        output
    }
}

async fn deadline(seconds: u64) {
    if seconds == 0 {
        std::future::pending::<()>().await
    } else {
        tokio::time::sleep(Duration::from_secs(seconds)).await
    }
}

/// Ask the process to stop, killing it if it outlives the grace period.
async fn terminate(child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            // SAFETY: `pid` is our own child and has not been reaped yet.
            let sent = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) } == 0;
            if sent && tokio::time::timeout(grace, child.wait()).await.is_ok() {
                return;
            }
            warn!("Process {} ignored SIGTERM for {}s, killing", pid, grace.as_secs());
        }
    }
    #[cfg(not(unix))]
    let _ = grace;

    let _ = child.kill().await;
}

#[async_trait]
impl ProcessRunner for SystemRunner {
    async fn run(&self, spec: &CommandSpec, config: &RunConfig) -> RunnerResult<ExecutionResult> {
        let command_line = spec.display();
        debug!("Executing: {}", command_line);

        if config.cancellation.is_cancelled() {
            return Err(RunnerError::Cancelled);
        }

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(&spec.env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);
        if let Some(dir) = &spec.workdir {
            command.current_dir(dir);
        }

        let started_at = Utc::now();
        let mut child = command.spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => RunnerError::NotFound(spec.program.clone()),
            _ => RunnerError::SpawnFailed {
                program: spec.program.clone(),
                message: e.to_string(),
            },
        })?;

        let stdin_task = match (spec.stdin.clone(), child.stdin.take()) {
            (Some(input), Some(mut stdin)) => Some(tokio::spawn(async move {
                let _ = stdin.write_all(&input).await;
            })),
            _ => None,
        };

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let outcome = tokio::select! {
            (status, out, err) = async {
                tokio::join!(
                    child.wait(),
                    self.drain(stdout, LogStream::Stdout, config),
                    self.drain(stderr, LogStream::Stderr, config),
                )
            } => Outcome::Exited(status, out, err),
            () = deadline(config.timeout_seconds) => Outcome::TimedOut,
            () = config.cancellation.cancelled() => Outcome::Cancelled,
        };

        if let Some(task) = stdin_task {
            task.abort();
        }

        let (status, stdout, stderr) = match outcome {
            Outcome::Exited(status, stdout, stderr) => (status, stdout, stderr),
            Outcome::TimedOut => {
                let _ = child.kill().await;
                warn!("{} timed out after {}s", command_line, config.timeout_seconds);
                return Err(RunnerError::Timeout(config.timeout_seconds));
            }
            Outcome::Cancelled => {
                info!("Cancelling {}", command_line);
                terminate(&mut child, Duration::from_secs(config.grace_period_seconds)).await;
                return Err(RunnerError::Cancelled);
            }
        };

        let status = status.map_err(|e| {
            RunnerError::ExecutionFailed(format!("Failed to wait for {}: {}", spec.program, e))
        })?;
        let finished_at = Utc::now();
        let duration_ms = (finished_at - started_at).num_milliseconds().max(0) as u64;
        let exit_code = status.code().unwrap_or(-1) as i64;

        debug!("{} exited with {} after {}ms", command_line, exit_code, duration_ms);

        Ok(ExecutionResult {
            command: command_line,
            exit_code,
            stdout,
            stderr,
            started_at,
            finished_at,
            duration_ms,
        })
    }
}

/// Locate an executable by name on a search path.
///
/// `search_path` uses the platform `PATH` syntax; `None` reads `PATH` from the
/// environment. A name containing a path separator is checked as given.
pub fn find_executable(name: &str, search_path: Option<&OsStr>) -> Option<PathBuf> {
    let candidate = Path::new(name);
    if candidate.components().count() > 1 {
        return is_executable(candidate).then(|| candidate.to_path_buf());
    }

    let path_var = match search_path {
        Some(path) => path.to_os_string(),
        None => env::var_os("PATH")?,
    };

    env::split_paths(&path_var)
        .map(|dir| dir.join(name))
        .find(|path| is_executable(path))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
