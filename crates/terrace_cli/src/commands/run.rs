//! Plan, apply and destroy commands.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use tracing::{info, warn};

use terrace_config::WorkerOptions;
use terrace_core::{Pipeline, PipelineOptions, RecordStatus, RunAction, RunReport};
use terrace_runner::{ProcessRunner, SystemRunner};

use super::{absolute, build_parser, ConfigArgs, CredentialArgs};
use crate::ExitCodes;

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    #[command(flatten)]
    pub credentials: CredentialArgs,

    /// Directory the run directory is created in (kept after the run)
    #[arg(short, long, env = "TERRACE_WORKING_DIR")]
    pub working_dir: Option<PathBuf>,

    /// Keep the temporary run directory
    #[arg(long)]
    pub keep_workspace: bool,

    /// Definitions run at the same time within a layer
    #[arg(long, env = "TERRACE_PARALLELISM")]
    pub parallelism: Option<usize>,

    /// Seconds before a terraform command is killed
    #[arg(long, env = "TERRACE_TIMEOUT")]
    pub timeout: Option<u64>,

    /// Log terraform output line by line while it runs
    #[arg(long)]
    pub stream_output: bool,
}

impl RunArgs {
    fn apply(&self, options: &mut WorkerOptions) {
        if let Some(parallelism) = self.parallelism {
            options.parallelism = Some(parallelism);
        }
        if let Some(timeout) = self.timeout {
            options.timeout_seconds = Some(timeout);
        }
    }

    fn pipeline_options(&self) -> Result<PipelineOptions> {
        let working_dir = match &self.working_dir {
            Some(dir) => Some(absolute(dir)?),
            None => None,
        };
        Ok(PipelineOptions {
            limit: self.config.limit.clone(),
            working_dir,
            keep_workspace: self.keep_workspace,
            stream_logs: self.stream_output,
        })
    }
}

pub async fn execute(args: RunArgs, action: RunAction) -> Result<u8> {
    let mut loaded = args.config.load()?;
    args.apply(&mut loaded.config.worker_options);
    let base_dir = loaded.base_dir();
    let options = loaded.config.worker_options.clone();

    info!("{} of {} ({})", action, loaded.path.display(), options.deployment);

    let runner: Arc<dyn ProcessRunner> = Arc::new(SystemRunner::new());
    let parser = build_parser(&options, runner.clone())?;
    let credentials = args.credentials.provider(&options, runner.clone());

    let pipeline = Pipeline::new(runner, parser, credentials).with_options(args.pipeline_options()?);

    let cancellation = pipeline.cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, no further definitions will start");
            cancellation.cancel();
        }
    });

    let prepared = pipeline.prepare(loaded.config, base_dir).await?;
    let report = pipeline.execute(&prepared, action).await?;

    print_report(&report);

    if report.is_success() {
        Ok(ExitCodes::SUCCESS)
    } else {
        Ok(ExitCodes::DEFINITIONS_FAILED)
    }
}

fn print_report(report: &RunReport) {
    println!();
    println!("📋 {} {} ({})", report.action, report.deployment, report.run_id);

    for record in &report.records {
        match record.status {
            RecordStatus::Succeeded => {
                let changes = match record.changes {
                    Some(true) => " (changes)",
                    Some(false) => " (no changes)",
                    None => "",
                };
                let duration = record
                    .duration_ms()
                    .map(|ms| format!(" in {:.1}s", ms as f64 / 1000.0))
                    .unwrap_or_default();
                println!("   ✅ {}{}{}", record.definition, changes, duration);
            }
            RecordStatus::Failed => println!("   ❌ {}", record.definition),
            RecordStatus::Skipped => println!(
                "   ⏭️  {} skipped: {}",
                record.definition,
                record.skip_reason.as_deref().unwrap_or("not run")
            ),
            other => println!("   ⚠️  {} left {}", record.definition, other),
        }
    }

    for failure in report.failures() {
        eprintln!();
        eprintln!("❌ {}", failure);
    }

    println!();
    match &report.retained {
        Some(path) => println!("📁 Run directory kept at {}", path.display()),
        None => println!("📁 Run directory {} removed", report.workspace.display()),
    }

    let succeeded = report.count(RecordStatus::Succeeded);
    if report.is_success() {
        println!("✅ {} definition(s) succeeded", succeeded);
    } else {
        println!(
            "❌ {} succeeded, {} failed, {} skipped",
            succeeded,
            report.count(RecordStatus::Failed),
            report.count(RecordStatus::Skipped)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    use crate::commands::{Cli, Commands};

    fn run_args(argv: &[&str]) -> RunArgs {
        let cli = Cli::try_parse_from(argv).unwrap();
        match cli.command {
            Commands::Plan(args) | Commands::Apply(args) | Commands::Destroy(args) => args,
            _ => panic!("expected a run command"),
        }
    }

    #[test]
    fn test_run_flags_override_worker_options() {
        let args = run_args(&["terrace", "apply", "--parallelism", "8", "--timeout", "900"]);
        let mut options = WorkerOptions {
            parallelism: Some(2),
            ..WorkerOptions::default()
        };
        args.apply(&mut options);
        assert_eq!(options.parallelism, Some(8));
        assert_eq!(options.timeout_seconds, Some(900));

        let args = run_args(&["terrace", "plan"]);
        let mut options = WorkerOptions {
            parallelism: Some(2),
            ..WorkerOptions::default()
        };
        args.apply(&mut options);
        assert_eq!(options.parallelism, Some(2));
    }

    #[test]
    fn test_working_dir_is_made_absolute() {
        let args = run_args(&["terrace", "plan", "-w", "work", "--limit", "dns", "--stream-output"]);
        let options = args.pipeline_options().unwrap();
        let working_dir = options.working_dir.unwrap();
        assert!(working_dir.is_absolute());
        assert_eq!(working_dir, std::env::current_dir().unwrap().join("work"));
        assert_eq!(options.limit, vec!["dns"]);
        assert!(options.stream_logs);

        let args = run_args(&["terrace", "plan"]);
        assert!(args.pipeline_options().unwrap().working_dir.is_none());
    }

    #[test]
    fn test_role_and_external_id() {
        let args = run_args(&[
            "terrace",
            "destroy",
            "--aws-role-arn",
            "arn:aws:iam::123456789012:role/deployer",
            "--aws-external-id",
            "shared-secret",
        ]);
        assert_eq!(
            args.credentials.aws_role_arn.as_deref(),
            Some("arn:aws:iam::123456789012:role/deployer")
        );
        assert_eq!(args.credentials.aws_external_id.as_deref(), Some("shared-secret"));
    }
}
