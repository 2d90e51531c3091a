//! Version command - report what a run would use.

use std::sync::Arc;

use anyhow::Result;
use clap::Args;

use terrace_config::WorkerOptions;
use terrace_hcl::{EngineSelection, ResolvedEngine};
use terrace_iac::TerraformRunner;
use terrace_runner::{ProcessRunner, RunConfig, SystemRunner};

use super::engine_selection;
use crate::ExitCodes;

const VERSION_TIMEOUT_SECONDS: u64 = 30;

#[derive(Args, Debug, Clone)]
pub struct VersionArgs {
    /// terraform binary to report on
    #[arg(long, env = "TERRACE_TERRAFORM_BIN", default_value = "terraform")]
    pub terraform_bin: String,
}

pub async fn execute(args: VersionArgs) -> Result<u8> {
    let runner: Arc<dyn ProcessRunner> = Arc::new(SystemRunner::new());
    let selection = engine_selection(&WorkerOptions::default())?;
    for line in report(&args, runner, &selection).await {
        println!("{}", line);
    }
    Ok(ExitCodes::SUCCESS)
}

/// terrace, terraform and parser lines. A missing terraform or helper is
/// reported, not an error.
async fn report(args: &VersionArgs, runner: Arc<dyn ProcessRunner>, selection: &EngineSelection) -> Vec<String> {
    let mut lines = vec![format!("terrace version {}", env!("CARGO_PKG_VERSION"))];

    let terraform = TerraformRunner::new(runner).with_binary(&args.terraform_bin);
    let config = RunConfig::default().timeout(VERSION_TIMEOUT_SECONDS);
    lines.push(match terraform.version(&config).await {
        Ok(version) => version,
        Err(e) => format!("terraform: {}", e),
    });

    lines.push(match selection.resolve() {
        Ok(ResolvedEngine::External(helper)) => format!("HCL engine: external ({})", helper.display()),
        Ok(ResolvedEngine::Embedded) => "HCL engine: embedded".to_string(),
        Err(e) => format!("HCL engine: {}", e),
    });
    lines
}
