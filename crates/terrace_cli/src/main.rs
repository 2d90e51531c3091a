//! terrace CLI - Main entry point.
//!
//! Exit codes:
//! - 0: Success
//! - 1: General error
//! - 2: Invalid arguments
//! - 3: Configuration, graph or provider reconciliation failure
//! - 4: One or more definitions failed or were skipped

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use terrace_config::ConfigError;
use terrace_core::CoreError;
use terrace_hcl::HclError;
use terrace_iac::IacError;

mod commands;

use commands::{Cli, Commands};
use terrace_core::RunAction;

/// CI-friendly exit codes
pub struct ExitCodes;

impl ExitCodes {
    pub const SUCCESS: u8 = 0;
    pub const GENERAL_ERROR: u8 = 1;
    pub const INVALID_ARGS: u8 = 2;
    pub const CONFIG_ERROR: u8 = 3;
    pub const DEFINITIONS_FAILED: u8 = 4;
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,terrace={}", level)));
    let _ = tracing_subscriber::registry()
        .with(cli.log_json.then(|| fmt::layer().json()))
        .with((!cli.log_json).then(|| fmt::layer().with_target(false)))
        .with(filter)
        .try_init();

    let result = match cli.command {
        Commands::Plan(args) => commands::run::execute(args, RunAction::Plan).await,
        Commands::Apply(args) => commands::run::execute(args, RunAction::Apply).await,
        Commands::Destroy(args) => commands::run::execute(args, RunAction::Destroy).await,
        Commands::Validate(args) => commands::validate::execute(args).await,
        Commands::Env(args) => commands::env::execute(args).await,
        Commands::Version(args) => commands::version::execute(args).await,
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("❌ Error: {:#}", e);
            ExitCode::from(categorize_error(&e))
        }
    }
}

/// Categorize error to determine exit code
fn categorize_error(e: &anyhow::Error) -> u8 {
    if let Some(core) = e.downcast_ref::<CoreError>() {
        return match core {
            CoreError::Iac(IacError::InvalidWorkspace(_)) => ExitCodes::INVALID_ARGS,
            core if core.is_configuration() => ExitCodes::CONFIG_ERROR,
            _ => ExitCodes::GENERAL_ERROR,
        };
    }

    if e.downcast_ref::<ConfigError>().is_some() || e.downcast_ref::<HclError>().is_some() {
        return ExitCodes::CONFIG_ERROR;
    }

    ExitCodes::GENERAL_ERROR
}
