//! Validate command - check a worker configuration without running terraform.

use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use tracing::info;

use terrace_config::ConfigValidator;
use terrace_core::{DependencyGraph, Pipeline, PipelineOptions, RunAction};
use terrace_iac::AmbientCredentials;
use terrace_runner::{ProcessRunner, SystemRunner};

use super::{build_parser, ConfigArgs};
use crate::ExitCodes;

#[derive(Args, Debug, Clone)]
pub struct ValidateArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Only check the document; do not read the modules
    #[arg(long)]
    pub skip_modules: bool,
}

pub async fn execute(args: ValidateArgs) -> Result<u8> {
    let loaded = args.config.load()?;
    info!("Validating {}", loaded.path.display());

    println!("📋 Validating configuration...");
    let result = ConfigValidator::validate(&loaded.config);
    for warning in &result.warnings {
        println!("   ⚠️  {}", warning);
    }
    if !result.valid {
        println!("   ❌ Configuration is invalid:");
        for error in &result.errors {
            println!("      - {}", error);
        }
        return Ok(ExitCodes::CONFIG_ERROR);
    }
    println!("   ✅ {} definition(s), {} provider(s)", loaded.config.definitions.len(), loaded.config.providers.len());

    if let Err(e) = DependencyGraph::build(&loaded.config.definitions) {
        println!("   ❌ {}", e);
        return Ok(ExitCodes::CONFIG_ERROR);
    }

    if args.skip_modules {
        return Ok(ExitCodes::SUCCESS);
    }

    println!("🔍 Reading modules...");
    let options = &loaded.config.worker_options;
    let runner: Arc<dyn ProcessRunner> = Arc::new(SystemRunner::new());
    let parser = build_parser(options, runner.clone())?;
    let pipeline = Pipeline::new(runner, parser, Arc::new(AmbientCredentials::from_env())).with_options(
        PipelineOptions {
            limit: args.config.limit.clone(),
            ..PipelineOptions::default()
        },
    );

    let base_dir = loaded.base_dir();
    let prepared = pipeline.prepare(loaded.config, base_dir).await?;

    println!("   ✅ Execution order:");
    for (index, layer) in prepared.layers(RunAction::Apply).iter().enumerate() {
        println!("      {}. {}", index + 1, layer.join(", "));
    }

    for name in &prepared.selection {
        if prepared.discovery_failures.contains_key(name) {
            continue;
        }
        let providers = prepared.providers.provider_names(name);
        if providers.is_empty() {
            println!("      {}: no providers", name);
        } else {
            println!("      {}: {}", name, providers.join(", "));
        }
    }

    for unused in prepared.providers.unused_globals() {
        println!("   ⚠️  Provider '{}' is not required by any module", unused);
    }

    if prepared.discovery_failures.is_empty() {
        println!("✅ Configuration is valid");
        Ok(ExitCodes::SUCCESS)
    } else {
        println!("   ❌ Modules that could not be read:");
        for (name, message) in &prepared.discovery_failures {
            println!("      - {}: {}", name, message);
        }
        Ok(ExitCodes::DEFINITIONS_FAILED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;

    fn config_args(path: &Path) -> ConfigArgs {
        ConfigArgs {
            config: path.to_path_buf(),
            backend: None,
            backend_bucket: None,
            backend_prefix: None,
            backend_region: None,
            backend_path: None,
            lock_table: None,
            deployment: None,
            terraform_bin: None,
            repository_path: None,
            limit: Vec::new(),
        }
    }

    fn write_repo(root: &Path, database_vars: &str) -> std::path::PathBuf {
        fs::create_dir_all(root.join("modules/network")).unwrap();
        fs::create_dir_all(root.join("modules/database")).unwrap();
        fs::write(
            root.join("modules/network/main.tf"),
            "output \"vpc_id\" {\n  value = \"vpc-123\"\n}\n",
        )
        .unwrap();
        fs::write(
            root.join("modules/database/main.tf"),
            "variable \"vpc_id\" {}\n",
        )
        .unwrap();

        let path = root.join("worker.yaml");
        fs::write(
            &path,
            format!(
                "terraform:\n  definitions:\n    network:\n      path: modules/network\n    database:\n      path: modules/database\n      remote_vars:\n{}\n  worker_options:\n    parser_engine: embedded\n",
                database_vars
            ),
        )
        .unwrap();
        path
    }

    #[tokio::test]
    async fn test_valid_configuration() {
        let temp = tempfile::tempdir().unwrap();
        let path = write_repo(temp.path(), "        vpc_id: network.vpc_id");

        let code = execute(ValidateArgs {
            config: config_args(&path),
            skip_modules: false,
        })
        .await
        .unwrap();
        assert_eq!(code, ExitCodes::SUCCESS);
    }

    #[tokio::test]
    async fn test_unknown_source_is_a_configuration_error() {
        let temp = tempfile::tempdir().unwrap();
        let path = write_repo(temp.path(), "        vpc_id: dns.vpc_id");

        let code = execute(ValidateArgs {
            config: config_args(&path),
            skip_modules: true,
        })
        .await
        .unwrap();
        assert_eq!(code, ExitCodes::CONFIG_ERROR);
    }
}
