//! CLI command definitions.
//!
//! Every option that mirrors a `worker_options` key can also come from a
//! `TERRACE_*` environment variable. Precedence: flag, environment, document,
//! default.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::debug;

use terrace_config::{BackendKind, ConfigReader, LoadedConfig, ParserEngine, WorkerOptions};
use terrace_hcl::{EngineKind, EngineSelection, HclParser};
use terrace_iac::{AmbientCredentials, AssumeRoleProvider, CredentialProvider};
use terrace_runner::{ProcessRunner, RunConfig};

pub mod env;
pub mod run;
pub mod validate;
pub mod version;

/// terrace - orchestrate terraform definitions that feed each other
#[derive(Parser)]
#[command(name = "terrace")]
#[command(version, about = "Orchestrate terraform definitions that feed each other's outputs")]
#[command(long_about = r#"
terrace runs a set of terraform modules ("definitions") in dependency order,
wiring the outputs of one definition into the variables of another.

COMMANDS:
  plan      → init + plan every definition, nothing is changed
  apply     → plan and apply in dependency order
  destroy   → destroy in reverse dependency order
  validate  → check the configuration, modules and providers
  env       → print the credentials terraform would run with, as exports
  version   → print the terrace, terraform and parser versions

EXIT CODES:
  0 - Success
  1 - General error
  2 - Invalid arguments
  3 - Configuration, graph or provider failure
  4 - One or more definitions failed or were skipped
"#)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Emit log lines as JSON objects
    #[arg(long, global = true, env = "TERRACE_LOG_JSON")]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Plan every definition without changing anything
    Plan(run::RunArgs),

    /// Apply definitions in dependency order
    Apply(run::RunArgs),

    /// Destroy definitions, dependents first
    Destroy(run::RunArgs),

    /// Validate the configuration and print the execution order
    Validate(validate::ValidateArgs),

    /// Print `export` lines for the credentials terraform would run with
    Env(env::EnvArgs),

    /// Print the terrace, terraform and parser versions
    Version(version::VersionArgs),
}

/// How terraform authenticates against AWS.
#[derive(Args, Debug, Clone, Default)]
pub struct CredentialArgs {
    /// Role to assume before running terraform
    #[arg(long, env = "TERRACE_AWS_ROLE_ARN")]
    pub aws_role_arn: Option<String>,

    /// External id presented when assuming the role
    #[arg(long, env = "TERRACE_AWS_EXTERNAL_ID", requires = "aws_role_arn")]
    pub aws_external_id: Option<String>,
}

impl CredentialArgs {
    /// Ambient credentials, or a role assumed with them.
    pub fn provider(&self, options: &WorkerOptions, runner: Arc<dyn ProcessRunner>) -> Arc<dyn CredentialProvider> {
        let ambient: Arc<dyn CredentialProvider> = Arc::new(AmbientCredentials::from_env());
        let Some(role_arn) = &self.aws_role_arn else {
            return ambient;
        };

        let mut provider = AssumeRoleProvider::new(runner, ambient, role_arn)
            .with_session_name(format!("terrace-{}", options.deployment))
            .with_region(options.backend_region.clone());
        if let Some(external_id) = &self.aws_external_id {
            provider = provider.with_external_id(external_id);
        }
        Arc::new(provider)
    }
}

/// Where the configuration lives and which of its options to override.
#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// Worker configuration file (YAML, JSON or HCL)
    #[arg(short, long, env = "TERRACE_CONFIG", default_value = "worker.yaml")]
    pub config: PathBuf,

    /// State backend: s3, gcs or local
    #[arg(long, env = "TERRACE_BACKEND")]
    pub backend: Option<String>,

    /// Bucket holding state (s3, gcs)
    #[arg(long, env = "TERRACE_BACKEND_BUCKET")]
    pub backend_bucket: Option<String>,

    /// Prefix of every state key
    #[arg(long, env = "TERRACE_BACKEND_PREFIX")]
    pub backend_prefix: Option<String>,

    /// Region of the state bucket
    #[arg(long, env = "TERRACE_BACKEND_REGION")]
    pub backend_region: Option<String>,

    /// Root directory of local state
    #[arg(long, env = "TERRACE_BACKEND_PATH")]
    pub backend_path: Option<PathBuf>,

    /// Lock table of the s3 backend
    #[arg(long, env = "TERRACE_LOCK_TABLE")]
    pub lock_table: Option<String>,

    /// Deployment name, used for the lock table and the run log
    #[arg(long, env = "TERRACE_DEPLOYMENT")]
    pub deployment: Option<String>,

    /// terraform binary to run
    #[arg(long, env = "TERRACE_TERRAFORM_BIN")]
    pub terraform_bin: Option<PathBuf>,

    /// Directory module paths are relative to
    #[arg(long, env = "TERRACE_REPOSITORY_PATH")]
    pub repository_path: Option<PathBuf>,

    /// Only run these definitions (repeatable or comma separated)
    #[arg(long, value_name = "DEFINITION", value_delimiter = ',')]
    pub limit: Vec<String>,
}

impl ConfigArgs {
    /// Read the configuration and apply the overrides.
    pub fn load(&self) -> Result<LoadedConfig> {
        let mut loaded = ConfigReader::from_path(&self.config)
            .with_context(|| format!("Failed to load configuration {}", self.config.display()))?;
        self.apply(&mut loaded.config.worker_options)?;
        Ok(loaded)
    }

    pub fn apply(&self, options: &mut WorkerOptions) -> Result<()> {
        if let Some(backend) = &self.backend {
            options.backend = backend.parse::<BackendKind>()?;
        }
        if let Some(bucket) = &self.backend_bucket {
            options.backend_bucket = Some(bucket.clone());
        }
        if let Some(prefix) = &self.backend_prefix {
            options.backend_prefix = prefix.clone();
        }
        if let Some(region) = &self.backend_region {
            options.backend_region = region.clone();
        }
        if let Some(path) = &self.backend_path {
            options.backend_path = Some(absolute(path)?);
        }
        if let Some(table) = &self.lock_table {
            options.lock_table = Some(table.clone());
        }
        if let Some(deployment) = &self.deployment {
            options.deployment = deployment.clone();
        }
        if let Some(binary) = &self.terraform_bin {
            options.terraform_bin = Some(binary.clone());
        }
        if let Some(path) = &self.repository_path {
            options.repository_path = Some(absolute(path)?);
        }
        debug!("Effective worker options: {:?}", options);
        Ok(())
    }
}

/// Paths given on the command line are relative to where terrace runs.
pub(crate) fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

/// Engine selection: `TERRACE_HCL_*` variables first, then the document.
pub fn engine_selection(options: &WorkerOptions) -> Result<EngineSelection> {
    let mut selection = EngineSelection::from_env()?;
    if selection.override_binary.is_none() {
        if let Some(binary) = &options.parser_bin {
            selection = selection.with_override_binary(binary);
        }
    }
    if selection.force.is_none() {
        if let Some(engine) = options.parser_engine {
            selection = selection.with_force(match engine {
                ParserEngine::External => EngineKind::External,
                ParserEngine::Embedded => EngineKind::Embedded,
            });
        }
    }
    Ok(selection)
}

/// Resolve the parser once for the whole run.
pub fn build_parser(options: &WorkerOptions, runner: Arc<dyn ProcessRunner>) -> Result<Arc<dyn HclParser>> {
    let mut run_config = RunConfig::default();
    if let Some(timeout) = options.timeout_seconds {
        run_config = run_config.timeout(timeout);
    }
    Ok(engine_selection(options)?.build(runner, run_config)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_flags() {
        let cli = Cli::try_parse_from([
            "terrace",
            "apply",
            "--config",
            "deploy/worker.hcl",
            "--backend",
            "s3",
            "--backend-bucket",
            "example-terraform-states",
            "--limit",
            "network,database",
            "--limit",
            "dns",
            "--keep-workspace",
            "--parallelism",
            "2",
            "-v",
        ])
        .unwrap();

        assert!(cli.verbose);
        let Commands::Apply(args) = cli.command else {
            panic!("expected apply");
        };
        assert_eq!(args.config.config, PathBuf::from("deploy/worker.hcl"));
        assert_eq!(args.config.limit, vec!["network", "database", "dns"]);
        assert!(args.keep_workspace);
        assert_eq!(args.parallelism, Some(2));
    }

    #[test]
    fn test_verbose_and_quiet_conflict() {
        assert!(Cli::try_parse_from(["terrace", "plan", "-v", "-q"]).is_err());
    }

    #[test]
    fn test_external_id_requires_role() {
        let result = Cli::try_parse_from(["terrace", "apply", "--aws-external-id", "shared-secret"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_overrides_replace_document_values() {
        let cli = Cli::try_parse_from([
            "terrace",
            "destroy",
            "--backend",
            "gcs",
            "--backend-bucket",
            "states",
            "--backend-prefix",
            "platform",
            "--deployment",
            "blue",
            "--backend-path",
            "/var/lib/terrace",
        ])
        .unwrap();
        let Commands::Destroy(args) = cli.command else {
            panic!("expected destroy");
        };

        let mut options = WorkerOptions {
            backend_bucket: Some("from-document".to_string()),
            backend_region: "eu-west-1".to_string(),
            ..WorkerOptions::default()
        };
        args.config.apply(&mut options).unwrap();

        assert_eq!(options.backend, BackendKind::Gcs);
        assert_eq!(options.backend_bucket.as_deref(), Some("states"));
        assert_eq!(options.backend_prefix, "platform");
        assert_eq!(options.deployment, "blue");
        assert_eq!(options.backend_path, Some(PathBuf::from("/var/lib/terrace")));
        // Untouched keys keep the document's value.
        assert_eq!(options.backend_region, "eu-west-1");
    }

    #[test]
    fn test_unknown_backend_is_rejected() {
        let cli = Cli::try_parse_from(["terrace", "plan", "--backend", "consul"]).unwrap();
        let Commands::Plan(args) = cli.command else {
            panic!("expected plan");
        };
        assert!(args.config.apply(&mut WorkerOptions::default()).is_err());
    }

    #[test]
    fn test_load_reads_and_overrides() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("worker.yaml");
        std::fs::write(
            &path,
            "terraform:\n  definitions:\n    network:\n      path: modules/network\n  worker_options:\n    deployment: green\n",
        )
        .unwrap();

        let args = ConfigArgs {
            config: path,
            backend: None,
            backend_bucket: None,
            backend_prefix: None,
            backend_region: None,
            backend_path: None,
            lock_table: None,
            deployment: Some("blue".to_string()),
            terraform_bin: None,
            repository_path: None,
            limit: Vec::new(),
        };
        let loaded = args.load().unwrap();
        assert_eq!(loaded.config.worker_options.deployment, "blue");
        assert!(loaded.config.definition("network").is_some());

        let missing = ConfigArgs {
            config: temp.path().join("absent.yaml"),
            ..args
        };
        assert!(missing.load().is_err());
    }
}
