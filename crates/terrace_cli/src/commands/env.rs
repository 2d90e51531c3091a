//! Env command - print the credentials terraform would run with.
//!
//! The output is meant for `eval`, so rendered definitions can be worked on
//! by hand (`terraform import`, `terraform state mv`) with the same identity
//! a run uses.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use tracing::info;

use terrace_iac::hooks::shell_quote;
use terrace_runner::{ProcessRunner, SystemRunner};

use super::{ConfigArgs, CredentialArgs};
use crate::ExitCodes;

#[derive(Args, Debug, Clone)]
pub struct EnvArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    #[command(flatten)]
    pub credentials: CredentialArgs,
}

pub async fn execute(args: EnvArgs) -> Result<u8> {
    let loaded = args.config.load()?;
    let options = &loaded.config.worker_options;

    let runner: Arc<dyn ProcessRunner> = Arc::new(SystemRunner::new());
    let provider = args.credentials.provider(options, runner);
    let vars = provider
        .credentials()
        .await?
        .map(|credentials| credentials.to_env())
        .unwrap_or_default();

    if vars.is_empty() {
        info!("No credentials found, terraform falls back to its own lookup");
    }
    print!("{}", exports(&vars));
    Ok(ExitCodes::SUCCESS)
}

/// One `export KEY=value` line per variable.
fn exports(vars: &BTreeMap<String, String>) -> String {
    vars.iter()
        .map(|(key, value)| format!("export {}={}\n", key, shell_quote(value)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    use crate::commands::{Cli, Commands};

    #[test]
    fn test_exports_are_quoted_and_sorted() {
        let mut vars = BTreeMap::new();
        vars.insert("AWS_SESSION_TOKEN".to_string(), "IQo+b3/x==".to_string());
        vars.insert("AWS_ACCESS_KEY_ID".to_string(), "ASIAEXAMPLE".to_string());
        vars.insert("AWS_SECRET_ACCESS_KEY".to_string(), "it's secret".to_string());

        assert_eq!(
            exports(&vars),
            concat!(
                "export AWS_ACCESS_KEY_ID=ASIAEXAMPLE\n",
                "export AWS_SECRET_ACCESS_KEY='it'\"'\"'s secret'\n",
                "export AWS_SESSION_TOKEN=IQo+b3/x==\n",
            )
        );
        assert_eq!(exports(&BTreeMap::new()), "");
    }

    #[test]
    fn test_env_takes_config_and_role() {
        let cli = Cli::try_parse_from([
            "terrace",
            "env",
            "--config",
            "deploy/worker.yaml",
            "--aws-role-arn",
            "arn:aws:iam::123456789012:role/deployer",
        ])
        .unwrap();
        let Commands::Env(args) = cli.command else {
            panic!("expected env");
        };
        assert_eq!(args.config.config.to_str(), Some("deploy/worker.yaml"));
        assert!(args.credentials.aws_role_arn.is_some());
        assert!(args.credentials.aws_external_id.is_none());
    }

    #[tokio::test]
    async fn test_env_without_config_fails() {
        let temp = tempfile::tempdir().unwrap();
        let cli = Cli::try_parse_from([
            "terrace",
            "env",
            "--config",
            temp.path().join("absent.yaml").to_str().unwrap(),
        ])
        .unwrap();
        let Commands::Env(args) = cli.command else {
            panic!("expected env");
        };
        assert!(execute(args).await.is_err());
    }
}
