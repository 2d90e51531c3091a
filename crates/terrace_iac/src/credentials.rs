//! Cloud credentials handed to terraform.

use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use terrace_runner::{CommandSpec, ProcessRunner, RunConfig, RunnerError};

use crate::error::{IacError, IacResult};

pub const ACCESS_KEY_ENV: &str = "AWS_ACCESS_KEY_ID";
pub const SECRET_KEY_ENV: &str = "AWS_SECRET_ACCESS_KEY";
pub const SESSION_TOKEN_ENV: &str = "AWS_SESSION_TOKEN";

/// A set of AWS credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
    pub expiration: Option<DateTime<Utc>>,
}

impl Credentials {
    /// Environment variables carrying these credentials.
    pub fn to_env(&self) -> BTreeMap<String, String> {
        let mut vars = BTreeMap::new();
        vars.insert(ACCESS_KEY_ENV.to_string(), self.access_key_id.clone());
        vars.insert(SECRET_KEY_ENV.to_string(), self.secret_access_key.clone());
        if let Some(token) = &self.session_token {
            vars.insert(SESSION_TOKEN_ENV.to_string(), token.clone());
        }
        vars
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .field("expiration", &self.expiration)
            .finish()
    }
}

/// Source of credentials for backend and tool invocations.
///
/// `None` means terraform resolves credentials on its own.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn credentials(&self) -> IacResult<Option<Credentials>>;
}

/// Credentials already present in the environment.
#[derive(Debug, Clone, Default)]
pub struct AmbientCredentials {
    credentials: Option<Credentials>,
}

impl AmbientCredentials {
    pub fn new(credentials: Option<Credentials>) -> Self {
        Self { credentials }
    }

    /// Snapshot of the `AWS_*` variables. Missing keys give no credentials.
    pub fn from_env() -> Self {
        let read = |key: &str| env::var(key).ok().filter(|value| !value.is_empty());
        let credentials = match (read(ACCESS_KEY_ENV), read(SECRET_KEY_ENV)) {
            (Some(access_key_id), Some(secret_access_key)) => Some(Credentials {
                access_key_id,
                secret_access_key,
                session_token: read(SESSION_TOKEN_ENV),
                expiration: None,
            }),
            _ => None,
        };
        Self { credentials }
    }
}

#[async_trait]
impl CredentialProvider for AmbientCredentials {
    async fn credentials(&self) -> IacResult<Option<Credentials>> {
        Ok(self.credentials.clone())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AssumeRoleResponse {
    credentials: AssumedCredentials,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AssumedCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: String,
    expiration: Option<String>,
}

/// Derives short-lived credentials by assuming a role with the AWS CLI.
///
/// The role is assumed once; every later call returns the same credentials.
pub struct AssumeRoleProvider {
    runner: Arc<dyn ProcessRunner>,
    base: Arc<dyn CredentialProvider>,
    role_arn: String,
    external_id: Option<String>,
    session_name: String,
    duration_seconds: u64,
    region: Option<String>,
    aws_binary: String,
    run_config: RunConfig,
    assumed: OnceCell<Credentials>,
}

impl AssumeRoleProvider {
    pub fn new(
        runner: Arc<dyn ProcessRunner>,
        base: Arc<dyn CredentialProvider>,
        role_arn: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            base,
            role_arn: role_arn.into(),
            external_id: None,
            session_name: "terrace".to_string(),
            duration_seconds: 3600,
            region: None,
            aws_binary: "aws".to_string(),
            run_config: RunConfig::default().timeout(60),
            assumed: OnceCell::new(),
        }
    }

    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }

    pub fn with_session_name(mut self, name: impl Into<String>) -> Self {
        self.session_name = name.into();
        self
    }

    pub fn with_duration(mut self, seconds: u64) -> Self {
        self.duration_seconds = seconds;
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_aws_binary(mut self, binary: impl Into<String>) -> Self {
        self.aws_binary = binary.into();
        self
    }

    pub fn with_run_config(mut self, config: RunConfig) -> Self {
        self.run_config = config;
        self
    }

    async fn assume(&self) -> IacResult<Credentials> {
        let mut spec = CommandSpec::new(&self.aws_binary)
            .args(["sts", "assume-role", "--output", "json"])
            .arg("--role-arn")
            .arg(&self.role_arn)
            .arg("--role-session-name")
            .arg(&self.session_name)
            .arg("--duration-seconds")
            .arg(self.duration_seconds.to_string());
        if let Some(external_id) = &self.external_id {
            spec = spec.arg("--external-id").arg(external_id);
        }
        if let Some(region) = &self.region {
            spec = spec.env("AWS_REGION", region);
        }
        if let Some(base) = self.base.credentials().await? {
            spec = spec.envs(base.to_env());
        }

        debug!("Assuming role {}", self.role_arn);
        let result = self.runner.run(&spec, &self.run_config).await.map_err(|e| match e {
            RunnerError::NotFound(program) => {
                IacError::Credentials(format!("{} was not found; it is needed to assume a role", program))
            }
            other => IacError::Credentials(other.to_string()),
        })?;

        if !result.success() {
            return Err(IacError::Credentials(format!(
                "assuming {} failed: {}",
                self.role_arn,
                result.stderr.trim()
            )));
        }

        let response: AssumeRoleResponse = serde_json::from_str(&result.stdout)
            .map_err(|e| IacError::Credentials(format!("unexpected assume-role response: {}", e)))?;
        let expiration = response
            .credentials
            .expiration
            .as_deref()
            .and_then(|text| DateTime::parse_from_rfc3339(text).ok())
            .map(|time| time.with_timezone(&Utc));

        info!("Assumed role {}", self.role_arn);
        Ok(Credentials {
            access_key_id: response.credentials.access_key_id,
            secret_access_key: response.credentials.secret_access_key,
            session_token: Some(response.credentials.session_token),
            expiration,
        })
    }
}

#[async_trait]
impl CredentialProvider for AssumeRoleProvider {
    async fn credentials(&self) -> IacResult<Option<Credentials>> {
        let credentials = self.assumed.get_or_try_init(|| self.assume()).await?;
        Ok(Some(credentials.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use terrace_runner::{MockResponse, MockRunner};

    const RESPONSE: &str = r#"{
  "Credentials": {
    "AccessKeyId": "ASIAEXAMPLE",
    "SecretAccessKey": "secret",
    "SessionToken": "token",
    "Expiration": "2026-10-19T12:00:00Z"
  },
  "AssumedRoleUser": {"Arn": "arn:aws:sts::123456789012:assumed-role/deploy/terrace"}
}"#;

    fn base_credentials() -> Credentials {
        Credentials {
            access_key_id: "AKIABASE".to_string(),
            secret_access_key: "base-secret".to_string(),
            session_token: None,
            expiration: None,
        }
    }

    #[tokio::test]
    async fn test_assume_role_once() {
        let mock = MockRunner::new().add_response(MockResponse::success(RESPONSE));
        let mut base = MockCredentialProvider::new();
        base.expect_credentials()
            .times(1)
            .returning(|| Ok(Some(base_credentials())));

        let provider = AssumeRoleProvider::new(
            Arc::new(mock.clone()),
            Arc::new(base),
            "arn:aws:iam::123456789012:role/deploy",
        )
        .with_external_id("shared-secret")
        .with_region("us-west-2");

        let first = provider.credentials().await.unwrap().unwrap();
        let second = provider.credentials().await.unwrap().unwrap();
        assert_eq!(first, second);
        assert_eq!(first.access_key_id, "ASIAEXAMPLE");
        assert_eq!(first.session_token.as_deref(), Some("token"));
        assert!(first.expiration.is_some());

        let calls = mock.get_calls();
        assert_eq!(calls.len(), 1);
        let call = &calls[0];
        assert_eq!(call.program, "aws");
        assert!(call.has_arg("assume-role"));
        assert!(call.has_arg("shared-secret"));
        assert_eq!(call.env.get(ACCESS_KEY_ENV).map(String::as_str), Some("AKIABASE"));
        assert_eq!(call.env.get("AWS_REGION").map(String::as_str), Some("us-west-2"));
    }

    #[tokio::test]
    async fn test_assume_role_failure() {
        let mock = MockRunner::new().add_response(MockResponse::failure(254, "AccessDenied"));
        let mut base = MockCredentialProvider::new();
        base.expect_credentials().returning(|| Ok(None));

        let provider = AssumeRoleProvider::new(Arc::new(mock), Arc::new(base), "arn:aws:iam::1:role/x");
        let err = provider.credentials().await.unwrap_err();
        assert!(matches!(err, IacError::Credentials(ref message) if message.contains("AccessDenied")));
    }

    #[test]
    fn test_env_and_redaction() {
        let mut credentials = base_credentials();
        credentials.session_token = Some("token".to_string());

        let vars = credentials.to_env();
        assert_eq!(vars.len(), 3);
        assert_eq!(vars[SESSION_TOKEN_ENV], "token");

        let debug = format!("{:?}", credentials);
        assert!(!debug.contains("base-secret"));
        assert!(!debug.contains("\"token\""));
    }

    #[tokio::test]
    async fn test_ambient_credentials() {
        let provider = AmbientCredentials::new(Some(base_credentials()));
        assert_eq!(provider.credentials().await.unwrap(), Some(base_credentials()));
        assert_eq!(AmbientCredentials::default().credentials().await.unwrap(), None);
    }
}
