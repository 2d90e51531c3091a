//! Data models for the worker configuration.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ConfigError, ConfigResult};
use crate::unique::{self, Named};

/// Name of the single top-level key every configuration document uses.
pub const NAMESPACE: &str = "terraform";

pub const DEFAULT_DEPLOYMENT: &str = "undefined";
pub const DEFAULT_BACKEND_PREFIX: &str = "terraform/state";
pub const DEFAULT_BACKEND_REGION: &str = "us-east-1";
pub const DEFAULT_LOCAL_STATE_DIR: &str = "terraform-state";

/// The document as written on disk: everything sits under `terraform`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigDocument {
    pub terraform: WorkerConfig,
}

/// Root of the worker configuration. Immutable once parsed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkerConfig {
    #[serde(default, deserialize_with = "unique::deserialize")]
    pub providers: IndexMap<String, ProviderDeclaration>,

    /// Global variables offered to every definition that declares them.
    #[serde(default)]
    pub terraform_vars: IndexMap<String, Value>,

    /// Definitions in declaration order. The order breaks ties in the graph.
    #[serde(default, deserialize_with = "unique::deserialize")]
    pub definitions: IndexMap<String, Definition>,

    #[serde(default)]
    pub worker_options: WorkerOptions,
}

impl WorkerConfig {
    pub fn definition(&self, name: &str) -> Option<&Definition> {
        self.definitions.get(name)
    }

    /// Definition names in declaration order.
    pub fn definition_names(&self) -> Vec<&str> {
        self.definitions.keys().map(String::as_str).collect()
    }

    /// Resolve a `--limit` selection against the declared definitions.
    ///
    /// An empty selection means every definition. The result keeps
    /// declaration order regardless of the order names were given in.
    pub fn select(&self, limit: &[String]) -> ConfigResult<Vec<String>> {
        if limit.is_empty() {
            return Ok(self.definitions.keys().cloned().collect());
        }

        let wanted: HashSet<&str> = limit.iter().map(String::as_str).collect();
        if let Some(unknown) = wanted.iter().find(|name| !self.definitions.contains_key(**name)) {
            return Err(ConfigError::UnknownDefinition(unknown.to_string()));
        }

        Ok(self
            .definitions
            .keys()
            .filter(|name| wanted.contains(name.as_str()))
            .cloned()
            .collect())
    }

    /// Backend coordinates with defaults applied.
    ///
    /// `base_dir` anchors a relative local state path.
    pub fn backend(&self, base_dir: &Path) -> BackendConfig {
        self.worker_options.backend_config(base_dir)
    }
}

/// Version requirement and source of a provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderRequirements {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// A provider declared at the top of the configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderDeclaration {
    #[serde(skip)]
    pub name: String,

    #[serde(default)]
    pub requirements: ProviderRequirements,

    /// Attributes written into the provider block.
    #[serde(default)]
    pub vars: IndexMap<String, Value>,

    /// Nested blocks written inside the provider block, keyed by block type.
    #[serde(default)]
    pub config_blocks: IndexMap<String, Value>,

    /// Additional aliased instances of this provider.
    #[serde(default)]
    pub aliases: IndexMap<String, ProviderAlias>,
}

impl ProviderDeclaration {
    /// A declaration with only a requirement, as synthesized from a module.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.requirements.version = Some(version.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.requirements.source = Some(source.into());
        self
    }

    pub fn with_var(mut self, key: impl Into<String>, value: Value) -> Self {
        self.vars.insert(key.into(), value);
        self
    }

    /// Source address, defaulting to the `hashicorp` namespace.
    pub fn source_or_default(&self) -> String {
        self.requirements
            .source
            .clone()
            .unwrap_or_else(|| default_provider_source(&self.name))
    }
}

impl Named for ProviderDeclaration {
    fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }
}

/// Source address terraform assumes for a provider without an explicit one.
pub fn default_provider_source(name: &str) -> String {
    format!("hashicorp/{}", name)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderAlias {
    #[serde(default)]
    pub vars: IndexMap<String, Value>,
    #[serde(default)]
    pub config_blocks: IndexMap<String, Value>,
}

/// One unit of infrastructure: a module plus its variable wiring.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Definition {
    #[serde(skip)]
    pub name: String,

    /// Module location, a filesystem path or a remote module address.
    pub path: String,

    /// Local overrides, applied on top of global variables.
    #[serde(default)]
    pub terraform_vars: IndexMap<String, Value>,

    /// Local variable name to `"<definition>.<output>"`.
    #[serde(default)]
    pub remote_vars: IndexMap<String, String>,
}

impl Definition {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_var(mut self, key: impl Into<String>, value: Value) -> Self {
        self.terraform_vars.insert(key.into(), value);
        self
    }

    pub fn with_remote_var(mut self, key: impl Into<String>, reference: impl Into<String>) -> Self {
        self.remote_vars.insert(key.into(), reference.into());
        self
    }

    /// Parsed remote bindings in declaration order.
    pub fn bindings(&self) -> ConfigResult<Vec<RemoteBinding>> {
        self.remote_vars
            .iter()
            .map(|(variable, reference)| RemoteBinding::parse(&self.name, variable, reference))
            .collect()
    }

    /// Where the module lives.
    pub fn source(&self) -> ModuleSource {
        ModuleSource::classify(&self.path)
    }
}

impl Named for Definition {
    fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }
}

/// Module location as understood by discovery and the renderer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleSource {
    Local(PathBuf),
    /// Fetched by terraform itself; not inspected.
    Remote(String),
}

impl ModuleSource {
    const REMOTE_PREFIXES: [&'static str; 6] = [
        "git@",
        "http://",
        "https://",
        "github.com/",
        "bitbucket.org/",
        "s3::",
    ];

    pub fn classify(path: &str) -> Self {
        let remote = path.contains("::")
            || Self::REMOTE_PREFIXES
                .iter()
                .any(|prefix| path.starts_with(prefix));
        if remote {
            ModuleSource::Remote(path.to_string())
        } else {
            ModuleSource::Local(PathBuf::from(path))
        }
    }

    /// Absolute location for local modules, the address otherwise.
    pub fn resolve(&self, base_dir: &Path) -> String {
        match self {
            ModuleSource::Local(path) if path.is_absolute() => path.display().to_string(),
            ModuleSource::Local(path) => base_dir.join(path).display().to_string(),
            ModuleSource::Remote(address) => address.clone(),
        }
    }
}

/// A variable fed from another definition's output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteBinding {
    pub variable: String,
    pub source_definition: String,
    pub output: String,
}

impl RemoteBinding {
    /// Parse `"<definition>.<output>"` as written in `remote_vars`.
    pub fn parse(definition: &str, variable: &str, reference: &str) -> ConfigResult<Self> {
        let invalid = |reason: &str| ConfigError::InvalidBinding {
            definition: definition.to_string(),
            variable: variable.to_string(),
            reason: reason.to_string(),
        };

        let (source, output) = reference
            .split_once('.')
            .ok_or_else(|| invalid("expected '<definition>.<output>'"))?;

        let source = source.trim();
        let output = output.trim();
        if source.is_empty() {
            return Err(invalid("source definition is empty"));
        }
        if output.is_empty() {
            return Err(invalid("output name is empty"));
        }

        Ok(Self {
            variable: variable.to_string(),
            source_definition: source.to_string(),
            output: output.to_string(),
        })
    }
}

impl fmt::Display for RemoteBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <- {}.{}", self.variable, self.source_definition, self.output)
    }
}

/// State backend type; a closed set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    S3,
    Gcs,
    #[default]
    Local,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::S3 => "s3",
            BackendKind::Gcs => "gcs",
            BackendKind::Local => "local",
        }
    }

    pub fn requires_bucket(&self) -> bool {
        matches!(self, BackendKind::S3 | BackendKind::Gcs)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "s3" => Ok(BackendKind::S3),
            "gcs" => Ok(BackendKind::Gcs),
            "local" => Ok(BackendKind::Local),
            other => Err(ConfigError::ValidationFailed(format!(
                "unknown backend type '{}' (expected s3, gcs or local)",
                other
            ))),
        }
    }
}

/// Parser engine requested in the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParserEngine {
    External,
    Embedded,
}

/// Run-wide options. Every field may be overridden from the command line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct WorkerOptions {
    pub backend: BackendKind,
    pub backend_bucket: Option<String>,
    pub backend_prefix: String,
    pub backend_region: String,
    /// Root directory of local state files.
    pub backend_path: Option<PathBuf>,
    /// Lock table for the s3 backend, `terraform-<deployment>` when unset.
    pub lock_table: Option<String>,
    pub deployment: String,
    pub terraform_bin: Option<PathBuf>,
    pub parser_engine: Option<ParserEngine>,
    pub parser_bin: Option<PathBuf>,
    /// Base directory for relative module paths; the config file's directory when unset.
    pub repository_path: Option<PathBuf>,
    pub timeout_seconds: Option<u64>,
    pub parallelism: Option<usize>,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            backend_bucket: None,
            backend_prefix: DEFAULT_BACKEND_PREFIX.to_string(),
            backend_region: DEFAULT_BACKEND_REGION.to_string(),
            backend_path: None,
            lock_table: None,
            deployment: DEFAULT_DEPLOYMENT.to_string(),
            terraform_bin: None,
            parser_engine: None,
            parser_bin: None,
            repository_path: None,
            timeout_seconds: None,
            parallelism: None,
        }
    }
}

impl WorkerOptions {
    pub fn backend_config(&self, base_dir: &Path) -> BackendConfig {
        let path = match &self.backend_path {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => base_dir.join(path),
            None => base_dir.join(DEFAULT_LOCAL_STATE_DIR),
        };

        BackendConfig {
            kind: self.backend,
            bucket: self.backend_bucket.clone(),
            prefix: self.backend_prefix.trim_matches('/').to_string(),
            region: self.backend_region.clone(),
            lock_table: self
                .lock_table
                .clone()
                .unwrap_or_else(|| format!("terraform-{}", self.deployment)),
            path,
            deployment: self.deployment.clone(),
        }
    }
}

/// Resolved backend parameters shared by every definition of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendConfig {
    pub kind: BackendKind,
    pub bucket: Option<String>,
    pub prefix: String,
    pub region: String,
    pub lock_table: String,
    pub path: PathBuf,
    pub deployment: String,
}

impl BackendConfig {
    /// State key of a definition. Distinct names give distinct keys.
    pub fn state_key(&self, definition: &str) -> String {
        let scoped = if self.prefix.is_empty() {
            definition.to_string()
        } else {
            format!("{}/{}", self.prefix, definition)
        };

        match self.kind {
            BackendKind::Gcs => scoped,
            BackendKind::S3 | BackendKind::Local => format!("{}/terraform.tfstate", scoped),
        }
    }
}
