//! Configuration validation.
//!
//! Validation collects every problem it finds instead of stopping at the
//! first, so the operator can fix a document in one pass.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use crate::constraint::VersionConstraint;
use crate::error::{ConfigError, ConfigResult};
use crate::models::{Definition, ProviderDeclaration, WorkerConfig};

/// Validation result with details.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn add_error(&mut self, message: impl Into<String>) {
        self.valid = false;
        self.errors.push(message.into());
    }

    pub fn add_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn merge(&mut self, other: ValidationResult) {
        if !other.valid {
            self.valid = false;
        }
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }
}

fn identifier() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_-]*$").expect("identifier pattern is valid"))
}

/// Validator for worker configurations.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate a whole configuration.
    pub fn validate(config: &WorkerConfig) -> ValidationResult {
        let mut result = ValidationResult::new();

        if config.definitions.is_empty() {
            result.add_warning("No definitions declared; nothing will run");
        }

        for provider in config.providers.values() {
            result.merge(Self::validate_provider(provider));
        }

        for key in config.terraform_vars.keys() {
            if !identifier().is_match(key) {
                result.add_error(format!("Global variable '{}' is not a valid identifier", key));
            }
        }

        for definition in config.definitions.values() {
            result.merge(Self::validate_definition(definition));
        }

        result.merge(Self::validate_worker_options(config));

        debug!(
            "Validated configuration: {} errors, {} warnings",
            result.errors.len(),
            result.warnings.len()
        );
        result
    }

    /// Validate and turn any error into a [`ConfigError`].
    pub fn ensure_valid(config: &WorkerConfig) -> ConfigResult<ValidationResult> {
        let result = Self::validate(config);
        if result.valid {
            Ok(result)
        } else {
            Err(ConfigError::ValidationFailed(result.errors.join("; ")))
        }
    }

    pub fn validate_provider(provider: &ProviderDeclaration) -> ValidationResult {
        let mut result = ValidationResult::new();

        if !identifier().is_match(&provider.name) {
            result.add_error(format!("Provider name '{}' is not a valid identifier", provider.name));
        }

        if let Some(version) = &provider.requirements.version {
            match VersionConstraint::parse(version) {
                Ok(constraint) if !constraint.is_satisfiable() => result.add_error(format!(
                    "Provider '{}' version constraint '{}' can never be satisfied",
                    provider.name, version
                )),
                Ok(_) => {}
                Err(e) => result.add_error(format!("Provider '{}': {}", provider.name, e)),
            }
        }

        if let Some(source) = &provider.requirements.source {
            if source.trim().is_empty() {
                result.add_error(format!("Provider '{}' has an empty source", provider.name));
            }
        }

        for alias in provider.aliases.keys() {
            if !identifier().is_match(alias) {
                result.add_error(format!(
                    "Provider '{}' alias '{}' is not a valid identifier",
                    provider.name, alias
                ));
            }
        }

        result
    }

    pub fn validate_definition(definition: &Definition) -> ValidationResult {
        let mut result = ValidationResult::new();

        if !identifier().is_match(&definition.name) {
            result.add_error(format!(
                "Definition name '{}' must start with a letter or underscore and contain only letters, digits, '_' or '-'",
                definition.name
            ));
        }

        if definition.path.trim().is_empty() {
            result.add_error(format!("Definition '{}' has an empty path", definition.name));
        }

        for key in definition.terraform_vars.keys() {
            if definition.remote_vars.contains_key(key) {
                result.add_warning(format!(
                    "Definition '{}' sets '{}' both locally and remotely; the remote value wins",
                    definition.name, key
                ));
            }
        }

        match definition.bindings() {
            Ok(bindings) => {
                for binding in bindings {
                    if binding.source_definition == definition.name {
                        result.add_error(format!(
                            "Definition '{}' binds '{}' to its own output '{}'",
                            definition.name, binding.variable, binding.output
                        ));
                    }
                }
            }
            Err(e) => result.add_error(e.to_string()),
        }

        result
    }

    fn validate_worker_options(config: &WorkerConfig) -> ValidationResult {
        let mut result = ValidationResult::new();
        let options = &config.worker_options;

        if options.backend.requires_bucket()
            && options
                .backend_bucket
                .as_deref()
                .map_or(true, |bucket| bucket.trim().is_empty())
        {
            result.add_error(format!(
                "Backend '{}' requires backend_bucket",
                options.backend
            ));
        }

        if options.deployment.trim().is_empty() {
            result.add_error("Deployment name must not be empty");
        }

        if options.timeout_seconds == Some(0) {
            result.add_error("timeout_seconds must be greater than zero");
        }

        if options.parallelism == Some(0) {
            result.add_error("parallelism must be greater than zero");
        }

        // State keys are derived from names; two names mapping to one key
        // would make two definitions share state.
        let backend = config.backend(std::path::Path::new("."));
        let mut keys: HashMap<String, &str> = HashMap::new();
        for name in config.definitions.keys() {
            let key = backend.state_key(name);
            if let Some(other) = keys.insert(key.clone(), name) {
                result.add_error(format!(
                    "Definitions '{}' and '{}' share state key '{}'",
                    other, name, key
                ));
            }
        }

        result
    }
}
