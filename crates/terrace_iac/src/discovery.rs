//! Module interface discovery.
//!
//! Only the parts of a module the orchestration needs are read: provider
//! requirements from `terraform { required_providers { ... } }`, the names of
//! declared variables and the declared outputs. Everything else in the module
//! body stays opaque.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use terrace_config::{Definition, ModuleSource};
use terrace_hcl::tree::labeled_blocks;
use terrace_hcl::HclParser;

use crate::error::{IacError, IacResult};

/// A provider a module asks for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredProvider {
    pub name: String,
    pub source: Option<String>,
    /// Every constraint written for the provider, joined with `, `
    pub constraint: Option<String>,
    /// Aliased configurations the module expects to be handed
    pub configuration_aliases: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleOutput {
    pub name: String,
    pub sensitive: bool,
}

/// What a module declares at its boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleInterface {
    pub providers: IndexMap<String, DiscoveredProvider>,
    pub variables: Vec<String>,
    pub outputs: Vec<ModuleOutput>,
    /// False for remote modules, whose files are never read
    pub inspected: bool,
}

impl Default for ModuleInterface {
    fn default() -> Self {
        Self {
            providers: IndexMap::new(),
            variables: Vec::new(),
            outputs: Vec::new(),
            inspected: true,
        }
    }
}

impl ModuleInterface {
    /// Interface of a module that cannot be inspected.
    pub fn opaque() -> Self {
        Self {
            inspected: false,
            ..Self::default()
        }
    }

    pub fn declares_variable(&self, name: &str) -> bool {
        self.variables.iter().any(|v| v == name)
    }

    pub fn declares_output(&self, name: &str) -> bool {
        self.outputs.iter().any(|o| o.name == name)
    }

    /// Fold one parsed file into the interface.
    pub fn absorb(&mut self, definition: &str, tree: &Value) -> IacResult<()> {
        for (_, terraform) in labeled_blocks(tree, "terraform") {
            for (_, required) in labeled_blocks(terraform, "required_providers") {
                if let Value::Object(entries) = required {
                    for (name, requirement) in entries {
                        self.add_requirement(definition, name, requirement)?;
                    }
                }
            }
        }

        for (name, _) in labeled_blocks(tree, "variable") {
            if !name.is_empty() && !self.declares_variable(&name) {
                self.variables.push(name);
            }
        }

        for (name, body) in labeled_blocks(tree, "output") {
            if name.is_empty() || self.declares_output(&name) {
                continue;
            }
            let sensitive = match body.get("sensitive") {
                None | Some(Value::Null) => false,
                Some(Value::Bool(flag)) => *flag,
                Some(Value::String(text)) if text == "true" || text == "false" => text == "true",
                Some(other) => {
                    // Only known when terraform evaluates it.
                    warn!(
                        "Output '{}' of '{}' has a non-literal sensitive flag {}, treating it as sensitive",
                        name, definition, other
                    );
                    true
                }
            };
            self.outputs.push(ModuleOutput { name, sensitive });
        }

        Ok(())
    }

    fn add_requirement(&mut self, definition: &str, name: &str, requirement: &Value) -> IacResult<()> {
        let (source, constraint, aliases) = match requirement {
            Value::Object(fields) => (
                fields.get("source").and_then(Value::as_str),
                fields.get("version").and_then(Value::as_str),
                fields
                    .get("configuration_aliases")
                    .and_then(Value::as_array)
                    .map(|items| {
                        items
                            .iter()
                            .filter_map(Value::as_str)
                            .filter_map(|reference| alias_name(name, reference))
                            .collect::<Vec<String>>()
                    })
                    .unwrap_or_default(),
            ),
            // Pre-0.13 shorthand: `aws = "~> 2.0"`
            Value::String(version) => (None, Some(version.as_str()), Vec::new()),
            other => {
                warn!(
                    "Ignoring requirement for provider '{}' in '{}': unexpected value {}",
                    name, definition, other
                );
                return Ok(());
            }
        };

        let entry = self
            .providers
            .entry(name.to_string())
            .or_insert_with(|| DiscoveredProvider {
                name: name.to_string(),
                source: None,
                constraint: None,
                configuration_aliases: Vec::new(),
            });

        for alias in aliases {
            if !entry.configuration_aliases.contains(&alias) {
                entry.configuration_aliases.push(alias);
            }
        }

        if let Some(source) = source {
            match &entry.source {
                Some(existing) if existing != source => {
                    return Err(IacError::Discovery {
                        definition: definition.to_string(),
                        message: format!(
                            "provider '{}' is required from both '{}' and '{}'",
                            name, existing, source
                        ),
                    });
                }
                Some(_) => {}
                None => entry.source = Some(source.to_string()),
            }
        }

        if let Some(constraint) = constraint.map(str::trim).filter(|c| !c.is_empty()) {
            entry.constraint = Some(match entry.constraint.take() {
                Some(existing) => format!("{}, {}", existing, constraint),
                None => constraint.to_string(),
            });
        }

        Ok(())
    }
}

/// Alias part of a `configuration_aliases` entry: `${aws.east}` gives `east`.
fn alias_name(provider: &str, reference: &str) -> Option<String> {
    let reference = reference
        .trim()
        .trim_start_matches("${")
        .trim_end_matches('}');
    reference
        .strip_prefix(provider)
        .and_then(|rest| rest.strip_prefix('.'))
        .filter(|alias| !alias.is_empty())
        .map(str::to_string)
}

/// Reads module interfaces through the run's parser engine.
#[derive(Clone)]
pub struct ModuleDiscovery {
    parser: Arc<dyn HclParser>,
}

impl ModuleDiscovery {
    pub fn new(parser: Arc<dyn HclParser>) -> Self {
        Self { parser }
    }

    /// Terraform files at the top of a module directory, sorted by name.
    ///
    /// Terraform only loads the module root, so subdirectories are not read.
    pub fn module_files(dir: &Path) -> IacResult<Vec<PathBuf>> {
        let mut files: Vec<PathBuf> = WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_file())
            .map(|e| e.into_path())
            .filter(|path| path.extension().map_or(false, |ext| ext == "tf"))
            .collect();
        files.sort();
        Ok(files)
    }

    /// Discover the interface of a definition's module.
    ///
    /// Remote modules are not inspected. Any parse failure is reported for the
    /// definition as a whole.
    pub async fn discover(&self, definition: &Definition, base_dir: &Path) -> IacResult<ModuleInterface> {
        let dir = match definition.source() {
            ModuleSource::Remote(address) => {
                debug!("Module of '{}' is remote ({}), not inspected", definition.name, address);
                return Ok(ModuleInterface::opaque());
            }
            ModuleSource::Local(path) if path.is_absolute() => path,
            ModuleSource::Local(path) => base_dir.join(path),
        };

        let failed = |message: String| IacError::Discovery {
            definition: definition.name.clone(),
            message,
        };

        if !dir.is_dir() {
            return Err(failed(format!("module directory {} does not exist", dir.display())));
        }

        let files = Self::module_files(&dir)?;
        if files.is_empty() {
            return Err(failed(format!("no .tf files in {}", dir.display())));
        }

        debug!(
            "Parsing {} file(s) of '{}' with the {} engine",
            files.len(),
            definition.name,
            self.parser.engine()
        );
        let outcome = self
            .parser
            .parse_batch(&files)
            .await
            .map_err(|e| failed(e.to_string()))?;

        if !outcome.is_clean() {
            let message = outcome
                .errors
                .iter()
                .map(|(path, error)| format!("{}: {}", path.display(), error))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(failed(message));
        }

        let mut interface = ModuleInterface::default();
        for file in &files {
            if let Some(tree) = outcome.ok.get(file) {
                interface.absorb(&definition.name, tree)?;
            }
        }

        info!(
            "Discovered '{}': {} provider(s), {} variable(s), {} output(s)",
            definition.name,
            interface.providers.len(),
            interface.variables.len(),
            interface.outputs.len()
        );
        Ok(interface)
    }
}
