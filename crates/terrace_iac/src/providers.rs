//! Provider requirement reconciliation.

use std::collections::HashMap;

use indexmap::IndexMap;
use tracing::{debug, info};

use terrace_config::{default_provider_source, ProviderDeclaration, VersionConstraint};

use crate::discovery::{DiscoveredProvider, ModuleInterface};
use crate::error::{IacError, IacResult};

const REGISTRY_HOST: &str = "registry.terraform.io/";

/// Providers each definition renders, with constraints narrowed to what both
/// the configuration and the module accept.
#[derive(Debug, Clone, Default)]
pub struct ReconciledProviderSet {
    globals: IndexMap<String, ProviderDeclaration>,
    per_definition: IndexMap<String, IndexMap<String, ProviderDeclaration>>,
}

impl ReconciledProviderSet {
    /// Providers of one definition, in declaration order.
    pub fn for_definition(&self, definition: &str) -> Option<&IndexMap<String, ProviderDeclaration>> {
        self.per_definition.get(definition)
    }

    pub fn provider_names(&self, definition: &str) -> Vec<&str> {
        self.per_definition
            .get(definition)
            .map(|providers| providers.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Every global declaration, used or not.
    pub fn globals(&self) -> &IndexMap<String, ProviderDeclaration> {
        &self.globals
    }

    /// Global declarations no definition renders.
    pub fn unused_globals(&self) -> Vec<&str> {
        self.globals
            .keys()
            .filter(|name| {
                !self
                    .per_definition
                    .values()
                    .any(|providers| providers.contains_key(*name))
            })
            .map(String::as_str)
            .collect()
    }

    pub fn definitions(&self) -> impl Iterator<Item = &str> {
        self.per_definition.keys().map(String::as_str)
    }
}

/// Merges global provider declarations with discovered module requirements.
pub struct ProviderReconciler<'a> {
    globals: &'a IndexMap<String, ProviderDeclaration>,
}

impl<'a> ProviderReconciler<'a> {
    pub fn new(globals: &'a IndexMap<String, ProviderDeclaration>) -> Self {
        Self { globals }
    }

    /// Reconcile every definition's interface, in the given order.
    ///
    /// A module that declares no providers inherits every global declaration.
    pub fn reconcile(
        &self,
        interfaces: &IndexMap<String, ModuleInterface>,
    ) -> IacResult<ReconciledProviderSet> {
        let mut origins: HashMap<String, (String, String)> = HashMap::new();
        let mut per_definition = IndexMap::new();

        for (definition, interface) in interfaces {
            let providers = if interface.providers.is_empty() {
                debug!("'{}' declares no providers, using all global providers", definition);
                self.globals.clone()
            } else {
                let mut merged = IndexMap::new();
                for discovered in interface.providers.values() {
                    let declaration = self.merge(definition, discovered)?;
                    merged.insert(declaration.name.clone(), declaration);
                }
                merged
            };

            for declaration in providers.values() {
                let source = declaration.source_or_default();
                let normalized = normalize_source(&source);
                match origins.get(&declaration.name) {
                    Some((existing, origin)) if normalize_source(existing) != normalized => {
                        return Err(IacError::SourceConflict {
                            provider: declaration.name.clone(),
                            first: existing.clone(),
                            first_origin: origin.clone(),
                            second: source,
                            second_origin: format!("definition '{}'", definition),
                        });
                    }
                    Some(_) => {}
                    None => {
                        origins.insert(
                            declaration.name.clone(),
                            (source, format!("definition '{}'", definition)),
                        );
                    }
                }
            }

            per_definition.insert(definition.clone(), providers);
        }

        let set = ReconciledProviderSet {
            globals: self.globals.clone(),
            per_definition,
        };
        for name in set.unused_globals() {
            info!("Provider '{}' is declared but no definition uses it", name);
        }
        Ok(set)
    }

    fn merge(&self, definition: &str, discovered: &DiscoveredProvider) -> IacResult<ProviderDeclaration> {
        let global = self.globals.get(&discovered.name);

        let mut declaration = global
            .cloned()
            .unwrap_or_else(|| ProviderDeclaration::new(discovered.name.clone()));

        if let (Some(declared), Some(found)) = (
            global.and_then(|g| g.requirements.source.as_ref()),
            discovered.source.as_ref(),
        ) {
            if normalize_source(declared) != normalize_source(found) {
                return Err(IacError::SourceConflict {
                    provider: discovered.name.clone(),
                    first: declared.clone(),
                    first_origin: "providers".to_string(),
                    second: found.clone(),
                    second_origin: format!("definition '{}'", definition),
                });
            }
        }
        if declaration.requirements.source.is_none() {
            declaration.requirements.source = discovered.source.clone();
        }

        let declared_text = global
            .and_then(|g| g.requirements.version.clone())
            .unwrap_or_default();
        let discovered_text = discovered.constraint.clone().unwrap_or_default();
        let declared = VersionConstraint::parse(&declared_text)?;
        let found = VersionConstraint::parse(&discovered_text)?;

        let narrowed = declared.intersect(&found);
        if !narrowed.is_satisfiable() {
            return Err(IacError::IncompatibleConstraint {
                definition: definition.to_string(),
                provider: discovered.name.clone(),
                declared: declared_text,
                discovered: discovered_text,
            });
        }

        declaration.requirements.version = (!narrowed.is_any()).then(|| narrowed.to_string());
        if global.is_none() {
            debug!(
                "Provider '{}' of '{}' has no global declaration, using the module's requirement",
                discovered.name, definition
            );
        }
        Ok(declaration)
    }
}

/// Compare sources the way terraform resolves them: `aws` and
/// `registry.terraform.io/hashicorp/aws` are the same provider.
fn normalize_source(source: &str) -> String {
    let trimmed = source.trim().to_ascii_lowercase();
    let stripped = trimmed.strip_prefix(REGISTRY_HOST).unwrap_or(&trimmed);
    if stripped.contains('/') {
        stripped.to_string()
    } else {
        default_provider_source(stripped)
    }
}
