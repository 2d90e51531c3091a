//! Per-run workspace allocation and per-definition rendering.
//!
//! Every definition gets its own directory holding a small root module that
//! calls the definition's module:
//!
//! ```text
//! <run>/<definition>/
//!   providers.tf      required_providers and provider blocks
//!   backend.tf        the definition's own state backend
//!   remote_state.tf   remote state of dependencies not run earlier (optional)
//!   variables.tf      root variables for every literal input
//!   terraform.tfvars  the literal values
//!   main.tf           module call plus re-exported outputs
//! ```

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Component, Path, PathBuf};

use hcl::{Block, Body, Expression, Object, ObjectKey};
use indexmap::IndexMap;
use serde_json::Value;
use tempfile::TempDir;
use tracing::{debug, info};
use uuid::Uuid;

use terrace_config::{BackendConfig, Definition, ModuleSource, ProviderDeclaration, RemoteBinding};

use crate::backend::StateLocation;
use crate::discovery::ModuleInterface;
use crate::error::{IacError, IacResult};
use crate::hcl_writer::{attribute, config_structures, literal, to_hcl, traversal};

pub const PROVIDERS_FILE: &str = "providers.tf";
pub const BACKEND_FILE: &str = "backend.tf";
pub const REMOTE_STATE_FILE: &str = "remote_state.tf";
pub const VARIABLES_FILE: &str = "variables.tf";
pub const TFVARS_FILE: &str = "terraform.tfvars";
pub const MAIN_FILE: &str = "main.tf";

/// Outputs captured from `terraform output -json`, by name.
pub type OutputMap = IndexMap<String, Value>;

/// How one remote binding reaches the dependent module.
#[derive(Debug, Clone, PartialEq)]
pub enum Wiring {
    /// Captured earlier in this run; written as a literal.
    Direct(Value),
    /// Read from the dependency's state when terraform runs.
    Deferred { source_definition: String, output: String },
}

impl Wiring {
    /// Wiring of a binding given what its source captured in this run, if it ran.
    pub fn resolve(
        definition: &str,
        binding: &RemoteBinding,
        captured: Option<&OutputMap>,
    ) -> IacResult<Self> {
        match captured {
            Some(outputs) => outputs
                .get(&binding.output)
                .map(|value| Wiring::Direct(value.clone()))
                .ok_or_else(|| IacError::MissingOutput {
                    definition: definition.to_string(),
                    source_definition: binding.source_definition.clone(),
                    output: binding.output.clone(),
                }),
            None => Ok(Wiring::Deferred {
                source_definition: binding.source_definition.clone(),
                output: binding.output.clone(),
            }),
        }
    }
}

/// The directory tree of one run.
#[derive(Debug)]
pub struct RunWorkspace {
    run_id: String,
    root: PathBuf,
    temp: Option<TempDir>,
    keep: bool,
}

impl RunWorkspace {
    /// Allocate a fresh run directory.
    ///
    /// With `working_dir` a `run-<uuid>` directory is created inside it and
    /// always kept; otherwise a temporary directory is used and kept only when
    /// `keep` is set. The root is always absolute.
    pub fn allocate(working_dir: Option<&Path>, keep: bool) -> IacResult<Self> {
        let run_id = Uuid::new_v4().to_string();

        let workspace = match working_dir {
            Some(dir) => {
                if !dir.is_dir() {
                    return Err(IacError::InvalidWorkspace(dir.to_path_buf()));
                }
                let root = absolute(dir)?.join(format!("run-{}", run_id));
                fs::create_dir(&root)?;
                Self {
                    run_id,
                    root,
                    temp: None,
                    keep: true,
                }
            }
            None => {
                let temp = tempfile::Builder::new().prefix("terrace-run-").tempdir()?;
                Self {
                    run_id,
                    root: absolute(temp.path())?,
                    temp: Some(temp),
                    keep,
                }
            }
        };

        info!("Run workspace: {}", workspace.root.display());
        Ok(workspace)
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn definition_dir(&self, definition: &str) -> PathBuf {
        self.root.join(definition)
    }

    pub fn is_kept(&self) -> bool {
        self.keep
    }

    /// Retain or remove the tree. Returns the path when it was retained.
    pub fn finish(self) -> IacResult<Option<PathBuf>> {
        if self.keep {
            let root = match self.temp {
                Some(temp) => temp.keep(),
                None => self.root,
            };
            info!("Workspace kept at {}", root.display());
            return Ok(Some(root));
        }

        if let Some(temp) = self.temp {
            temp.close()?;
        }
        debug!("Workspace {} removed", self.root.display());
        Ok(None)
    }
}

/// Everything needed to render one definition.
#[derive(Debug, Clone, Copy)]
pub struct RenderRequest<'a> {
    pub definition: &'a Definition,
    pub interface: &'a ModuleInterface,
    pub providers: &'a IndexMap<String, ProviderDeclaration>,
    pub backend: &'a BackendConfig,
    pub globals: &'a IndexMap<String, Value>,
    /// Directory relative module paths resolve against
    pub base_dir: &'a Path,
    /// Wiring of every remote binding, by variable
    pub wiring: &'a IndexMap<String, Wiring>,
}

/// What was written for a definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedDefinition {
    pub dir: PathBuf,
    pub files: Vec<String>,
    /// Dependencies read through remote state
    pub deferred: Vec<String>,
}

/// A module input: a value, or a reference read at plan time.
pub(crate) enum Input {
    Literal(Value),
    Reference(Expression),
}

/// Writes a definition's root module.
pub struct WorkspaceRenderer;

impl WorkspaceRenderer {
    /// Render into `dir`, creating it if needed. Nothing outside `dir` is
    /// touched.
    pub fn render(request: &RenderRequest<'_>, dir: &Path) -> IacResult<RenderedDefinition> {
        let files = Self::render_files(request, dir)?;
        fs::create_dir_all(dir)?;
        for (name, content) in &files {
            fs::write(dir.join(name), content)?;
        }

        let rendered = RenderedDefinition {
            dir: dir.to_path_buf(),
            files: files.keys().map(|name| name.to_string()).collect(),
            deferred: deferred_sources(request.wiring),
        };
        debug!(
            "Rendered '{}' into {} ({} files)",
            request.definition.name,
            dir.display(),
            rendered.files.len()
        );
        Ok(rendered)
    }

    /// File contents keyed by file name. Identical requests give identical
    /// contents.
    pub fn render_files(
        request: &RenderRequest<'_>,
        dir: &Path,
    ) -> IacResult<BTreeMap<&'static str, String>> {
        let name = &request.definition.name;
        let inputs = Self::inputs(request)?;

        let mut files = BTreeMap::new();
        files.insert(PROVIDERS_FILE, Self::providers_file(request)?);

        let backend = Body::builder()
            .add_block(StateLocation::for_definition(request.backend, name).backend_block())
            .build();
        files.insert(BACKEND_FILE, with_header(name, &backend)?);

        let deferred = deferred_sources(request.wiring);
        if !deferred.is_empty() {
            let remote_state = Body::builder()
                .add_blocks(
                    deferred
                        .iter()
                        .map(|source| StateLocation::for_definition(request.backend, source).remote_state_block()),
                )
                .build();
            files.insert(REMOTE_STATE_FILE, with_header(name, &remote_state)?);
        }

        let mut variables = Body::builder();
        let mut tfvars = Body::builder();
        for (variable, input) in &inputs {
            if let Input::Literal(value) = input {
                variables = variables.add_block(Block::builder("variable").add_label(variable.as_str()).build());
                tfvars = tfvars.add_attribute(attribute(variable, literal(value)?)?);
            }
        }
        files.insert(VARIABLES_FILE, with_header(name, &variables.build())?);
        files.insert(TFVARS_FILE, with_header(name, &tfvars.build())?);

        files.insert(MAIN_FILE, Self::main_file(request, dir, &inputs)?);
        Ok(files)
    }

    /// Module inputs: globals the module declares, then local overrides, then
    /// remote bindings. Later sources win.
    pub(crate) fn inputs(request: &RenderRequest<'_>) -> IacResult<IndexMap<String, Input>> {
        let definition = request.definition;
        let mut inputs = IndexMap::new();

        for (key, value) in request.globals {
            if !request.interface.inspected || request.interface.declares_variable(key) {
                inputs.insert(key.clone(), Input::Literal(value.clone()));
            }
        }
        for (key, value) in &definition.terraform_vars {
            inputs.insert(key.clone(), Input::Literal(value.clone()));
        }

        for binding in definition.bindings()? {
            let wiring = request.wiring.get(&binding.variable).ok_or_else(|| {
                IacError::Render(format!(
                    "no wiring for '{}' of definition '{}'",
                    binding.variable, definition.name
                ))
            })?;
            let input = match wiring {
                Wiring::Direct(value) => Input::Literal(value.clone()),
                Wiring::Deferred {
                    source_definition,
                    output,
                } => Input::Reference(
                    StateLocation::for_definition(request.backend, source_definition)
                        .output_reference(output)?,
                ),
            };
            inputs.insert(binding.variable.clone(), input);
        }

        Ok(inputs)
    }

    fn providers_file(request: &RenderRequest<'_>) -> IacResult<String> {
        let mut required = Block::builder("required_providers");
        for declaration in request.providers.values() {
            let mut requirement: Object<ObjectKey, Expression> = Object::new();
            requirement.insert(ObjectKey::from("source"), declaration.source_or_default().into());
            if let Some(version) = &declaration.requirements.version {
                requirement.insert(ObjectKey::from("version"), version.clone().into());
            }
            required = required.add_attribute(attribute(&declaration.name, requirement)?);
        }

        let mut body = Body::builder().add_block(Block::builder("terraform").add_block(required.build()).build());
        for declaration in request.providers.values() {
            let mut provider = Block::builder("provider").add_label(declaration.name.as_str());
            for (key, value) in &declaration.vars {
                provider = provider.add_attribute(attribute(key, literal(value)?)?);
            }
            for (block, value) in &declaration.config_blocks {
                provider = provider.add_structures(config_structures(block, value)?);
            }
            body = body.add_block(provider.build());

            for (alias, settings) in &declaration.aliases {
                let mut aliased = Block::builder("provider")
                    .add_label(declaration.name.as_str())
                    .add_attribute(("alias", alias.as_str()));
                for (key, value) in &settings.vars {
                    aliased = aliased.add_attribute(attribute(key, literal(value)?)?);
                }
                for (block, value) in &settings.config_blocks {
                    aliased = aliased.add_structures(config_structures(block, value)?);
                }
                body = body.add_block(aliased.build());
            }
        }

        with_header(&request.definition.name, &body.build())
    }

    fn main_file(
        request: &RenderRequest<'_>,
        dir: &Path,
        inputs: &IndexMap<String, Input>,
    ) -> IacResult<String> {
        let definition = request.definition;
        let source = match definition.source() {
            ModuleSource::Remote(address) => address,
            ModuleSource::Local(path) => {
                let absolute = if path.is_absolute() {
                    path
                } else {
                    request.base_dir.join(path)
                };
                relative_source(dir, &absolute)?
            }
        };

        let mut module = Block::builder("module")
            .add_label(definition.name.as_str())
            .add_attribute(("source", source));

        if let Some(providers) = Self::provider_passing(request)? {
            module = module.add_attribute(("providers", providers));
        }

        for (variable, input) in inputs {
            let value = match input {
                Input::Literal(_) => traversal("var", &[variable.as_str()])?,
                Input::Reference(reference) => reference.clone(),
            };
            module = module.add_attribute(attribute(variable, value)?);
        }

        let mut body = Body::builder().add_block(module.build());
        for output in &request.interface.outputs {
            let mut block = Block::builder("output")
                .add_label(output.name.as_str())
                .add_attribute(("value", traversal("module", &[definition.name.as_str(), output.name.as_str()])?));
            if output.sensitive {
                block = block.add_attribute(("sensitive", true));
            }
            body = body.add_block(block.build());
        }

        with_header(&definition.name, &body.build())
    }

    /// Explicit `providers` map, needed only when the module expects aliased
    /// configurations. Passing providers explicitly disables inheritance, so
    /// the default configurations are listed too.
    fn provider_passing(request: &RenderRequest<'_>) -> IacResult<Option<Expression>> {
        let wanted: Vec<(&str, &str)> = request
            .interface
            .providers
            .values()
            .flat_map(|p| {
                p.configuration_aliases
                    .iter()
                    .map(move |alias| (p.name.as_str(), alias.as_str()))
            })
            .collect();
        if wanted.is_empty() {
            return Ok(None);
        }

        let mut map: Object<ObjectKey, Expression> = Object::new();
        for name in request.providers.keys() {
            let reference = traversal(name, &[])?;
            map.insert(ObjectKey::Expression(reference.clone()), reference);
        }
        for (provider, alias) in wanted {
            let declared = request
                .providers
                .get(provider)
                .map_or(false, |declaration| declaration.aliases.contains_key(alias));
            if !declared {
                return Err(IacError::Render(format!(
                    "module of '{}' expects provider configuration {}.{}, which is not declared",
                    request.definition.name, provider, alias
                )));
            }
            let reference = traversal(provider, &[alias])?;
            map.insert(ObjectKey::Expression(reference.clone()), reference);
        }
        Ok(Some(Expression::Object(map)))
    }
}

fn deferred_sources(wiring: &IndexMap<String, Wiring>) -> Vec<String> {
    let mut sources: Vec<String> = Vec::new();
    for item in wiring.values() {
        if let Wiring::Deferred {
            source_definition, ..
        } = item
        {
            if !sources.contains(source_definition) {
                sources.push(source_definition.clone());
            }
        }
    }
    sources
}

fn with_header(definition: &str, body: &Body) -> IacResult<String> {
    Ok(format!(
        "# Generated by terrace for definition '{}'. Changes are overwritten.\n\n{}",
        definition,
        to_hcl(body)?
    ))
}

fn absolute(path: &Path) -> IacResult<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(env::current_dir()?.join(path))
    }
}

/// Module source for `target` as seen from `from`, always `./` or `../`
/// relative. Relative inputs are taken from the current directory.
fn relative_source(from: &Path, target: &Path) -> IacResult<String> {
    let from = absolute(from)?;
    let target = absolute(target)?;
    let from_parts: Vec<Component> = from.components().collect();
    let to_parts: Vec<Component> = target.components().collect();
    let common = from_parts
        .iter()
        .zip(&to_parts)
        .take_while(|(a, b)| a == b)
        .count();
    if common == 0 {
        return Err(IacError::Render(format!(
            "module {} cannot be reached from {} with a relative source",
            target.display(),
            from.display()
        )));
    }

    let mut parts: Vec<String> = vec!["..".to_string(); from_parts.len() - common];
    parts.extend(
        to_parts[common..]
            .iter()
            .map(|part| part.as_os_str().to_string_lossy().into_owned()),
    );

    Ok(match parts.first().map(String::as_str) {
        Some("..") => parts.join("/"),
        Some(_) => format!("./{}", parts.join("/")),
        None => ".".to_string(),
    })
}
