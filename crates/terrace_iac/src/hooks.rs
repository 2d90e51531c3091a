//! Hook scripts run around terraform steps.
//!
//! A definition's local module may carry scripts named
//! `hooks/<phase>_<step>`, with any extension, e.g. `hooks/pre_apply.sh`.
//! A script runs from the hooks directory as `<script> <phase> <step>` and
//! sees the definition's inputs in its environment:
//!
//! - `TF_PATH`: the terraform binary
//! - `TF_VAR_<NAME>`: literal inputs
//! - `TF_REMOTE_<NAME>`: remote bindings whose value is already known
//! - `TF_OUTPUT_<NAME>`: outputs of the definition, for `post_apply`
//!
//! Values are shell-quoted, with booleans as `TRUE`/`FALSE` and lists or
//! objects as compact JSON.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use terrace_config::{Definition, ModuleSource};
use terrace_runner::{CommandSpec, ProcessRunner, RunConfig};

use crate::error::{IacError, IacResult};
use crate::renderer::{Input, OutputMap, RenderRequest, WorkspaceRenderer};

/// Directory of hook scripts inside a module.
pub const HOOKS_DIR: &str = "hooks";

/// Environment variable naming the terraform binary.
pub const TF_PATH_ENV: &str = "TF_PATH";

/// Before or after a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPhase {
    Pre,
    Post,
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pre => "pre",
            Self::Post => "post",
        };
        write!(f, "{}", s)
    }
}

/// Terraform steps that carry hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookStep {
    Init,
    Plan,
    Apply,
    Destroy,
}

impl fmt::Display for HookStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Init => "init",
            Self::Plan => "plan",
            Self::Apply => "apply",
            Self::Destroy => "destroy",
        };
        write!(f, "{}", s)
    }
}

/// Where an exported value comes from; decides its prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookVarKind {
    Var,
    Remote,
    Output,
}

impl HookVarKind {
    fn prefix(&self) -> &'static str {
        match self {
            Self::Var => "TF_VAR_",
            Self::Remote => "TF_REMOTE_",
            Self::Output => "TF_OUTPUT_",
        }
    }
}

/// `TF_VAR_VPC_ID` for (`Var`, `vpc-id`). Spaces and double quotes are
/// dropped, dashes and dots become underscores.
pub fn env_key(kind: HookVarKind, name: &str) -> String {
    let normalized: String = name
        .chars()
        .filter(|c| *c != ' ' && *c != '"')
        .map(|c| if c == '-' || c == '.' { '_' } else { c })
        .collect();
    format!("{}{}", kind.prefix(), normalized.to_uppercase())
}

/// Shell-quoted text of a value.
pub fn env_value(value: &Value) -> String {
    let text = match value {
        Value::Bool(true) => "TRUE".to_string(),
        Value::Bool(false) => "FALSE".to_string(),
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    };
    shell_quote(&text)
}

/// Quote `text` for a POSIX shell; safe text is left bare.
pub fn shell_quote(text: &str) -> String {
    if text.is_empty() {
        return "''".to_string();
    }
    let safe = text
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "@%+=:,./-_".contains(c));
    if safe {
        return text.to_string();
    }
    format!("'{}'", text.replace('\'', r#"'"'"'"#))
}

/// Environment handed to every hook of a definition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HookEnv {
    vars: BTreeMap<String, String>,
}

impl HookEnv {
    pub fn new(terraform_bin: &str) -> Self {
        let mut vars = BTreeMap::new();
        vars.insert(TF_PATH_ENV.to_string(), terraform_bin.to_string());
        Self { vars }
    }

    /// Inputs of a render request. References into remote state have no
    /// value yet and are left out.
    pub fn for_request(request: &RenderRequest<'_>, terraform_bin: &str) -> IacResult<Self> {
        let bound: Vec<String> = request
            .definition
            .bindings()?
            .into_iter()
            .map(|binding| binding.variable)
            .collect();

        let mut env = Self::new(terraform_bin);
        for (name, input) in WorkspaceRenderer::inputs(request)? {
            match input {
                Input::Literal(value) if bound.contains(&name) => {
                    env.insert(HookVarKind::Remote, &name, &value)
                }
                Input::Literal(value) => env.insert(HookVarKind::Var, &name, &value),
                Input::Reference(_) => debug!("'{}' is read from remote state, not exported to hooks", name),
            }
        }
        Ok(env)
    }

    pub fn insert(&mut self, kind: HookVarKind, name: &str, value: &Value) {
        self.vars.insert(env_key(kind, name), env_value(value));
    }

    /// Raw variables, e.g. credentials.
    pub fn extend(&mut self, vars: impl IntoIterator<Item = (String, String)>) {
        self.vars.extend(vars);
    }

    pub fn with_outputs(&self, outputs: &OutputMap) -> Self {
        let mut env = self.clone();
        for (name, value) in outputs {
            env.insert(HookVarKind::Output, name, value);
        }
        env
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }
}

/// Hooks directory of a definition's local module, if it has one.
pub fn module_hooks_dir(definition: &Definition, base_dir: &Path) -> Option<PathBuf> {
    let module = match definition.source() {
        ModuleSource::Remote(_) => return None,
        ModuleSource::Local(path) if path.is_absolute() => path,
        ModuleSource::Local(path) => base_dir.join(path),
    };
    let dir = module.join(HOOKS_DIR);
    dir.is_dir().then_some(dir)
}

/// Script for `phase` and `step` in `hooks_dir`. A matching file that is not
/// executable is an error.
pub fn find_hook(hooks_dir: &Path, phase: HookPhase, step: HookStep) -> IacResult<Option<PathBuf>> {
    let wanted = format!("{}_{}", phase, step);
    let mut candidates = Vec::new();
    for entry in fs::read_dir(hooks_dir)? {
        let path = entry?.path();
        let matches = path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| name.split('.').next())
            .map_or(false, |stem| stem == wanted);
        if matches && path.is_file() {
            candidates.push(path);
        }
    }
    candidates.sort();

    let Some(script) = candidates.into_iter().next() else {
        return Ok(None);
    };
    if !is_executable(&script)? {
        return Err(IacError::Hook {
            script: script.display().to_string(),
            message: "is not executable".to_string(),
            output: String::new(),
        });
    }
    Ok(Some(script))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> IacResult<bool> {
    use std::os::unix::fs::PermissionsExt;
    Ok(fs::metadata(path)?.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(_path: &Path) -> IacResult<bool> {
    Ok(true)
}

/// Runs hook scripts through a process runner.
#[derive(Clone)]
pub struct HookRunner {
    runner: Arc<dyn ProcessRunner>,
}

impl HookRunner {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self { runner }
    }

    /// Run the hook for `phase` and `step`, if there is one. Returns whether
    /// a script ran; a non-zero exit is an error.
    pub async fn run(
        &self,
        hooks_dir: &Path,
        phase: HookPhase,
        step: HookStep,
        env: &HookEnv,
        config: &RunConfig,
    ) -> IacResult<bool> {
        let Some(script) = find_hook(hooks_dir, phase, step)? else {
            return Ok(false);
        };

        info!("Running hook {}", script.display());
        let spec = CommandSpec::new(script.display().to_string())
            .args([phase.to_string(), step.to_string()])
            .workdir(hooks_dir)
            .envs(env.vars().clone());
        let result = self.runner.run(&spec, config).await?;
        if !result.success() {
            return Err(IacError::Hook {
                script: script.display().to_string(),
                message: format!("exited with {}", result.exit_code),
                output: result.combined_output(),
            });
        }
        Ok(true)
    }
}

/// Hooks of one definition with the environment they share.
#[derive(Clone)]
pub struct DefinitionHooks {
    runner: HookRunner,
    dir: PathBuf,
    env: HookEnv,
}

impl DefinitionHooks {
    /// `None` when the definition's module has no hooks directory.
    pub fn for_request(
        runner: &HookRunner,
        request: &RenderRequest<'_>,
        terraform_bin: &str,
    ) -> IacResult<Option<Self>> {
        let Some(dir) = module_hooks_dir(request.definition, request.base_dir) else {
            return Ok(None);
        };
        Ok(Some(Self {
            runner: runner.clone(),
            dir,
            env: HookEnv::for_request(request, terraform_bin)?,
        }))
    }

    pub fn with_env(mut self, vars: impl IntoIterator<Item = (String, String)>) -> Self {
        self.env.extend(vars);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn env(&self) -> &HookEnv {
        &self.env
    }

    /// Run one hook; `outputs` are exported as `TF_OUTPUT_*`.
    pub async fn fire(
        &self,
        phase: HookPhase,
        step: HookStep,
        outputs: Option<&OutputMap>,
        config: &RunConfig,
    ) -> IacResult<bool> {
        match outputs {
            Some(outputs) => {
                let env = self.env.with_outputs(outputs);
                self.runner.run(&self.dir, phase, step, &env, config).await
            }
            None => self.runner.run(&self.dir, phase, step, &self.env, config).await,
        }
    }
}
