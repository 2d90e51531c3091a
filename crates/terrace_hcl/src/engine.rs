//! Parser trait and engine selection.

use std::collections::BTreeMap;
use std::env;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use terrace_runner::{find_executable, ProcessRunner, RunConfig};

use crate::embedded::EmbeddedParser;
use crate::error::{HclError, HclResult};
use crate::external::ExternalParser;

/// Name of the external helper looked up on the search path.
pub const HELPER_BINARY: &str = "terrace-hcl2json";
/// Variable naming the helper binary explicitly.
pub const HELPER_BIN_ENV: &str = "TERRACE_HCL_BIN";
/// Variable forcing an engine: `external`, `embedded` or `auto`.
pub const ENGINE_ENV: &str = "TERRACE_HCL_ENGINE";

/// Result of parsing a batch of files.
///
/// Every requested path lands in exactly one of the two maps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub ok: BTreeMap<PathBuf, Value>,
    pub errors: BTreeMap<PathBuf, String>,
}

impl BatchOutcome {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// A module source parser.
#[async_trait]
pub trait HclParser: Send + Sync {
    fn engine(&self) -> EngineKind;

    /// Parse a set of files in one call. A file that fails to parse is
    /// reported in `errors` and does not affect the others.
    async fn parse_batch(&self, paths: &[PathBuf]) -> HclResult<BatchOutcome>;

    /// Parse source held in memory.
    async fn parse_str(&self, source: &str) -> HclResult<Value>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    External,
    Embedded,
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineKind::External => f.write_str("external"),
            EngineKind::Embedded => f.write_str("embedded"),
        }
    }
}

impl FromStr for EngineKind {
    type Err = HclError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "external" => Ok(EngineKind::External),
            "embedded" => Ok(EngineKind::Embedded),
            other => Err(HclError::InvalidEngine(other.to_string())),
        }
    }
}

/// The engine a run will use, with the helper location when external.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedEngine {
    External(PathBuf),
    Embedded,
}

impl ResolvedEngine {
    pub fn kind(&self) -> EngineKind {
        match self {
            ResolvedEngine::External(_) => EngineKind::External,
            ResolvedEngine::Embedded => EngineKind::Embedded,
        }
    }
}

/// How to pick the parser engine. Resolved once per run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineSelection {
    /// Helper binary to try before the search path
    pub override_binary: Option<PathBuf>,
    /// Engine required by the operator; `None` picks automatically
    pub force: Option<EngineKind>,
    /// Search path for the helper; `None` uses `PATH`
    pub search_path: Option<OsString>,
}

impl EngineSelection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Selection from `TERRACE_HCL_BIN` and `TERRACE_HCL_ENGINE`.
    pub fn from_env() -> HclResult<Self> {
        let override_binary = env::var_os(HELPER_BIN_ENV)
            .filter(|value| !value.is_empty())
            .map(PathBuf::from);
        let force = match env::var(ENGINE_ENV) {
            Ok(value) => parse_force(&value)?,
            Err(_) => None,
        };

        Ok(Self {
            override_binary,
            force,
            search_path: None,
        })
    }

    pub fn with_override_binary(mut self, path: impl Into<PathBuf>) -> Self {
        self.override_binary = Some(path.into());
        self
    }

    pub fn with_force(mut self, engine: EngineKind) -> Self {
        self.force = Some(engine);
        self
    }

    pub fn with_search_path(mut self, path: impl Into<OsString>) -> Self {
        self.search_path = Some(path.into());
        self
    }

    /// Locate the helper: the override first, then the helper installed next
    /// to the running executable (default search only), then the search path.
    pub fn locate_helper(&self) -> Option<PathBuf> {
        if let Some(path) = &self.override_binary {
            if let Some(found) = find_executable(&path.to_string_lossy(), self.search_path.as_deref()) {
                return Some(found);
            }
            warn!("HCL helper override {} is not executable", path.display());
        }
        if self.search_path.is_none() {
            if let Some(found) = env::current_exe().ok().and_then(|exe| helper_beside(&exe)) {
                return Some(found);
            }
        }
        find_executable(HELPER_BINARY, self.search_path.as_deref())
    }

    /// Decide the engine. Forcing the external engine without a usable helper
    /// is an error; there is no silent fallback.
    pub fn resolve(&self) -> HclResult<ResolvedEngine> {
        let resolved = match self.force {
            Some(EngineKind::Embedded) => ResolvedEngine::Embedded,
            Some(EngineKind::External) => match self.locate_helper() {
                Some(path) => ResolvedEngine::External(path),
                None => {
                    return Err(HclError::EngineUnavailable(format!(
                        "external engine forced but {} was not found; install it on PATH or set {}",
                        HELPER_BINARY, HELPER_BIN_ENV
                    )))
                }
            },
            None => match self.locate_helper() {
                Some(path) => ResolvedEngine::External(path),
                None => ResolvedEngine::Embedded,
            },
        };

        match &resolved {
            ResolvedEngine::External(path) => info!("Using external HCL engine at {}", path.display()),
            ResolvedEngine::Embedded => debug!("Using embedded HCL engine"),
        }
        Ok(resolved)
    }

    /// Resolve and construct the parser.
    pub fn build(
        &self,
        runner: Arc<dyn ProcessRunner>,
        run_config: RunConfig,
    ) -> HclResult<Arc<dyn HclParser>> {
        Ok(match self.resolve()? {
            ResolvedEngine::External(path) => Arc::new(
                ExternalParser::new(path, runner).with_run_config(run_config),
            ),
            ResolvedEngine::Embedded => Arc::new(EmbeddedParser::new()),
        })
    }
}

fn parse_force(value: &str) -> HclResult<Option<EngineKind>> {
    let value = value.trim();
    if value.is_empty() || value.eq_ignore_ascii_case("auto") {
        return Ok(None);
    }
    value.parse().map(Some)
}

/// The helper in the same directory as `executable`, as `cargo install`
/// and release archives lay them out.
pub fn helper_beside(executable: &Path) -> Option<PathBuf> {
    let dir = executable.parent()?;
    find_executable(
        &dir.join(format!("{}{}", HELPER_BINARY, env::consts::EXE_SUFFIX)).to_string_lossy(),
        None,
    )
}

/// Display form of a path used as a map key by the helper.
pub(crate) fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::tempdir;

    fn install_helper(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, "#!/bin/sh\necho '{}'\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn test_auto_prefers_helper_on_search_path() {
        let temp = tempdir().unwrap();
        let helper = install_helper(temp.path(), HELPER_BINARY);

        let selection = EngineSelection::new().with_search_path(temp.path().as_os_str());
        assert_eq!(selection.resolve().unwrap(), ResolvedEngine::External(helper));
    }

    #[test]
    fn test_helper_found_beside_executable() {
        let temp = tempdir().unwrap();
        let terrace = install_helper(temp.path(), "terrace");
        assert_eq!(helper_beside(&terrace), None);

        let helper = install_helper(temp.path(), HELPER_BINARY);
        assert_eq!(helper_beside(&terrace), Some(helper));
    }

    #[test]
    fn test_auto_falls_back_to_embedded() {
        let temp = tempdir().unwrap();
        let selection = EngineSelection::new().with_search_path(temp.path().as_os_str());
        assert_eq!(selection.resolve().unwrap(), ResolvedEngine::Embedded);
    }

    #[test]
    fn test_override_binary_checked_first() {
        let temp = tempdir().unwrap();
        let custom = install_helper(temp.path(), "custom-helper");
        install_helper(temp.path(), HELPER_BINARY);

        let selection = EngineSelection::new()
            .with_override_binary(&custom)
            .with_search_path(temp.path().as_os_str());
        assert_eq!(selection.resolve().unwrap(), ResolvedEngine::External(custom));
    }

    #[test]
    fn test_missing_override_falls_through_to_search_path() {
        let temp = tempdir().unwrap();
        let helper = install_helper(temp.path(), HELPER_BINARY);

        let selection = EngineSelection::new()
            .with_override_binary(temp.path().join("absent"))
            .with_search_path(temp.path().as_os_str());
        assert_eq!(selection.resolve().unwrap(), ResolvedEngine::External(helper));
    }

    #[test]
    fn test_forced_external_without_helper_fails() {
        let temp = tempdir().unwrap();
        let selection = EngineSelection::new()
            .with_force(EngineKind::External)
            .with_search_path(temp.path().as_os_str());
        assert!(matches!(
            selection.resolve(),
            Err(HclError::EngineUnavailable(_))
        ));
    }

    #[test]
    fn test_forced_embedded_ignores_helper() {
        let temp = tempdir().unwrap();
        install_helper(temp.path(), HELPER_BINARY);

        let selection = EngineSelection::new()
            .with_force(EngineKind::Embedded)
            .with_search_path(temp.path().as_os_str());
        assert_eq!(selection.resolve().unwrap(), ResolvedEngine::Embedded);
    }

    #[test]
    fn test_force_values() {
        assert_eq!(parse_force("").unwrap(), None);
        assert_eq!(parse_force("auto").unwrap(), None);
        assert_eq!(parse_force("External").unwrap(), Some(EngineKind::External));
        assert_eq!(parse_force(" embedded ").unwrap(), Some(EngineKind::Embedded));
        assert!(matches!(parse_force("go"), Err(HclError::InvalidEngine(_))));
        assert!(matches!(parse_force("python"), Err(HclError::InvalidEngine(_))));
        assert!(matches!(parse_force("rust"), Err(HclError::InvalidEngine(_))));
    }
}
