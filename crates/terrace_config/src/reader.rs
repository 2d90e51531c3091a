//! Configuration document loading.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{ConfigError, ConfigResult};
use crate::models::{ConfigDocument, WorkerConfig};

/// Serialization of a configuration document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Json,
    Hcl,
}

impl ConfigFormat {
    /// Format implied by a file extension. Unknown extensions read as YAML.
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        match path
            .as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .as_deref()
        {
            Some("json") => ConfigFormat::Json,
            Some("hcl") => ConfigFormat::Hcl,
            _ => ConfigFormat::Yaml,
        }
    }
}

/// A configuration together with where it came from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub path: PathBuf,
    pub format: ConfigFormat,
    pub config: WorkerConfig,
}

impl LoadedConfig {
    /// Directory relative module paths are resolved against.
    pub fn base_dir(&self) -> PathBuf {
        if let Some(repository) = &self.config.worker_options.repository_path {
            if repository.is_absolute() {
                return repository.clone();
            }
            return self.config_dir().join(repository);
        }
        self.config_dir()
    }

    fn config_dir(&self) -> PathBuf {
        self.path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

/// Reader for worker configuration documents.
pub struct ConfigReader;

impl ConfigReader {
    /// Read and parse a configuration file, picking the format from its extension.
    pub fn from_path(path: impl AsRef<Path>) -> ConfigResult<LoadedConfig> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let format = ConfigFormat::from_path(path);
        debug!("Reading {:?} configuration from {:?}", format, path);

        let content = fs::read_to_string(path)?;
        let config = Self::from_str(&content, format).map_err(|e| ConfigError::InvalidFormat {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        info!(
            "Loaded configuration {} ({} definitions, {} providers)",
            path.display(),
            config.definitions.len(),
            config.providers.len()
        );

        Ok(LoadedConfig {
            path,
            format,
            config,
        })
    }

    /// Parse a document held in memory.
    pub fn from_str(content: &str, format: ConfigFormat) -> ConfigResult<WorkerConfig> {
        let document: ConfigDocument = match format {
            ConfigFormat::Yaml => serde_yaml::from_str(content)?,
            ConfigFormat::Json => serde_json::from_str(content)?,
            ConfigFormat::Hcl => hcl::from_str(content)?,
        };
        Ok(document.terraform)
    }
}
