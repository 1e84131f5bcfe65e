//! Database configuration
//!
//! Loaded from YAML, e.g.
//!
//! ```yaml
//! storage_path: ./ogm_data
//! storage:
//!   write_buffer_mb: 32
//!   compression: false
//! ```

use crate::graph::{EmbeddedGraphStore, GraphResult, GraphStore};
use crate::persistence::StorageOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Database configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory for persistence (None = in-memory only)
    pub storage_path: Option<PathBuf>,
    /// RocksDB tunables, ignored for in-memory databases
    pub storage: StorageOptions,
}

impl Config {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn persistent(path: impl Into<PathBuf>) -> Self {
        Self {
            storage_path: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&yaml)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Open the embedded store this configuration describes
    pub fn open_store(&self) -> GraphResult<Arc<dyn GraphStore>> {
        let store = match &self.storage_path {
            Some(path) => EmbeddedGraphStore::open(path, &self.storage)?,
            None => EmbeddedGraphStore::in_memory(),
        };
        Ok(Arc::new(store))
    }

    /// Human readable storage location, for logs
    pub fn location(&self) -> String {
        match &self.storage_path {
            Some(path) => path.display().to_string(),
            None => "memory".to_string(),
        }
    }
}
