//! Runtime configuration.
//!
//! Loaded from `tessera.toml` when present, then overridden by environment
//! variables. Per-extension settings live under `[extensions.<id>]` and are
//! handed to each extension's context.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default configuration file name.
pub const CONFIG_FILE_NAME: &str = "tessera.toml";

/// Default per-call lifecycle timeout.
pub const DEFAULT_LIFECYCLE_TIMEOUT_SECS: u64 = 30;

/// Environment variable names.
pub mod env_vars {
    pub const EXTENSIONS_DIR: &str = "TESSERA_EXTENSIONS_DIR";
    pub const DATA_DIR: &str = "TESSERA_DATA_DIR";
    pub const LIFECYCLE_TIMEOUT_SECS: &str = "TESSERA_LIFECYCLE_TIMEOUT_SECS";
    pub const HOST_VERSION: &str = "TESSERA_HOST_VERSION";
}

/// Storage backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    Memory,
    Redb,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageKind,
    /// Database file for the redb backend; defaults to `<data_dir>/tessera.redb`.
    pub path: Option<PathBuf>,
}

/// Host runtime configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Search locations scanned by discovery.
    pub extension_dirs: Vec<PathBuf>,
    /// Parent of per-extension data directories and the default database.
    pub data_dir: PathBuf,
    /// Parent of per-extension temp directories; system temp when unset.
    pub temp_dir: Option<PathBuf>,
    pub lifecycle_timeout_secs: u64,
    /// Version extensions are checked against; the core version when unset.
    pub host_version: Option<String>,
    pub storage: StorageConfig,
    /// Settings per extension id.
    pub extensions: HashMap<String, serde_json::Value>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            extension_dirs: vec![PathBuf::from("extensions")],
            data_dir: PathBuf::from("data"),
            temp_dir: None,
            lifecycle_timeout_secs: DEFAULT_LIFECYCLE_TIMEOUT_SECS,
            host_version: None,
            storage: StorageConfig::default(),
            extensions: HashMap::new(),
        }
    }
}

impl RuntimeConfig {
    /// Load `path` if it exists (defaults otherwise) and apply environment
    /// overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.is_file() {
            tracing::info!(category = "config", path = %path.display(), "Loading runtime config");
            Self::from_toml_str(&std::fs::read_to_string(path)?)?
        } else {
            tracing::info!(
                category = "config",
                path = %path.display(),
                "Config file not found, using defaults"
            );
            Self::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Serialization(format!("invalid config: {}", e)))
    }

    /// Apply overrides from a variable lookup (normally the process env).
    ///
    /// Unparseable values are logged and ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dirs) = lookup(env_vars::EXTENSIONS_DIR) {
            self.extension_dirs = std::env::split_paths(&dirs).collect();
        }
        if let Some(dir) = lookup(env_vars::DATA_DIR) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(secs) = lookup(env_vars::LIFECYCLE_TIMEOUT_SECS) {
            match secs.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => self.lifecycle_timeout_secs = secs,
                _ => tracing::warn!(
                    category = "config",
                    value = %secs,
                    "Ignoring invalid {}", env_vars::LIFECYCLE_TIMEOUT_SECS
                ),
            }
        }
        if let Some(version) = lookup(env_vars::HOST_VERSION) {
            self.host_version = Some(version);
        }
    }

    pub fn lifecycle_timeout(&self) -> Duration {
        Duration::from_secs(self.lifecycle_timeout_secs.max(1))
    }

    /// Host version extensions are checked against.
    pub fn host_version(&self) -> Result<semver::Version> {
        let raw = self
            .host_version
            .as_deref()
            .unwrap_or(crate::extension::loader::CORE_VERSION);
        semver::Version::parse(raw.trim()).map_err(|e| Error::MalformedVersion {
            id: "<host>".into(),
            field: "host_version",
            value: raw.to_string(),
            reason: e.to_string(),
        })
    }

    /// Settings section of one extension (`Null` when absent).
    pub fn extension_settings(&self, id: &str) -> serde_json::Value {
        self.extensions
            .get(id)
            .cloned()
            .unwrap_or(serde_json::Value::Null)
    }

    /// Directory for per-extension temp directories.
    pub fn temp_root(&self) -> PathBuf {
        self.temp_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("tessera"))
    }

    /// Database file for the redb storage backend.
    pub fn storage_path(&self) -> PathBuf {
        self.storage
            .path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("tessera.redb"))
    }
}
