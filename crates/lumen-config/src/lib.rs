//! # lumen-config
//!
//! Configuration management for Lumen.
//!
//! Loads configuration from:
//! 1. `~/.lumen/config.toml` (global)
//! 2. `.lumen/config.toml` (project-local, overrides global)
//! 3. Environment variables (highest priority)
//!
//! The persistent cache backends need `storage.base_path` and
//! `storage.database_name`; those are required keys, and resolving a
//! config without them is a fatal `ConfigError` at startup, never a
//! silent default.

pub mod logging;

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::debug;

use lumen_block::BlockSize;

/// Global config instance
static CONFIG: Lazy<RwLock<Config>> = Lazy::new(|| RwLock::new(Config::load().unwrap_or_default()));

/// Get global config (read-only)
pub fn config() -> std::sync::RwLockReadGuard<'static, Config> {
    CONFIG.read().unwrap()
}

/// Reload config from disk
pub fn reload() -> Result<(), ConfigError> {
    let new_config = Config::load()?;
    *CONFIG.write().unwrap() = new_config;
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    /// A key the persistent backends cannot run without.
    #[error("missing required config key: {0}")]
    MissingKey(&'static str),
    #[error("unknown block size name: {0:?}")]
    UnknownBlockSize(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub ingest: IngestConfig,
}

impl Config {
    /// Load config from standard locations
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        // 1. Load global config (~/.lumen/config.toml)
        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                debug!("Loading global config from {:?}", global_path);
                let contents = std::fs::read_to_string(&global_path)?;
                config = toml::from_str(&contents)?;
            }
        }

        // 2. Load project config (.lumen/config.toml) - overrides global
        let project_path = Path::new(".lumen/config.toml");
        if project_path.exists() {
            debug!("Loading project config from {:?}", project_path);
            let contents = std::fs::read_to_string(project_path)?;
            let project_config: Config = toml::from_str(&contents)?;
            config.merge(project_config);
        }

        // 3. Apply environment variable overrides
        config.apply_env_overrides();

        Ok(config)
    }

    /// Global config path: ~/.lumen/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".lumen/config.toml"))
    }

    /// Merge another config (project overrides)
    fn merge(&mut self, other: Config) {
        if other.storage.base_path.is_some() {
            self.storage.base_path = other.storage.base_path;
        }
        if other.storage.database_name.is_some() {
            self.storage.database_name = other.storage.database_name;
        }
        if !other.storage.backend.is_empty() {
            self.storage.backend = other.storage.backend;
        }
        if !other.ingest.block_size.is_empty() {
            self.ingest.block_size = other.ingest.block_size;
        }
        if other.ingest.retention_days != IngestConfig::default().retention_days {
            self.ingest.retention_days = other.ingest.retention_days;
        }
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("LUMEN_BASE_PATH") {
            self.storage.base_path = Some(PathBuf::from(path));
        }
        if let Ok(name) = std::env::var("LUMEN_DATABASE_NAME") {
            self.storage.database_name = Some(name);
        }
        if let Ok(size) = std::env::var("LUMEN_BLOCK_SIZE") {
            self.ingest.block_size = size;
        }
    }

    /// Generate default config TOML string
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Config::default()).unwrap_or_default()
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Cache backend: "memory", "disk", or "kv"
    pub backend: String,
    /// Root directory for the persistent backends
    pub base_path: Option<PathBuf>,
    /// Database name, used as the shard subdirectory / LMDB name
    pub database_name: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: "disk".to_string(),
            base_path: None,
            database_name: None,
        }
    }
}

impl StorageConfig {
    /// Resolve the required keys, failing loudly when either is absent.
    pub fn resolved(&self) -> Result<(PathBuf, String), ConfigError> {
        let base = self
            .base_path
            .clone()
            .ok_or(ConfigError::MissingKey("storage.base_path"))?;
        let database = self
            .database_name
            .clone()
            .ok_or(ConfigError::MissingKey("storage.database_name"))?;
        Ok((base, database))
    }
}

/// Ingest configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Data block size name: micro, message, tiny, small, medium, large
    pub block_size: String,
    /// Default storage contract retention in days
    pub retention_days: i64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            block_size: "small".to_string(),
            retention_days: lumen_block::DEFAULT_RETENTION_DAYS,
        }
    }
}

impl IngestConfig {
    /// Parse the configured block size name.
    pub fn parsed_block_size(&self) -> Result<BlockSize, ConfigError> {
        match self.block_size.to_lowercase().as_str() {
            "micro" => Ok(BlockSize::Micro),
            "message" => Ok(BlockSize::Message),
            "tiny" => Ok(BlockSize::Tiny),
            "small" => Ok(BlockSize::Small),
            "medium" => Ok(BlockSize::Medium),
            "large" => Ok(BlockSize::Large),
            other => Err(ConfigError::UnknownBlockSize(other.to_string())),
        }
    }
}
