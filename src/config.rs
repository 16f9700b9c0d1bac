// ⚙️ Registry configuration
// Loaded from TOML; every field has a default so an empty file is valid.
//
// The remote-sync settings live here and are passed explicitly to whoever
// needs them, instead of being fetched from a settings table at call time.

use crate::error::{RegistryError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable that overrides `database.path`
pub const DB_PATH_ENV: &str = "REGISTRY_DB";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub database: DatabaseConfig,
    pub engine: EngineConfig,
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file (WAL mode)
    pub path: PathBuf,

    /// How long a writer waits for the lock before giving up
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            path: PathBuf::from("registry.db"),
            busy_timeout_ms: 5_000,
        }
    }
}

/// Matching thresholds and scan bounds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Duplicate candidates must score strictly above this (0.0 - 1.0)
    pub duplicate_threshold: f64,

    /// Max duplicate candidates returned
    pub duplicate_limit: usize,

    /// Composite member-search score a candidate must exceed
    pub search_threshold: f64,

    /// Weighted parent-search score a candidate must exceed (0.0 - 1.0)
    pub parent_threshold: f64,

    /// Max parent-search results
    pub parent_limit: usize,

    /// Upper bound on rows loaded for a single scan
    pub candidate_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            duplicate_threshold: 0.6,
            duplicate_limit: 10,
            search_threshold: 1.5,
            parent_threshold: 0.55,
            parent_limit: 20,
            candidate_limit: 5_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Pending audit entries handed to the sync service per batch
    pub batch_size: usize,

    /// Label of the remote store, only used in log lines
    pub remote_name: Option<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            batch_size: 100,
            remote_name: None,
        }
    }
}

impl RegistryConfig {
    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: RegistryConfig =
            toml::from_str(content).map_err(|e| RegistryError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file, then apply environment overrides
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RegistryError::Config(format!("Cannot read {}: {}", path.display(), e))
        })?;
        let mut config = Self::from_toml_str(&content)?;
        config.apply_env();
        Ok(config)
    }

    /// Defaults plus environment overrides (no file)
    pub fn from_env() -> Self {
        let mut config = RegistryConfig::default();
        config.apply_env();
        config
    }

    fn apply_env(&mut self) {
        if let Ok(path) = std::env::var(DB_PATH_ENV) {
            if !path.trim().is_empty() {
                self.database.path = PathBuf::from(path);
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        let engine = &self.engine;
        for (name, value) in [
            ("duplicate_threshold", engine.duplicate_threshold),
            ("parent_threshold", engine.parent_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(RegistryError::Config(format!(
                    "engine.{} must be between 0.0 and 1.0, got {}",
                    name, value
                )));
            }
        }
        if engine.candidate_limit == 0 {
            return Err(RegistryError::Config(
                "engine.candidate_limit must be positive".to_string(),
            ));
        }
        if self.sync.batch_size == 0 {
            return Err(RegistryError::Config(
                "sync.batch_size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
