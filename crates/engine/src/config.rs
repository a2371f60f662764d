//! Pipeline configuration.
//!
//! Precedence (highest to lowest): `WRITETRAIL_*` environment variables, the
//! TOML file named by `WRITETRAIL_CONFIG`, built-in defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use writetrail_storage::{SqliteStorage, StorageError};

pub const CONFIG_PATH_VAR: &str = "WRITETRAIL_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database path; `:memory:` for a private in-memory database.
    pub path: String,
    pub busy_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive.
    pub filter: String,
    pub json: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: ":memory:".to_string(),
            busy_timeout_ms: 5000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
        }
    }
}

impl PipelineConfig {
    /// Load from the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(|key| std::env::var(key).ok())
    }

    /// Read the file named by `WRITETRAIL_CONFIG` if set, then apply
    /// overrides. Both resolve through `lookup`.
    pub fn load_from(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = match lookup(CONFIG_PATH_VAR) {
            Some(path) => Self::load_from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_overrides(lookup)?;
        debug!(?config, "pipeline configuration loaded");
        Ok(config)
    }

    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `WRITETRAIL_*` overrides resolved through `lookup`.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(path) = lookup("WRITETRAIL_DB_PATH") {
            self.storage.path = path;
        }
        if let Some(raw) = lookup("WRITETRAIL_BUSY_TIMEOUT_MS") {
            self.storage.busy_timeout_ms =
                raw.parse().map_err(|_| ConfigError::InvalidValue {
                    key: "WRITETRAIL_BUSY_TIMEOUT_MS".into(),
                    value: raw.clone(),
                })?;
        }
        if let Some(filter) = lookup("WRITETRAIL_LOG") {
            self.logging.filter = filter;
        }
        if let Some(raw) = lookup("WRITETRAIL_LOG_JSON") {
            self.logging.json = match raw.as_str() {
                "1" | "true" => true,
                "0" | "false" => false,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: "WRITETRAIL_LOG_JSON".into(),
                        value: raw.clone(),
                    });
                }
            };
        }
        Ok(())
    }
}

impl StorageConfig {
    pub fn open(&self) -> Result<SqliteStorage, StorageError> {
        if self.path == ":memory:" {
            return SqliteStorage::open_in_memory();
        }
        SqliteStorage::open_with_timeout(&self.path, Duration::from_millis(self.busy_timeout_ms))
    }
}
