//! Engine configuration.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::btree::{
    MIN_INTERNAL_MAX_SIZE, MIN_LEAF_MAX_SIZE, internal_max_limit, leaf_max_limit,
};
use crate::file::DEFAULT_POOL_SIZE;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Settings for a `StorageEngine`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Backing page file
    pub db_file: PathBuf,
    /// Number of buffer pool frames
    pub pool_size: usize,
    /// `sync_data` after every page write
    pub sync_on_write: bool,
    /// Leaf capacity override; derived from the page and key size when unset
    pub leaf_max_size: Option<usize>,
    /// Internal page capacity override; derived when unset
    pub internal_max_size: Option<usize>,
    /// Key width in bytes for indexes opened without an explicit width
    pub key_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_file: PathBuf::from("tessera.db"),
            pool_size: DEFAULT_POOL_SIZE,
            sync_on_write: false,
            leaf_max_size: None,
            internal_max_size: None,
            key_size: 8,
        }
    }
}

impl EngineConfig {
    /// Defaults with `db_file` pointed at `path`
    pub fn with_db_file<P: AsRef<Path>>(path: P) -> Self {
        Self {
            db_file: path.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    /// Load and validate a JSON config. Missing fields take their defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let text = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_string(&self) -> ConfigResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.db_file.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("db_file is empty".to_string()));
        }
        if self.pool_size == 0 {
            return Err(ConfigError::Invalid("pool_size must be at least 1".to_string()));
        }

        let leaf_limit = leaf_max_limit(self.key_size);
        if self.key_size == 0 || leaf_limit < MIN_LEAF_MAX_SIZE {
            return Err(ConfigError::Invalid(format!(
                "key_size {} does not fit a page",
                self.key_size
            )));
        }

        if let Some(size) = self.leaf_max_size {
            if !(MIN_LEAF_MAX_SIZE..=leaf_limit).contains(&size) {
                return Err(ConfigError::Invalid(format!(
                    "leaf_max_size {} outside {}..={}",
                    size, MIN_LEAF_MAX_SIZE, leaf_limit
                )));
            }
        }
        if let Some(size) = self.internal_max_size {
            let limit = internal_max_limit(self.key_size);
            if !(MIN_INTERNAL_MAX_SIZE..=limit).contains(&size) {
                return Err(ConfigError::Invalid(format!(
                    "internal_max_size {} outside {}..={}",
                    size, MIN_INTERNAL_MAX_SIZE, limit
                )));
            }
        }
        Ok(())
    }
}
