//! Daemon runtime configuration.
//!
//! Read from an optional TOML file. Every field has a default, so a missing
//! file is the same as an empty one.

use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

use crate::error::{DaemonError, Result};
use crate::journal::DEFAULT_QUEUE_CAPACITY;

pub const CONFIG_ENV: &str = "ETERNAL_CONFIG";
const APP_DIR: &str = "eternal";
const CONFIG_FILE: &str = "daemon.toml";
const DB_FILE: &str = "history.db";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    pub db_path: Option<PathBuf>,
    pub queue_capacity: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl DaemonConfig {
    pub fn db_path(&self) -> Result<PathBuf> {
        match &self.db_path {
            Some(path) => Ok(path.clone()),
            None => default_db_path(),
        }
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity.max(1)
    }
}

pub fn load(path: Option<PathBuf>) -> Result<DaemonConfig> {
    let config_path = match path {
        Some(path) => path,
        None => default_config_path()?,
    };

    if !config_path.exists() {
        return Ok(DaemonConfig::default());
    }

    let content = fs_err::read_to_string(&config_path)
        .map_err(DaemonError::io("Failed to read daemon config"))?;
    parse(&config_path, &content)
}

fn parse(path: &Path, content: &str) -> Result<DaemonConfig> {
    toml::from_str::<DaemonConfig>(content).map_err(|err| DaemonError::ConfigMalformed {
        path: path.to_path_buf(),
        details: err.message().to_string(),
    })
}

pub fn default_config_path() -> Result<PathBuf> {
    if let Some(path) = env::var_os(CONFIG_ENV).filter(|value| !value.is_empty()) {
        return Ok(PathBuf::from(path));
    }
    let base = dirs::config_dir()
        .ok_or_else(|| DaemonError::PathResolution("Config directory not found".to_string()))?;
    Ok(base.join(APP_DIR).join(CONFIG_FILE))
}

fn default_db_path() -> Result<PathBuf> {
    let base = dirs::data_dir()
        .ok_or_else(|| DaemonError::PathResolution("Data directory not found".to_string()))?;
    Ok(base.join(APP_DIR).join(DB_FILE))
}
