//! Configuration loading and management
//!
//! Handles parsing of `.board.toml` configuration files.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Name of the configuration file looked up in the working directory
pub const CONFIG_FILE: &str = ".board.toml";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Board storage directory
    #[serde(default = "default_dir")]
    pub dir: PathBuf,

    /// Column configuration
    #[serde(default)]
    pub columns: ColumnsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dir: default_dir(),
            columns: ColumnsConfig::default(),
        }
    }
}

fn default_dir() -> PathBuf {
    PathBuf::from(".board")
}

/// Column-related configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnsConfig {
    /// Columns created when a project is initialized
    #[serde(default = "default_column_specs")]
    pub defaults: Vec<ColumnSpec>,
}

impl Default for ColumnsConfig {
    fn default() -> Self {
        Self {
            defaults: default_column_specs(),
        }
    }
}

/// Name and board position of one default column
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub order: i64,
}

fn default_column_specs() -> Vec<ColumnSpec> {
    [("To Do", 0), ("In Progress", 1), ("Done", 2)]
        .into_iter()
        .map(|(name, order)| ColumnSpec {
            name: name.to_string(),
            order,
        })
        .collect()
}

impl Config {
    /// Load configuration from `path`, falling back to defaults when the
    /// file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load `.board.toml` from a directory.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        Self::load(&dir.join(CONFIG_FILE))
    }
}
