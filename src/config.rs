use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::graph::{FilterPolicy, OrderStrategy};

/// Config file picked up from the working directory when nothing else is given.
pub const DEFAULT_CONFIG_FILE: &str = "fixdump.toml";

/// Environment variable naming a config file.
pub const CONFIG_ENV: &str = "FIXDUMP_CONFIG";

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub dump: DumpConfig,
    /// `"app.model" = ["column", ...]`
    pub natural_keys: HashMap<String, Vec<String>>,
    pub schema: SchemaConfig,
    pub performance: PerformanceConfig,
}

/// Source database settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub db_path: PathBuf,
    pub log_level: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("db.sqlite3"),
            log_level: default_log_level(),
        }
    }
}

/// Defaults for `dump-object`; command-line flags win.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DumpConfig {
    pub max_depth: Option<usize>,
    pub max_fanout: Option<usize>,
    pub hard_only: bool,
    pub exclude: Vec<String>,
    pub include: Vec<String>,
    pub filter_policy: FilterPolicy,
    pub order: OrderStrategy,
    pub indent: usize,
    pub sample_size: Option<usize>,
}

impl Default for DumpConfig {
    fn default() -> Self {
        Self {
            max_depth: None,
            max_fanout: None,
            hard_only: false,
            exclude: Vec::new(),
            include: Vec::new(),
            filter_policy: FilterPolicy::default(),
            order: OrderStrategy::default(),
            indent: 4,
            sample_size: None,
        }
    }
}

/// Table naming overrides for introspection
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    /// `"app.model" = "table_name"` for tables that don't follow `app_model`.
    pub model_tables: HashMap<String, String>,
}

/// Performance tuning configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Rows kept by the relation lookup cache; 0 disables it.
    pub row_cache_capacity: usize,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            row_cache_capacity: 1024,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration without an explicit path.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration
    ///
    /// Loads environment variables from .env file (if present) first.
    /// Looks for the config file in this order:
    /// 1. `explicit` (the `--config` flag)
    /// 2. Path in the FIXDUMP_CONFIG environment variable
    /// 3. ./fixdump.toml, if it exists
    ///
    /// With none of these, built-in defaults are used.
    pub fn load_from(explicit: Option<&Path>) -> Result<Self> {
        // .env is optional
        let _ = dotenv::dotenv();

        let config_path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => match std::env::var(CONFIG_ENV) {
                Ok(path) => Some(PathBuf::from(path)),
                Err(_) => {
                    let local = PathBuf::from(DEFAULT_CONFIG_FILE);
                    local.exists().then_some(local)
                }
            },
        };

        let config = match config_path {
            Some(path) => {
                let config_str = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read config file: {}", path.display()))?;
                toml::from_str(&config_str)
                    .with_context(|| format!("Failed to parse {}", path.display()))?
            }
            None => {
                log::debug!("No config file found, using defaults");
                Config::default()
            }
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.dump.indent > 16 {
            anyhow::bail!("dump.indent must be at most 16");
        }

        for (type_name, columns) in &self.natural_keys {
            check_type_name(type_name, "natural_keys")?;
            if columns.is_empty() {
                anyhow::bail!("natural_keys.\"{}\" must list at least one column", type_name);
            }
        }

        for type_name in self.schema.model_tables.keys() {
            check_type_name(type_name, "schema.model_tables")?;
        }

        Ok(())
    }

    /// Get database path
    pub fn db_path(&self) -> &Path {
        &self.store.db_path
    }
}

fn check_type_name(type_name: &str, section: &str) -> Result<()> {
    if type_name.matches('.').count() != 1 {
        anyhow::bail!(
            "{}: '{}' must be written as app_name.model_name",
            section,
            type_name
        );
    }
    Ok(())
}
