//! Server configuration.
//!
//! Loaded from TOML. Per-destination sections override the global
//! `[defaults]`; anything not set falls back to built-in defaults.
//!
//! ```toml
//! [server]
//! id = 1
//! ip = "127.0.0.1"
//! port = 11111
//!
//! [defaults]
//! buffer_size = 16384
//! batch_mode = "item_size"
//!
//! [meta]
//! mode = "file"
//! data_dir = "./conf"
//!
//! [destinations.example]
//! ddl_isolation = true
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use sluice_core::store::config::{DEFAULT_BUFFER_MEM_UNIT, DEFAULT_BUFFER_SIZE};
use sluice_core::store::BatchMode;
use sluice_core::StoreConfig;

use crate::error::ServerError;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Server identity and listen address.
    pub server: ServerSection,
    /// Instance settings applied to every destination.
    pub defaults: InstanceConfig,
    /// Cursor persistence.
    pub meta: MetaConfig,
    /// Configured destinations and their overrides.
    pub destinations: BTreeMap<String, InstanceOverrides>,
}

/// `[server]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSection {
    /// Server id.
    pub id: i64,
    /// Listen address.
    pub ip: String,
    /// Listen port.
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            id: 1,
            ip: "127.0.0.1".to_string(),
            port: 11111,
        }
    }
}

/// Settings of one instance.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InstanceConfig {
    /// Ring buffer slots; must be a power of two.
    pub buffer_size: usize,
    /// Bytes per memory unit.
    pub buffer_mem_unit: u64,
    /// Batching discipline.
    pub batch_mode: BatchMode,
    /// Deliver schema changes as singleton batches.
    pub ddl_isolation: bool,
    /// Start on first use instead of at server start.
    pub lazy: bool,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            buffer_mem_unit: DEFAULT_BUFFER_MEM_UNIT,
            batch_mode: BatchMode::ItemSize,
            ddl_isolation: false,
            lazy: false,
        }
    }
}

impl InstanceConfig {
    /// Event store configuration of this instance.
    #[must_use]
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig::builder()
            .buffer_size(self.buffer_size)
            .buffer_mem_unit(self.buffer_mem_unit)
            .batch_mode(self.batch_mode)
            .ddl_isolation(self.ddl_isolation)
            .build()
    }

    fn merged(&self, overrides: &InstanceOverrides) -> Self {
        Self {
            buffer_size: overrides.buffer_size.unwrap_or(self.buffer_size),
            buffer_mem_unit: overrides.buffer_mem_unit.unwrap_or(self.buffer_mem_unit),
            batch_mode: overrides.batch_mode.unwrap_or(self.batch_mode),
            ddl_isolation: overrides.ddl_isolation.unwrap_or(self.ddl_isolation),
            lazy: overrides.lazy.unwrap_or(self.lazy),
        }
    }
}

/// `[destinations.<name>]` section; unset keys inherit `[defaults]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InstanceOverrides {
    /// See [`InstanceConfig::buffer_size`].
    pub buffer_size: Option<usize>,
    /// See [`InstanceConfig::buffer_mem_unit`].
    pub buffer_mem_unit: Option<u64>,
    /// See [`InstanceConfig::batch_mode`].
    pub batch_mode: Option<BatchMode>,
    /// See [`InstanceConfig::ddl_isolation`].
    pub ddl_isolation: Option<bool>,
    /// See [`InstanceConfig::lazy`].
    pub lazy: Option<bool>,
}

/// Where subscriptions and cursors live.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetaMode {
    /// Volatile, lost on restart.
    #[default]
    Memory,
    /// One JSON file per destination under `data_dir`.
    File,
}

/// `[meta]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MetaConfig {
    /// Backend.
    pub mode: MetaMode,
    /// Root directory of the file backend.
    pub data_dir: PathBuf,
}

impl Default for MetaConfig {
    fn default() -> Self {
        Self {
            mode: MetaMode::Memory,
            data_dir: PathBuf::from("./conf"),
        }
    }
}

impl ServerConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Config`] on a syntax error or invalid value.
    pub fn from_toml_str(s: &str) -> Result<Self, ServerError> {
        let config: Self = toml::from_str(s).map_err(|e| ServerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Config`] if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ServerError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ServerError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    /// Checks every destination's store configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Config`] naming the first invalid destination.
    pub fn validate(&self) -> Result<(), ServerError> {
        self.defaults
            .store_config()
            .validate()
            .map_err(|e| ServerError::Config(format!("[defaults]: {e}")))?;
        for name in self.destinations.keys() {
            if name.trim().is_empty() {
                return Err(ServerError::Config("destination name must not be empty".to_string()));
            }
            if let Some(config) = self.instance_config(name) {
                config
                    .store_config()
                    .validate()
                    .map_err(|e| ServerError::Config(format!("[destinations.{name}]: {e}")))?;
            }
        }
        Ok(())
    }

    /// Configured destination names, sorted.
    #[must_use]
    pub fn destination_names(&self) -> Vec<String> {
        self.destinations.keys().cloned().collect()
    }

    /// Effective settings of `destination`; `None` if it is not configured.
    #[must_use]
    pub fn instance_config(&self, destination: &str) -> Option<InstanceConfig> {
        self.destinations
            .get(destination)
            .map(|overrides| self.defaults.merged(overrides))
    }
}
