//! Runtime configuration loaded from TOML.
//!
//! Every section and field is optional; missing values take their defaults.
//!
//! ```toml
//! [sync]
//! interval_ms = 10000
//! flush_on_shutdown = true
//!
//! [ingest]
//! unknown_site = "reject"   # or "accept"
//!
//! [store]
//! backend = "redb"          # or "memory"
//! path = "data/hitcount.redb"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub sync: SyncConfig,
    pub ingest: IngestConfig,
    pub store: StoreConfig,
}

impl Config {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses, and validates the TOML file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sync.interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "sync.interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.store.backend == StoreBackend::Redb && self.store.path.as_os_str().is_empty() {
            return Err(Error::InvalidConfig(
                "store.path is required for the redb backend".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    /// Milliseconds between flushes.
    pub interval_ms: u64,
    /// Run one last flush when the worker is shut down.
    pub flush_on_shutdown: bool,
}

impl SyncConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_ms: 10_000,
            flush_on_shutdown: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IngestConfig {
    pub unknown_site: UnknownSitePolicy,
}

/// What ingestion does with events for sites that were never registered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownSitePolicy {
    /// Drop the event and report [`IngestOutcome::UnknownSite`](crate::IngestOutcome::UnknownSite).
    #[default]
    Reject,
    /// Buffer it anyway; the next flush creates a zeroed counters row.
    Accept,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Redb,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Database file, used by the redb backend only.
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            path: PathBuf::from("hitcount.redb"),
        }
    }
}
