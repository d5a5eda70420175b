//! Runtime configuration.
//!
//! Stored as TOML in the platform config directory
//! (`<config_dir>/microbit-thermo/config.toml`). Every field has a default, so
//! a missing file or a partial file is fine.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::ble::uuids::DEVICE_NAME_MARKER;
use crate::data::{PersistPolicy, DEFAULT_PERSIST_DEBOUNCE};
use crate::error::{Error, Result};
use crate::notify::NotificationGateway;

const APP_DIR: &str = "microbit-thermo";

/// Configuration for a [`TemperatureMonitor`](crate::TemperatureMonitor).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Substring an advertised name must contain to be accepted.
    pub device_name_marker: String,
    /// Where persisted state lives. Defaults to the platform data directory.
    pub storage_dir: Option<PathBuf>,
    /// Deadline for connect, service discovery and subscription.
    /// `None` waits forever.
    pub connect_timeout_ms: Option<u64>,
    /// Coalesce sample-history writes over this many milliseconds
    /// (default one second). `None` or `0` writes every sample through
    /// immediately.
    pub persist_debounce_ms: Option<u64>,
    /// Sensor sampling period to request from the peripheral.
    pub sample_period_ms: Option<u16>,
    /// Title of the disconnect alert.
    pub alert_title: String,
    /// Body of the disconnect alert.
    pub alert_body: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device_name_marker: DEVICE_NAME_MARKER.to_string(),
            storage_dir: None,
            connect_timeout_ms: Some(20_000),
            persist_debounce_ms: Some(DEFAULT_PERSIST_DEBOUNCE.as_millis() as u64),
            sample_period_ms: None,
            alert_title: NotificationGateway::DEFAULT_TITLE.to_string(),
            alert_body: NotificationGateway::DEFAULT_BODY.to_string(),
        }
    }
}

impl Config {
    /// Platform location of the config file.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("config.toml")
    }

    /// Load from [`Config::default_path`], using defaults if the file is absent.
    pub fn load() -> Result<Self> {
        Self::load_from(Self::default_path())
    }

    /// Load from `path`, using defaults if the file is absent.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(contents) => {
                let config = toml::from_str(&contents).map_err(|e| Error::Config {
                    reason: format!("{}: {}", path.display(), e),
                })?;
                debug!("Loaded config from {}", path.display());
                Ok(config)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(Error::Config {
                reason: format!("{}: {}", path.display(), e),
            }),
        }
    }

    /// Write this config to `path`, creating parent directories.
    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self).map_err(|e| Error::Config {
            reason: e.to_string(),
        })?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Resolved storage directory.
    pub fn storage_dir(&self) -> PathBuf {
        self.storage_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(APP_DIR)
        })
    }

    /// Connect deadline as a duration.
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }

    /// Sample-history persistence policy.
    pub fn persist_policy(&self) -> PersistPolicy {
        match self.persist_debounce_ms {
            Some(ms) if ms > 0 => PersistPolicy::Debounced(Duration::from_millis(ms)),
            _ => PersistPolicy::Immediate,
        }
    }
}
