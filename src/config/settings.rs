//! Application settings

use crate::core::device::ProtocolTiming;
use crate::core::session::TestMode;
use crate::core::simulator::SimulatorConfig;
use crate::core::transport::SerialConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// No platform config directory
    #[error("Could not determine config directory")]
    NoConfigDir,

    /// Reading or writing the file failed
    #[error("Config file {path}: {source}")]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// File contents are not valid
    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Settings could not be serialized
    #[error("Could not serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Fixture link settings
    pub device: DeviceSettings,
    /// Event log settings
    pub logging: LoggingConfig,
    /// Test defaults
    pub test: TestSettings,
    /// Simulated fixture
    pub simulator: SimulatorConfig,
}

impl AppConfig {
    /// Load config from the default location. A missing file yields defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = super::config_file().ok_or(ConfigError::NoConfigDir)?;
        Self::load_from(&path)
    }

    /// Load config from `path`. A missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<PathBuf, ConfigError> {
        let path = super::config_file().ok_or(ConfigError::NoConfigDir)?;
        self.save_to(&path)?;
        Ok(path)
    }

    /// Save config to `path`, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let io_error = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(io_error)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(io_error)
    }

    /// Event log path, if logging is enabled
    pub fn log_path(&self) -> Option<PathBuf> {
        if !self.logging.enabled {
            return None;
        }
        self.logging.path.clone().or_else(super::log_file)
    }
}

/// Fixture link settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    /// Wait between a command and its reply, in ms
    pub command_settle_ms: u64,
    /// Wait between `IDEN` and its reply, in ms
    pub identify_settle_ms: u64,
    /// Serial line parameters
    pub serial: SerialConfig,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        let timing = ProtocolTiming::default();
        Self {
            command_settle_ms: timing.command_settle.as_millis() as u64,
            identify_settle_ms: timing.identify_settle.as_millis() as u64,
            serial: SerialConfig::default(),
        }
    }
}

impl DeviceSettings {
    /// Protocol delays
    pub fn timing(&self) -> ProtocolTiming {
        ProtocolTiming {
            command_settle: Duration::from_millis(self.command_settle_ms),
            identify_settle: Duration::from_millis(self.identify_settle_ms),
        }
    }
}

/// Event log settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Write the event log
    pub enabled: bool,
    /// Log file; the data directory is used when unset
    pub path: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
        }
    }
}

/// Test defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestSettings {
    /// Mode used when none is given
    pub default_mode: TestMode,
    /// Ask before stopping a run
    pub confirm_stop: bool,
}

impl Default for TestSettings {
    fn default() -> Self {
        Self {
            default_mode: TestMode::Manual,
            confirm_stop: true,
        }
    }
}
