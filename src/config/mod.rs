//! Configuration module
//!
//! Handles application settings and their on-disk locations

mod settings;

pub use settings::{AppConfig, ConfigError, DeviceSettings, LoggingConfig, TestSettings};

use directories::ProjectDirs;
use std::path::PathBuf;

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "connect112", "Connect112")
}

/// Get the application configuration directory
pub fn config_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the application data directory
pub fn data_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.data_dir().to_path_buf())
}

/// Get the configuration file path
pub fn config_file() -> Option<PathBuf> {
    config_dir().map(|d| d.join("config.toml"))
}

/// Get the default event log path
pub fn log_file() -> Option<PathBuf> {
    data_dir().map(|d| d.join("log.txt"))
}
