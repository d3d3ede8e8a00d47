// src/config.rs - host configuration
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Main configuration, loaded from TOML. Every field has a default so a
/// missing or partial file still yields a usable host.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub printing: PrintingConfig,

    #[serde(default)]
    pub spooler: SpoolerConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PrintingConfig {
    /// Gate checked before any print request is accepted.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Display name the spooler shows for documents from this session.
    #[serde(default = "default_source_name")]
    pub source_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SpoolerConfig {
    #[serde(default = "default_device_name")]
    pub device_name: String,

    #[serde(default = "default_copies")]
    pub copies: u32,
}

impl Default for PrintingConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            source_name: default_source_name(),
        }
    }
}

impl Default for SpoolerConfig {
    fn default() -> Self {
        Self {
            device_name: default_device_name(),
            copies: default_copies(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_source_name() -> String {
    "untitled document".to_string()
}

fn default_device_name() -> String {
    "PDF".to_string()
}

fn default_copies() -> u32 {
    1
}

pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let raw = fs::read_to_string(path)?;
    Ok(toml::from_str(&raw)?)
}
