//! Configuration for training and for the compute device.
//!
//! Both configuration structs are plain `serde` values with `Default`
//! implementations, `with_*` builders, `validate()`, and file loading from
//! TOML or JSON.

pub mod device;
pub mod trainer;

pub use device::DeviceConfig;
pub use trainer::TrainerParams;

use crate::core::error::{ForestError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigFormat {
    /// TOML configuration format
    Toml,
    /// JSON configuration format
    Json,
}

impl ConfigFormat {
    /// Detects the format from a file extension
    pub fn from_path(path: &Path) -> Result<Self> {
        match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => Ok(ConfigFormat::Toml),
            Some("json") => Ok(ConfigFormat::Json),
            _ => Err(ForestError::config(format!(
                "Unsupported config file format for {}. Use .json or .toml",
                path.display()
            ))),
        }
    }
}

pub(crate) fn load_document<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let format = ConfigFormat::from_path(path)?;
    let content = std::fs::read_to_string(path)
        .map_err(|e| ForestError::config(format!("Failed to read config file: {}", e)))?;

    let value = match format {
        ConfigFormat::Json => serde_json::from_str(&content)?,
        ConfigFormat::Toml => toml::from_str(&content)?,
    };
    Ok(value)
}

pub(crate) fn save_document<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    let content = match ConfigFormat::from_path(path)? {
        ConfigFormat::Json => serde_json::to_string_pretty(value)?,
        ConfigFormat::Toml => toml::to_string_pretty(value)
            .map_err(|e| ForestError::config(format!("Failed to serialize to TOML: {}", e)))?,
    };

    std::fs::write(path, content)
        .map_err(|e| ForestError::config(format!("Failed to write config file: {}", e)))?;
    Ok(())
}
