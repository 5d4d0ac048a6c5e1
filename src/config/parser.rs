//! Configuration file parsing (JSON format).

use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;

use crate::common::error::ConfigError;

/// Load a configuration value from a JSON file.
pub fn load_config<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, ConfigError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|e| ConfigError::IoError {
        path: path.display().to_string(),
        source: e,
    })?;
    load_config_str(&content)
}

/// Load a configuration value from a JSON string.
pub fn load_config_str<T: DeserializeOwned>(content: &str) -> Result<T, ConfigError> {
    serde_json::from_str(content).map_err(|e| ConfigError::ParseError {
        message: e.to_string(),
    })
}
