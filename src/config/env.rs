//! Environment variable overrides for configuration.
//!
//! Supports overriding config values with environment variables:
//! - `GATEHOUSE_CONFIG` - config file path
//! - `GATEHOUSE_LISTEN_HOST` - listener bind address
//! - `GATEHOUSE_LISTEN_PORT` - listener port
//! - `GATEHOUSE_SERVER_NAME` - advertised server name
//! - `GATEHOUSE_TLS_CERT` - TLS certificate path
//! - `GATEHOUSE_TLS_KEY` - TLS private key path

use std::env;

use crate::config::types::{ServerConfig, TlsConfig};

/// Environment variable prefix for all config overrides.
const ENV_PREFIX: &str = "GATEHOUSE";

/// Config file path, from `GATEHOUSE_CONFIG` or the default location.
pub fn get_config_path() -> String {
    env::var(format!("{}_CONFIG", ENV_PREFIX)).unwrap_or_else(|_| "gatehouse.json".to_string())
}

/// Apply environment variable overrides to a server config.
///
/// This allows deployment-specific values like bind addresses and key
/// paths to be provided without editing the config file.
pub fn apply_env_overrides(mut config: ServerConfig) -> ServerConfig {
    if let Ok(host) = env::var(format!("{}_LISTEN_HOST", ENV_PREFIX)) {
        config.listen.host = host;
    }
    if let Ok(port) = env::var(format!("{}_LISTEN_PORT", ENV_PREFIX)) {
        if let Ok(port) = port.parse() {
            config.listen.port = port;
        }
    }
    if let Ok(name) = env::var(format!("{}_SERVER_NAME", ENV_PREFIX)) {
        config.identity.server_name = name;
    }

    let cert = env::var(format!("{}_TLS_CERT", ENV_PREFIX)).ok();
    let key = env::var(format!("{}_TLS_KEY", ENV_PREFIX)).ok();
    match (cert, key) {
        (Some(cert_path), Some(key_path)) => {
            config.tls = Some(TlsConfig {
                cert_path,
                key_path,
            });
        }
        (None, None) => {}
        _ => {
            tracing::warn!("ignoring partial tls override: both cert and key are required");
        }
    }

    config
}
