//! Configuration validation.
//!
//! Validates configuration values and provides helpful error messages.

use crate::common::error::ConfigError;
use crate::config::types::{ClientConfig, ServerConfig};
use crate::protocol::packets::types::{MAX_SERVER_NAME_LEN, MAX_URL_LEN};

/// Validate a server configuration and return detailed errors.
pub fn validate_server_config(config: &ServerConfig) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    if config.listen.host.is_empty() {
        errors.push("listen.host is required".to_string());
    }
    if config.listen.port == 0 {
        errors.push("listen.port must be non-zero".to_string());
    }

    if config.identity.server_name.is_empty() {
        errors.push("identity.server_name is required".to_string());
    }
    if config.identity.server_name.len() > MAX_SERVER_NAME_LEN {
        errors.push(format!(
            "identity.server_name must be at most {} bytes (got {})",
            MAX_SERVER_NAME_LEN,
            config.identity.server_name.len()
        ));
    }
    for (field, value) in [
        ("identity.news_url", &config.identity.news_url),
        ("identity.update_url", &config.identity.update_url),
    ] {
        if value.len() > MAX_URL_LEN {
            errors.push(format!(
                "{} must be at most {} bytes (got {})",
                field,
                MAX_URL_LEN,
                value.len()
            ));
        }
    }

    if config.limits.max_connections == 0 {
        errors.push("limits.max_connections must be non-zero".to_string());
    }
    if config.limits.max_connections_per_ip == 0 {
        errors.push("limits.max_connections_per_ip must be non-zero".to_string());
    }
    if config.limits.keep_alive_secs >= config.limits.timeout_secs {
        errors.push(format!(
            "limits.keep_alive_secs ({}) must be below limits.timeout_secs ({})",
            config.limits.keep_alive_secs, config.limits.timeout_secs
        ));
    }

    if config.auth.max_login_failures == 0 {
        errors.push("auth.max_login_failures must be non-zero".to_string());
    }
    if config.auth.max_characters == 0 {
        errors.push("auth.max_characters must be non-zero".to_string());
    }

    if let Some(ref tls) = config.tls {
        if tls.cert_path.is_empty() {
            errors.push("tls.cert_path is required when tls is set".to_string());
        }
        if tls.key_path.is_empty() {
            errors.push("tls.key_path is required when tls is set".to_string());
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError { errors })
    }
}

/// Validate a client configuration.
pub fn validate_client_config(config: &ClientConfig) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    if config.host.is_empty() {
        errors.push("host is required".to_string());
    }
    if config.port == 0 {
        errors.push("port must be non-zero".to_string());
    }
    if !config.pinned_certificate.is_empty() {
        let hex = &config.pinned_certificate;
        if hex.len() != 64 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            errors.push("pinned_certificate must be 64 hex characters".to_string());
        }
    }
    if config.keep_alive_secs >= config.timeout_secs {
        errors.push(format!(
            "keep_alive_secs ({}) must be below timeout_secs ({})",
            config.keep_alive_secs, config.timeout_secs
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError { errors })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parser::load_config_str;

    #[test]
    fn minimal_server_config_passes() {
        let config: ServerConfig = load_config_str(
            r#"{
                "listen": { "host": "0.0.0.0", "port": 24020 },
                "identity": { "server_name": "Test Server" }
            }"#,
        )
        .unwrap();
        validate_server_config(&config).unwrap();
        assert_eq!(config.limits.timeout_secs, 60);
        assert_eq!(config.auth.challenge_ttl_secs, 15);
    }

    #[test]
    fn keep_alive_must_beat_timeout() {
        let config: ServerConfig = load_config_str(
            r#"{
                "listen": { "host": "0.0.0.0", "port": 24020 },
                "identity": { "server_name": "Test Server" },
                "limits": { "keep_alive_secs": 60, "timeout_secs": 60 }
            }"#,
        )
        .unwrap();
        assert!(validate_server_config(&config).is_err());
    }

    #[test]
    fn bad_fingerprint_is_rejected() {
        let config: ClientConfig = load_config_str(
            r#"{ "host": "play.example.com", "port": 24020, "pinned_certificate": "zz" }"#,
        )
        .unwrap();
        assert!(validate_client_config(&config).is_err());
    }
}
