//! Configuration type definitions.

use std::time::Duration;

use serde::Deserialize;

/// Root server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub listen: ListenConfig,
    pub identity: IdentityConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    pub tls: Option<TlsConfig>,
}

/// Listener settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ListenConfig {
    pub host: String,
    pub port: u16,
}

/// What the server advertises in `ConnectionAccepted`.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    pub server_name: String,
    #[serde(default)]
    pub news_url: String,
    #[serde(default)]
    pub update_url: String,
    /// Message-of-the-day pushed via `ServerInformation` after login.
    #[serde(default)]
    pub motd: String,
}

/// Connection-count and timing limits.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Total concurrent connections before `ConnectionRejected(6)`.
    #[serde(default = "defaults::max_connections")]
    pub max_connections: usize,
    /// Concurrent connections per source IP.
    #[serde(default = "defaults::max_connections_per_ip")]
    pub max_connections_per_ip: usize,
    /// Seconds of silence before a connection is dropped.
    #[serde(default = "defaults::timeout_secs")]
    pub timeout_secs: u64,
    /// Seconds of send-side idleness before a keep-alive goes out.
    #[serde(default = "defaults::keep_alive_secs")]
    pub keep_alive_secs: u64,
}

/// Authentication policy.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Whether `Register` is accepted at all.
    #[serde(default = "defaults::registration_enabled")]
    pub registration_enabled: bool,
    /// Seconds a login challenge stays answerable.
    #[serde(default = "defaults::challenge_ttl_secs")]
    pub challenge_ttl_secs: u64,
    /// Seconds between login attempts from one connection.
    #[serde(default = "defaults::login_delay_secs")]
    pub login_delay_secs: u64,
    /// Failed attempts before the connection is closed.
    #[serde(default = "defaults::max_login_failures")]
    pub max_login_failures: u32,
    /// Character slots per account.
    #[serde(default = "defaults::max_characters")]
    pub max_characters: usize,
    /// Stat points granted to a new character.
    #[serde(default = "defaults::starting_stat_points")]
    pub starting_stat_points: u32,
}

/// TLS certificate material. Absent means a self-signed development
/// certificate is generated at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct TlsConfig {
    pub cert_path: String,
    pub key_path: String,
}

/// Client-side connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    /// Hex-encoded SHA-256 fingerprint of the server certificate. Empty
    /// means any certificate is accepted (development only).
    #[serde(default)]
    pub pinned_certificate: String,
    #[serde(default = "defaults::timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "defaults::keep_alive_secs")]
    pub keep_alive_secs: u64,
}

mod defaults {
    pub fn max_connections() -> usize {
        500
    }
    pub fn max_connections_per_ip() -> usize {
        4
    }
    pub fn timeout_secs() -> u64 {
        60
    }
    pub fn keep_alive_secs() -> u64 {
        30
    }
    pub fn registration_enabled() -> bool {
        true
    }
    pub fn challenge_ttl_secs() -> u64 {
        15
    }
    pub fn login_delay_secs() -> u64 {
        5
    }
    pub fn max_login_failures() -> u32 {
        3
    }
    pub fn max_characters() -> usize {
        5
    }
    pub fn starting_stat_points() -> u32 {
        30
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        LimitsConfig {
            max_connections: defaults::max_connections(),
            max_connections_per_ip: defaults::max_connections_per_ip(),
            timeout_secs: defaults::timeout_secs(),
            keep_alive_secs: defaults::keep_alive_secs(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        AuthConfig {
            registration_enabled: defaults::registration_enabled(),
            challenge_ttl_secs: defaults::challenge_ttl_secs(),
            login_delay_secs: defaults::login_delay_secs(),
            max_login_failures: defaults::max_login_failures(),
            max_characters: defaults::max_characters(),
            starting_stat_points: defaults::starting_stat_points(),
        }
    }
}

impl LimitsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }
}

impl AuthConfig {
    pub fn challenge_ttl(&self) -> Duration {
        Duration::from_secs(self.challenge_ttl_secs)
    }

    pub fn login_delay(&self) -> Duration {
        Duration::from_secs(self.login_delay_secs)
    }
}
