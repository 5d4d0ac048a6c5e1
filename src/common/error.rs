//! Error types for the protocol engine.

use thiserror::Error;

/// Low-level wire format errors.
///
/// `Truncated` is not fatal: the framing layer treats it as "wait for more
/// data". Everything else means the peer sent something we cannot accept.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("not enough data to decode the field")]
    Truncated,

    #[error("corrupt packet: {message}")]
    Corrupt { message: String },

    #[error("unknown packet type {0}")]
    UnknownPacketType(u16),

    #[error("string field exceeds maximum length: {got} > {max}")]
    StringTooLong { max: usize, got: usize },

    #[error("compressed block of {0} bytes exceeds the 64 KiB cap")]
    OversizedBlock(usize),

    #[error("failed to inflate compressed body: {message}")]
    Decompression { message: String },
}

impl WireError {
    pub fn corrupt(message: impl Into<String>) -> Self {
        WireError::Corrupt {
            message: message.into(),
        }
    }
}

/// Protocol-level errors: anything that makes the connection unusable.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    #[error("packet {packet} is illegal in state {state}")]
    IllegalPacket {
        state: &'static str,
        packet: &'static str,
    },

    #[error("unexpected packet: expected {expected}, got {got}")]
    UnexpectedPacket {
        expected: &'static str,
        got: &'static str,
    },

    #[error("TLS error: {message}")]
    Tls { message: String },

    #[error("transport detached mid-operation")]
    TransportDetached,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    pub fn tls(message: impl Into<String>) -> Self {
        ProtocolError::Tls {
            message: message.into(),
        }
    }
}

/// Authentication failures observed by the client.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("unknown username")]
    UserNotFound,

    #[error("server rejected the challenge solution")]
    BadCredentials,

    #[error("login challenge expired before the solution arrived")]
    ChallengeExpired,

    #[error("too many failed login attempts")]
    TooManyAttempts,

    #[error("login attempts too frequent, try again later")]
    RateLimited,

    #[error("registration rejected with code {0}")]
    RegistrationRejected(u16),
}

/// Connection lifecycle errors.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("failed to connect to {host}:{port}: {source}")]
    ConnectFailed {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("connection closed by remote")]
    ConnectionClosed,

    #[error("connection timed out")]
    Timeout,

    #[error("server rejected the connection (code {code})")]
    Rejected { code: u8 },

    #[error("request failed with reason code {0}")]
    RequestFailed(u16),

    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Account/map store failures. Surfaced to clients as a transient `Failed(0)`.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage unavailable: {message}")]
    Unavailable { message: String },

    #[error("conflicting record: {message}")]
    Conflict { message: String },

    #[error("record not found")]
    NotFound,
}

impl StorageError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        StorageError::Unavailable {
            message: message.into(),
        }
    }
}

/// Configuration loading and validation failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    IoError {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config: {message}")]
    ParseError { message: String },

    #[error("invalid configuration:\n{}", .errors.join("\n"))]
    ValidationError { errors: Vec<String> },
}

/// Result type alias for wire operations.
pub type WireResult<T> = std::result::Result<T, WireError>;

/// Result type alias for protocol operations.
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;

/// Result type alias for connection operations.
pub type ConnectionResult<T> = std::result::Result<T, ConnectionError>;
