//! Common utilities and types shared across the engine.

pub mod error;

pub use error::{
    AuthError, ConfigError, ConnectionError, ConnectionResult, ProtocolError, ProtocolResult,
    StorageError, WireError, WireResult,
};
