//! Configuration parsing and types.

pub mod env;
pub mod parser;
pub mod types;
pub mod validate;

pub use env::apply_env_overrides;
pub use parser::{load_config, load_config_str};
pub use types::*;
pub use validate::{validate_client_config, validate_server_config};
