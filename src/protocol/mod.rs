//! Wire protocol: primitives, packet catalog, framed transport, TLS layer.

pub mod credentials;
pub mod packets;
pub mod secure;
pub mod transport;
pub mod wire;

pub use packets::{Message, MessageCodec};
pub use transport::Conn;
