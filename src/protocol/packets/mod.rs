//! Packet catalog, typed bodies, and the stream codec.

pub mod codec;
pub mod messages;
pub mod types;

pub use codec::MessageCodec;
pub use messages::{CharacterSummary, InfoEntry, InventoryEntry, MapPayload, Message};
pub use types::packet_name;
