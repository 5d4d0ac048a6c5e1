//! Client engine: sequential pre-session handshake, then an event-driven
//! gameplay session.

pub mod handshake;
pub mod session;

pub use handshake::{Lobby, ServerGreeting};
pub use session::{CloseReason, Session, SessionEvent};
