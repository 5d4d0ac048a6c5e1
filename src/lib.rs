//! Gatehouse - client/server network engine for a tile-based online RPG
//!
//! Implements the full account and lobby protocol: a schema-delimited
//! little-endian wire format with optional zlib compression, mid-stream
//! TLS-wrapped challenge-response authentication, serial-correlated
//! requests, and the character select/create/delete flow, plus the
//! server engine and client engine that speak it.

pub mod client;
pub mod common;
pub mod config;
pub mod correlator;
pub mod protocol;
pub mod server;

pub use client::{Lobby, Session, SessionEvent};
pub use server::{serve_stream, ServerContext, ServerEngine};
