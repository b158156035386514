//! Duplex drivers: one per role.
//!
//! The client runs its send and receive directions as separate units; the
//! server runs a single receive-then-reply loop. Both own their stream's
//! span and close it on every exit path.

pub mod client;
pub mod server;

pub use client::{
    CLIENT_SENDER, ClientDriver, ClientStream, ClientSummary, DEFAULT_TERMINATE_TOKEN, LineInput,
    OutboundSource,
};
pub use server::{ServerDriver, StreamSummary};
