//! Wire layer for chat streams.
//!
//! # Architecture
//!
//! - **protocol**: Frame types (Open header, Message)
//! - **codec**: JSON framing codec for AsyncRead/AsyncWrite
//! - **channel**: send/receive halves with half-close and end-of-stream
//! - **transport**: open handshake, TCP dial/accept

pub mod channel;
pub mod codec;
pub mod protocol;
pub mod transport;
