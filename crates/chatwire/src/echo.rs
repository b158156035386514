//! Server-side message processing.

use crate::bridge::protocol::Message;

/// Sender name on every server reply.
pub const SERVER_SENDER: &str = "Server";

/// Turns one inbound message into at most one reply.
///
/// Runs inline on the stream's loop: implementations must not block or do
/// I/O.
pub trait ProcessingHook: Send + Sync + 'static {
    fn process(&self, inbound: &Message) -> Option<Message>;
}

/// Replies to every message with `"Echo: " + text`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoHook;

impl ProcessingHook for EchoHook {
    fn process(&self, inbound: &Message) -> Option<Message> {
        Some(Message::new(SERVER_SENDER, format!("Echo: {}", inbound.text)))
    }
}
