//! Wire protocol types for the `Chat` stream.
//!
//! Every connection carries exactly one stream:
//! - **Open**: first frame, client to server. Names the method and carries
//!   the W3C trace context of the client's stream span.
//! - **Message**: any number of chat messages, in both directions.
//! - **End**: last frame of a direction, written on half-close.
//!
//! A direction whose connection closes without an `End` frame was dropped,
//! not finished.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// The only method this protocol serves.
pub const CHAT_METHOD: &str = "Chat";

/// Unique identifier for one chat stream.
///
/// Chosen by the client and echoed in both sides' logs and spans so the two
/// halves of a conversation can be matched up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(uuid::Uuid);

impl StreamId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        let uuid = uuid::Uuid::parse_str(s)?;
        Ok(Self(uuid))
    }
}

impl Default for StreamId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One chat message. Immutable once built; consumed once by the receiver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub sender: String,
    pub text: String,
}

impl Message {
    pub fn new(sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            text: text.into(),
        }
    }
}

/// Stream header sent by the client before any message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamHeader {
    pub method: String,
    pub stream_id: StreamId,
    /// `traceparent` / `tracestate` of the client's stream span.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub trace_context: HashMap<String, String>,
}

impl StreamHeader {
    pub fn chat(stream_id: StreamId, trace_context: HashMap<String, String>) -> Self {
        Self {
            method: CHAT_METHOD.to_string(),
            stream_id,
            trace_context,
        }
    }
}

/// A single frame on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    Open(StreamHeader),
    Message(Message),
    End,
}
