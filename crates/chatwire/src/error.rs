//! Error types for the channel and the duplex drivers.

use std::io;

/// Failure of a single channel operation.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// Connection reset, broken pipe, truncated frame, or a connection that
    /// closed without an end frame.
    #[error("transport error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },

    /// `send` after `close_send`.
    #[error("send direction already closed")]
    Closed,

    #[error("unexpected open frame in the middle of a stream")]
    UnexpectedOpen,

    #[error("expected stream open header, got a message frame")]
    MissingOpen,

    #[error("connection closed before the stream was opened")]
    HandshakeEof,

    #[error("unknown method: {0}")]
    UnknownMethod(String),
}

impl ChannelError {
    /// True for failures of the underlying transport, as opposed to protocol
    /// violations by the peer.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

/// Terminal result of a duplex driver direction.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("send failed: {0}")]
    Send(ChannelError),

    #[error("receive failed: {0}")]
    Receive(ChannelError),

    #[error("stream cancelled")]
    Cancelled,

    /// The receive unit panicked or was aborted before reporting.
    #[error("receive unit aborted: {0}")]
    ReceiveUnitAborted(String),
}
