//! Message channel halves.
//!
//! A chat stream is split into a [`MessageSink`] (write half) and a
//! [`MessageSource`] (read half). Each half is owned by exactly one unit of
//! work, so neither needs locking.

use std::io;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite};

use super::codec::FrameCodec;
use super::protocol::{Frame, Message, StreamHeader};
use crate::error::ChannelError;

/// Outbound direction of a stream.
#[async_trait]
pub trait MessageSink: Send {
    /// Deliver one message to the peer. Waits for transport buffer space.
    async fn send(&mut self, message: Message) -> Result<(), ChannelError>;

    /// Half-close: flush everything sent so far and signal that no more
    /// messages follow. The inbound direction stays usable.
    async fn close_send(&mut self) -> Result<(), ChannelError>;
}

/// Inbound direction of a stream.
#[async_trait]
pub trait MessageSource: Send {
    /// Next inbound message.
    ///
    /// `Ok(None)` is the peer's clean end-of-stream; it is not an error.
    /// Must be cancel safe: dropping the future loses no message.
    async fn receive(&mut self) -> Result<Option<Message>, ChannelError>;
}

/// Write half backed by a length-delimited JSON framer.
pub struct FramedSink<W> {
    inner: FramedWrite<W, FrameCodec>,
    closed: bool,
}

impl<W: AsyncWrite + Unpin + Send> FramedSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            inner: FramedWrite::new(writer, FrameCodec::new()),
            closed: false,
        }
    }

    /// Send the stream header. Must be the first frame on the connection.
    pub async fn open(&mut self, header: StreamHeader) -> Result<(), ChannelError> {
        if self.closed {
            return Err(ChannelError::Closed);
        }
        self.inner.send(Frame::Open(header)).await?;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> MessageSink for FramedSink<W> {
    async fn send(&mut self, message: Message) -> Result<(), ChannelError> {
        if self.closed {
            return Err(ChannelError::Closed);
        }
        self.inner.send(Frame::Message(message)).await?;
        Ok(())
    }

    async fn close_send(&mut self) -> Result<(), ChannelError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.inner.feed(Frame::End).await?;
        // Flushes buffered frames, then shuts down the write side.
        self.inner.close().await?;
        Ok(())
    }
}

/// Read half backed by a length-delimited JSON framer.
pub struct FramedSource<R> {
    inner: FramedRead<R, FrameCodec>,
    ended: bool,
}

impl<R: AsyncRead + Unpin + Send> FramedSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            inner: FramedRead::new(reader, FrameCodec::new()),
            ended: false,
        }
    }

    /// Read the stream header. Must be called before any `receive`.
    pub async fn read_header(&mut self) -> Result<StreamHeader, ChannelError> {
        match self.inner.next().await {
            Some(Ok(Frame::Open(header))) => Ok(header),
            Some(Ok(Frame::Message(_) | Frame::End)) => Err(ChannelError::MissingOpen),
            Some(Err(e)) => Err(e),
            None => Err(ChannelError::HandshakeEof),
        }
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> MessageSource for FramedSource<R> {
    async fn receive(&mut self) -> Result<Option<Message>, ChannelError> {
        if self.ended {
            return Ok(None);
        }
        match self.inner.next().await {
            Some(Ok(Frame::Message(message))) => Ok(Some(message)),
            Some(Ok(Frame::End)) => {
                self.ended = true;
                Ok(None)
            }
            Some(Ok(Frame::Open(_))) => Err(ChannelError::UnexpectedOpen),
            Some(Err(e)) => Err(e),
            None => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed without an end frame",
            )
            .into()),
        }
    }
}
