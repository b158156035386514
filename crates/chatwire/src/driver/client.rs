//! Client side of a chat stream.
//!
//! Two units of work per stream:
//! - **send unit** (caller's task): reads outbound lines, sends them, then
//!   half-closes the stream.
//! - **receive unit** (spawned task): reads replies until the server ends
//!   the stream or the transport fails.
//!
//! `run` returns only after the receive unit has finished, so no reply that
//! the server sent before its end-of-stream is lost.

use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, Lines};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::Span;

use crate::bridge::channel::{FramedSink, FramedSource, MessageSink, MessageSource};
use crate::bridge::protocol::{Message, StreamHeader, StreamId};
use crate::bridge::transport::{self, TcpSink, TcpSource};
use crate::error::{ChannelError, ChatError};
use crate::trace::{
    RECEIVE_MESSAGE_SPAN, SEND_MESSAGE_SPAN, STREAM_SPAN, SpanGuard, TraceCorrelator,
};

/// Sender name on every client message.
pub const CLIENT_SENDER: &str = "ClientUser";

/// Input line that ends the send direction.
pub const DEFAULT_TERMINATE_TOKEN: &str = "exit";

/// Source of outbound text for the send unit.
#[async_trait]
pub trait OutboundSource: Send {
    /// Next line to send, `Ok(None)` at end of input. Must be cancel safe.
    async fn next_line(&mut self) -> io::Result<Option<String>>;
}

/// Line-oriented input, optionally prompting on stderr before each read.
pub struct LineInput<R> {
    lines: Lines<R>,
    prompt: Option<String>,
}

impl<R: AsyncBufRead + Unpin + Send> LineInput<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            prompt: None,
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> OutboundSource for LineInput<R> {
    async fn next_line(&mut self) -> io::Result<Option<String>> {
        if let Some(ref prompt) = self.prompt {
            let mut stderr = tokio::io::stderr();
            stderr.write_all(prompt.as_bytes()).await?;
            stderr.flush().await?;
        }
        self.lines.next_line().await
    }
}

/// An opened client stream: both halves plus the span covering its life.
pub struct ClientStream<S, K> {
    stream_id: StreamId,
    span: SpanGuard,
    source: S,
    sink: K,
}

impl<S, K> ClientStream<S, K> {
    pub fn new(stream_id: StreamId, span: SpanGuard, source: S, sink: K) -> Self {
        Self {
            stream_id,
            span,
            source,
            sink,
        }
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }
}

/// What one client stream did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientSummary {
    pub sent: u64,
    pub received: u64,
}

pub struct ClientDriver {
    correlator: TraceCorrelator,
    sender: String,
    terminate_token: String,
    inbox: Option<mpsc::UnboundedSender<Message>>,
}

impl ClientDriver {
    pub fn new(correlator: TraceCorrelator) -> Self {
        Self {
            correlator,
            sender: CLIENT_SENDER.to_string(),
            terminate_token: DEFAULT_TERMINATE_TOKEN.to_string(),
            inbox: None,
        }
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = sender.into();
        self
    }

    pub fn with_terminate_token(mut self, token: impl Into<String>) -> Self {
        self.terminate_token = token.into();
        self
    }

    /// Forward every received message to `inbox` (in addition to logging it).
    pub fn with_inbox(mut self, inbox: mpsc::UnboundedSender<Message>) -> Self {
        self.inbox = Some(inbox);
        self
    }

    fn begin_stream(&self) -> (SpanGuard, StreamHeader) {
        let stream_id = StreamId::new();
        let span = self
            .correlator
            .start_stream_span(STREAM_SPAN, stream_id, None);
        let header = StreamHeader::chat(stream_id, self.correlator.inject_context(&span));
        (span, header)
    }

    /// Open a stream over an existing connection.
    pub async fn open<R, W>(
        &self,
        reader: R,
        writer: W,
    ) -> Result<ClientStream<FramedSource<R>, FramedSink<W>>, ChannelError>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        let (span, header) = self.begin_stream();
        let stream_id = header.stream_id;
        let (source, sink) = span.record_result(transport::open_stream(reader, writer, header).await)?;
        Ok(ClientStream::new(stream_id, span, source, sink))
    }

    /// Dial `addr` and open a stream.
    pub async fn dial(&self, addr: &str) -> Result<ClientStream<TcpSource, TcpSink>, ChannelError> {
        let (span, header) = self.begin_stream();
        let stream_id = header.stream_id;
        let (source, sink) = span.record_result(transport::dial(addr, header).await)?;
        tracing::info!(parent: span.span(), %addr, %stream_id, "Connected to chat server");
        Ok(ClientStream::new(stream_id, span, source, sink))
    }

    /// Drive both directions of `stream` to completion.
    ///
    /// Ends the send direction on end of input, on the terminate token or on
    /// cancellation, then waits for the server's end-of-stream. A receive
    /// failure takes precedence over a send failure in the result.
    pub async fn run<I, S, K>(
        &self,
        stream: ClientStream<S, K>,
        input: I,
        cancel: CancellationToken,
    ) -> Result<ClientSummary, ChatError>
    where
        I: OutboundSource,
        S: MessageSource + 'static,
        K: MessageSink,
    {
        let ClientStream {
            stream_id,
            span: stream_span,
            source,
            mut sink,
        } = stream;
        tracing::debug!(parent: stream_span.span(), %stream_id, "Starting duplex stream");

        let receive_unit = tokio::spawn(receive_loop(
            self.correlator,
            stream_span.span().clone(),
            source,
            self.inbox.clone(),
            cancel.clone(),
        ));

        let (sent, mut send_result) = self
            .send_loop(stream_span.span(), &mut sink, input, &cancel)
            .await;

        if let Err(e) = sink.close_send().await {
            tracing::warn!(parent: stream_span.span(), error = %e, "Error closing send stream");
            if send_result.is_ok() {
                send_result = Err(ChatError::Send(e));
            }
        }

        let receive_result = match receive_unit.await {
            Ok(result) => result,
            Err(e) => Err(ChatError::ReceiveUnitAborted(e.to_string())),
        };

        let result = match (receive_result, send_result) {
            (Err(e), _) | (Ok(_), Err(e)) => Err(e),
            (Ok(received), Ok(())) => Ok(ClientSummary { sent, received }),
        };
        let result = stream_span.record_result(result);
        stream_span.end();
        result
    }

    async fn send_loop<I, K>(
        &self,
        parent: &Span,
        sink: &mut K,
        mut input: I,
        cancel: &CancellationToken,
    ) -> (u64, Result<(), ChatError>)
    where
        I: OutboundSource,
        K: MessageSink,
    {
        let mut sent = 0;

        loop {
            let line = tokio::select! {
                biased;

                _ = cancel.cancelled() => break,
                line = input.next_line() => line,
            };

            let text = match line {
                Ok(Some(text)) if text == self.terminate_token => break,
                Ok(Some(text)) => text,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(parent: parent, error = %e, "Failed to read input, ending send direction");
                    break;
                }
            };

            let msg_span =
                self.correlator
                    .start_message_span(parent, SEND_MESSAGE_SPAN, &self.sender, sent + 1);
            if let Err(e) = sink.send(Message::new(self.sender.as_str(), text)).await {
                msg_span.record_error(&e);
                return (sent, Err(ChatError::Send(e)));
            }
            sent += 1;
            msg_span.end();
        }

        (sent, Ok(()))
    }
}

async fn receive_loop<S: MessageSource>(
    correlator: TraceCorrelator,
    parent: Span,
    mut source: S,
    mut inbox: Option<mpsc::UnboundedSender<Message>>,
    cancel: CancellationToken,
) -> Result<u64, ChatError> {
    let mut received = 0;

    loop {
        let inbound = tokio::select! {
            biased;

            _ = cancel.cancelled() => return Err(ChatError::Cancelled),
            inbound = source.receive() => inbound,
        };

        let message = match inbound {
            Ok(Some(message)) => message,
            Ok(None) => {
                tracing::info!(parent: &parent, received, "Server closed the stream");
                return Ok(received);
            }
            Err(e) => return Err(ChatError::Receive(e)),
        };

        received += 1;
        let msg_span =
            correlator.start_message_span(&parent, RECEIVE_MESSAGE_SPAN, &message.sender, received);
        tracing::info!(
            parent: msg_span.span(),
            "Received message from {}: {}",
            message.sender,
            message.text
        );
        if let Some(ref tx) = inbox
            && tx.send(message).is_err()
        {
            tracing::debug!(parent: &parent, "Inbox receiver dropped, no longer forwarding messages");
            inbox = None;
        }
        msg_span.end();
    }
}
