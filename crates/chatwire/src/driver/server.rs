//! Server side of a chat stream: receive, process, reply.

use tokio_util::sync::CancellationToken;

use crate::bridge::channel::{MessageSink, MessageSource};
use crate::bridge::protocol::StreamHeader;
use crate::echo::ProcessingHook;
use crate::error::ChatError;
use crate::trace::{RECEIVE_MESSAGE_SPAN, STREAM_SPAN, SpanGuard, TraceCorrelator};

/// What one served stream did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamSummary {
    pub received: u64,
    pub replied: u64,
}

/// Drives server streams with one processing hook.
pub struct ServerDriver<H> {
    correlator: TraceCorrelator,
    hook: H,
}

impl<H: ProcessingHook> ServerDriver<H> {
    pub fn new(correlator: TraceCorrelator, hook: H) -> Self {
        Self { correlator, hook }
    }

    /// Serve one accepted stream until the client half-closes, the
    /// transport fails or `cancel` fires.
    ///
    /// The stream span is opened here (as a child of the client's
    /// propagated context) and closed on return, whatever the outcome.
    pub async fn run<S, K>(
        &self,
        header: &StreamHeader,
        source: S,
        sink: K,
        cancel: CancellationToken,
    ) -> Result<StreamSummary, ChatError>
    where
        S: MessageSource,
        K: MessageSink,
    {
        let stream_span = self.correlator.start_stream_span(
            STREAM_SPAN,
            header.stream_id,
            Some(&header.trace_context),
        );
        tracing::info!(parent: stream_span.span(), stream_id = %header.stream_id, "Client connected for chat");

        let result = self.drive(&stream_span, source, sink, cancel).await;
        let result = stream_span.record_result(result);
        stream_span.end();
        result
    }

    async fn drive<S, K>(
        &self,
        stream_span: &SpanGuard,
        mut source: S,
        mut sink: K,
        cancel: CancellationToken,
    ) -> Result<StreamSummary, ChatError>
    where
        S: MessageSource,
        K: MessageSink,
    {
        let mut summary = StreamSummary::default();

        loop {
            let inbound = tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    tracing::info!(parent: stream_span.span(), "Stream cancelled");
                    return Err(ChatError::Cancelled);
                }
                inbound = source.receive() => inbound,
            };

            let message = match inbound {
                Ok(Some(message)) => message,
                Ok(None) => {
                    tracing::info!(parent: stream_span.span(), received = summary.received, "Client ended the stream");
                    break;
                }
                Err(e) => return Err(ChatError::Receive(e)),
            };

            summary.received += 1;
            let msg_span = self.correlator.start_message_span(
                stream_span.span(),
                RECEIVE_MESSAGE_SPAN,
                &message.sender,
                summary.received,
            );
            tracing::info!(
                parent: msg_span.span(),
                "Received message from {}: {}",
                message.sender,
                message.text
            );

            if let Some(reply) = self.hook.process(&message) {
                if let Err(e) = sink.send(reply).await {
                    msg_span.record_error(&e);
                    return Err(ChatError::Send(e));
                }
                summary.replied += 1;
            }
            msg_span.end();
        }

        // The client's receive loop ends on our end frame.
        if let Err(e) = sink.close_send().await {
            tracing::warn!(parent: stream_span.span(), error = %e, "Error closing stream");
            return Err(ChatError::Send(e));
        }

        Ok(summary)
    }
}
