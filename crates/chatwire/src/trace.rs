//! Trace correlation for chat streams.
//!
//! One stream span per connection, one message span per send or receive,
//! nested under the stream span. Spans are `tracing` spans; when the OTLP
//! layer is installed (see [`crate::telemetry`]) they are exported as
//! OpenTelemetry spans, with `otel.name` as the exported name.
//!
//! Span lifetime is tied to [`SpanGuard`] ownership: the span closes when
//! the guard (and any child spans) are gone, on every exit path.

use std::collections::HashMap;

use opentelemetry::baggage::BaggageExt;
use opentelemetry::propagation::TextMapCompositePropagator;
use opentelemetry::{Context, KeyValue, global};
use opentelemetry_sdk::propagation::{BaggagePropagator, TraceContextPropagator};
use tracing::Span;
use tracing::field::Empty;
use tracing_opentelemetry::OpenTelemetrySpanExt;

use crate::bridge::protocol::StreamId;

pub const STREAM_SPAN: &str = "Chat";
pub const SEND_MESSAGE_SPAN: &str = "SendMessage";
pub const RECEIVE_MESSAGE_SPAN: &str = "ReceiveMessage";

/// Which end of the stream this process plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Server => "server",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Owns one open span. Dropping it (or calling [`SpanGuard::end`]) releases
/// the span.
#[must_use = "dropping the guard ends the span immediately"]
#[derive(Debug)]
pub struct SpanGuard {
    span: Span,
}

impl SpanGuard {
    fn new(span: Span) -> Self {
        Self { span }
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Mark the span failed and emit an error event inside it. Annotation
    /// only; never affects the caller's control flow.
    pub fn record_error<E>(&self, err: &E)
    where
        E: std::error::Error + 'static,
    {
        let message = err.to_string();
        self.span.record("otel.status_code", "ERROR");
        self.span.record("otel.status_message", message.as_str());
        self.span.record("error.message", message.as_str());
        tracing::error!(
            parent: &self.span,
            error = err as &(dyn std::error::Error + 'static),
            "{message}"
        );
    }

    /// Record the error of a failed result, then hand the result back as is.
    pub fn record_result<T, E>(&self, result: Result<T, E>) -> Result<T, E>
    where
        E: std::error::Error + 'static,
    {
        if let Err(ref e) = result {
            self.record_error(e);
        }
        result
    }

    pub fn end(self) {}
}

/// Maps protocol events to spans for one role.
#[derive(Debug, Clone, Copy)]
pub struct TraceCorrelator {
    role: Role,
}

impl TraceCorrelator {
    pub fn new(role: Role) -> Self {
        Self { role }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Start the span covering a whole stream.
    ///
    /// `remote_parent` is the peer's propagated context (from the stream
    /// header); without it the span's parent is the ambient span.
    pub fn start_stream_span(
        &self,
        name: &str,
        stream_id: StreamId,
        remote_parent: Option<&HashMap<String, String>>,
    ) -> SpanGuard {
        let span = tracing::info_span!(
            "chat.stream",
            otel.name = name,
            otel.kind = self.role.as_str(),
            chat.role = self.role.as_str(),
            stream.id = %stream_id,
            otel.status_code = Empty,
            otel.status_message = Empty,
            error.message = Empty,
        );

        if let Some(carrier) = remote_parent.filter(|c| !c.is_empty()) {
            span.set_parent(self.extract_context(carrier));
        }

        SpanGuard::new(span)
    }

    /// Start the span for one send or receive event.
    ///
    /// The sender identity and the per-direction sequence number are set
    /// at creation, before the wrapped operation runs.
    pub fn start_message_span(
        &self,
        parent: &Span,
        name: &str,
        sender: &str,
        seq: u64,
    ) -> SpanGuard {
        let span = tracing::info_span!(
            parent: parent,
            "chat.message",
            otel.name = name,
            chat.role = self.role.as_str(),
            enduser.id = sender,
            message.seq = seq,
            otel.status_code = Empty,
            otel.status_message = Empty,
            error.message = Empty,
        );
        SpanGuard::new(span)
    }

    /// Trace context of `span` plus the ambient baggage, encoded by the
    /// global propagator for the stream header.
    ///
    /// Empty when no OpenTelemetry layer and no baggage are present, or
    /// before [`install_propagator`] has run.
    pub fn inject_context(&self, span: &SpanGuard) -> HashMap<String, String> {
        let mut cx = span.span().context();
        let ambient = Context::current();
        if !ambient.baggage().is_empty() {
            cx = cx.with_baggage(
                ambient
                    .baggage()
                    .iter()
                    .map(|(key, (value, _))| KeyValue::new(key.clone(), value.clone())),
            );
        }

        let mut carrier = HashMap::new();
        global::get_text_map_propagator(|propagator| propagator.inject_context(&cx, &mut carrier));
        carrier
    }

    /// Rebuild the peer's context from a stream header carrier. Malformed
    /// entries yield an empty context, which leaves the span a root.
    pub fn extract_context(&self, carrier: &HashMap<String, String>) -> Context {
        global::get_text_map_propagator(|propagator| propagator.extract(carrier))
    }
}

/// Install the process-wide propagator for stream headers: W3C trace
/// context plus W3C baggage.
pub fn install_propagator() {
    global::set_text_map_propagator(TextMapCompositePropagator::new(vec![
        Box::new(TraceContextPropagator::new()),
        Box::new(BaggagePropagator::new()),
    ]));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span_ledger::SpanLedger;
    use tracing_subscriber::layer::SubscriberExt;

    fn with_ledger<F: FnOnce()>(f: F) -> SpanLedger {
        let ledger = SpanLedger::new();
        let subscriber = tracing_subscriber::registry().with(ledger.layer());
        tracing::subscriber::with_default(subscriber, f);
        ledger
    }

    #[test]
    fn message_span_nests_under_stream_span() {
        let ledger = with_ledger(|| {
            let correlator = TraceCorrelator::new(Role::Client);
            let stream = correlator.start_stream_span(STREAM_SPAN, StreamId::new(), None);
            let msg = correlator.start_message_span(stream.span(), SEND_MESSAGE_SPAN, "ClientUser", 1);
            msg.end();
            stream.end();
        });

        let sends = ledger.closed_named(SEND_MESSAGE_SPAN);
        assert_eq!(sends.len(), 1);
        assert_eq!(sends[0].parent.as_deref(), Some(STREAM_SPAN));
        assert_eq!(sends[0].field("enduser.id"), Some("ClientUser"));
        assert_eq!(sends[0].field("message.seq"), Some("1"));
        assert_eq!(ledger.open_count(), 0);
    }

    #[test]
    fn stream_span_closes_once_after_children() {
        let ledger = with_ledger(|| {
            let correlator = TraceCorrelator::new(Role::Server);
            let stream = correlator.start_stream_span(STREAM_SPAN, StreamId::new(), None);
            let first = correlator.start_message_span(stream.span(), RECEIVE_MESSAGE_SPAN, "a", 1);
            let second = correlator.start_message_span(stream.span(), RECEIVE_MESSAGE_SPAN, "a", 2);
            drop(stream);
            first.end();
            second.end();
        });

        assert_eq!(ledger.closed_named(STREAM_SPAN).len(), 1);
        assert_eq!(ledger.closed_named(RECEIVE_MESSAGE_SPAN).len(), 2);
        // The stream span outlives its children even when its guard drops first.
        let order: Vec<String> = ledger.closed().into_iter().map(|r| r.name).collect();
        assert_eq!(order.last().map(String::as_str), Some(STREAM_SPAN));
    }

    #[test]
    fn record_error_marks_span_without_changing_result() {
        let ledger = with_ledger(|| {
            let correlator = TraceCorrelator::new(Role::Server);
            let stream = correlator.start_stream_span(STREAM_SPAN, StreamId::new(), None);

            let failed: Result<u8, std::io::Error> =
                Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe gone"));
            let returned = stream.record_result(failed);
            assert_eq!(returned.unwrap_err().kind(), std::io::ErrorKind::BrokenPipe);

            let ok: Result<u8, std::io::Error> = Ok(7);
            assert_eq!(stream.record_result(ok).unwrap(), 7);
        });

        let streams = ledger.closed_named(STREAM_SPAN);
        assert_eq!(streams.len(), 1);
        assert!(streams[0].errored());
        assert_eq!(streams[0].field("error.message"), Some("pipe gone"));
        assert_eq!(streams[0].field("otel.status_message"), Some("pipe gone"));
    }

    #[test]
    fn role_is_attached_to_stream_span() {
        let ledger = with_ledger(|| {
            let correlator = TraceCorrelator::new(Role::Client);
            let _stream = correlator.start_stream_span(STREAM_SPAN, StreamId::new(), None);
        });

        let streams = ledger.closed_named(STREAM_SPAN);
        assert_eq!(streams[0].field("chat.role"), Some("client"));
        assert_eq!(streams[0].field("otel.kind"), Some("client"));
        assert!(!streams[0].errored());
    }

    #[test]
    fn inject_without_otel_layer_is_empty() {
        with_ledger(|| {
            let correlator = TraceCorrelator::new(Role::Client);
            let stream = correlator.start_stream_span(STREAM_SPAN, StreamId::new(), None);
            assert!(correlator.inject_context(&stream).is_empty());
        });
    }

    #[test]
    fn context_round_trips_through_header_carrier() {
        use opentelemetry::trace::{TraceContextExt, TracerProvider as _};

        install_propagator();
        let provider = opentelemetry_sdk::trace::TracerProvider::builder().build();
        let subscriber = tracing_subscriber::registry()
            .with(tracing_opentelemetry::layer().with_tracer(provider.tracer("chatwire-test")));

        tracing::subscriber::with_default(subscriber, || {
            let client = TraceCorrelator::new(Role::Client);
            let stream = client.start_stream_span(STREAM_SPAN, StreamId::new(), None);
            let carrier = client.inject_context(&stream);
            assert!(carrier.contains_key("traceparent"));

            let remote = TraceCorrelator::new(Role::Server).extract_context(&carrier);
            let local_trace = stream.span().context().span().span_context().trace_id();
            assert_eq!(remote.span().span_context().trace_id(), local_trace);
        });
    }

    #[test]
    fn baggage_crosses_the_header_carrier() {
        install_propagator();
        let _ambient =
            Context::current_with_baggage(vec![KeyValue::new("chat.user", "alice")]).attach();

        let client = TraceCorrelator::new(Role::Client);
        let stream = client.start_stream_span(STREAM_SPAN, StreamId::new(), None);
        let carrier = client.inject_context(&stream);
        assert!(carrier.contains_key("baggage"));

        let remote = TraceCorrelator::new(Role::Server).extract_context(&carrier);
        let user = remote.baggage().get("chat.user").map(|v| v.as_str().into_owned());
        assert_eq!(user.as_deref(), Some("alice"));
    }

    #[test]
    fn garbage_remote_parent_is_ignored() {
        let ledger = with_ledger(|| {
            let correlator = TraceCorrelator::new(Role::Server);
            let mut carrier = HashMap::new();
            carrier.insert("traceparent".to_string(), "not-a-traceparent".to_string());
            let stream = correlator.start_stream_span(STREAM_SPAN, StreamId::new(), Some(&carrier));
            stream.end();
        });

        assert_eq!(ledger.closed_named(STREAM_SPAN).len(), 1);
    }
}
