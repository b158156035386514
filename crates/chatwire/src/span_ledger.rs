//! Span accounting layer.
//!
//! Records every span's name, parent and fields, and moves it to the closed
//! list when the subscriber closes it. Lets tests assert that each span is
//! opened and closed exactly once and that errors land on the right span.
//!
//! Span names are taken from `otel.name` when present, matching what the
//! OpenTelemetry exporter would report.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::span::{Attributes, Id, Record};
use tracing::{Subscriber, field::Field};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

/// Snapshot of one span as seen by the ledger.
#[derive(Debug, Clone)]
pub struct SpanRecord {
    pub name: String,
    pub parent: Option<String>,
    pub fields: HashMap<String, String>,
}

impl SpanRecord {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn errored(&self) -> bool {
        self.field("otel.status_code") == Some("ERROR")
    }
}

#[derive(Default)]
struct LedgerState {
    open: HashMap<u64, SpanRecord>,
    closed: Vec<SpanRecord>,
}

/// Shared handle to the recorded spans.
#[derive(Clone, Default)]
pub struct SpanLedger {
    state: Arc<Mutex<LedgerState>>,
}

impl SpanLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Layer feeding this ledger. Install it on a `tracing_subscriber::registry()`.
    pub fn layer(&self) -> SpanLedgerLayer {
        SpanLedgerLayer {
            state: Arc::clone(&self.state),
        }
    }

    /// Spans opened but not yet closed.
    pub fn open_count(&self) -> usize {
        lock(&self.state).open.len()
    }

    /// Closed spans, in close order.
    pub fn closed(&self) -> Vec<SpanRecord> {
        lock(&self.state).closed.clone()
    }

    pub fn closed_named(&self, name: &str) -> Vec<SpanRecord> {
        lock(&self.state)
            .closed
            .iter()
            .filter(|r| r.name == name)
            .cloned()
            .collect()
    }
}

fn lock(state: &Mutex<LedgerState>) -> MutexGuard<'_, LedgerState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct SpanLedgerLayer {
    state: Arc<Mutex<LedgerState>>,
}

impl<S> Layer<S> for SpanLedgerLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::default();
        attrs.record(&mut visitor);

        let name = visitor
            .fields
            .get("otel.name")
            .cloned()
            .unwrap_or_else(|| attrs.metadata().name().to_string());

        let mut state = lock(&self.state);
        let parent = ctx
            .span(id)
            .and_then(|span| span.parent())
            .and_then(|parent| state.open.get(&parent.id().into_u64()))
            .map(|record| record.name.clone());

        state.open.insert(
            id.into_u64(),
            SpanRecord {
                name,
                parent,
                fields: visitor.fields,
            },
        );
    }

    fn on_record(&self, id: &Id, values: &Record<'_>, _ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::default();
        values.record(&mut visitor);

        let mut state = lock(&self.state);
        if let Some(record) = state.open.get_mut(&id.into_u64()) {
            record.fields.extend(visitor.fields);
        }
    }

    fn on_close(&self, id: Id, _ctx: Context<'_, S>) {
        let mut state = lock(&self.state);
        if let Some(record) = state.open.remove(&id.into_u64()) {
            state.closed.push(record);
        }
    }
}

#[derive(Default)]
struct FieldVisitor {
    fields: HashMap<String, String>,
}

impl tracing::field::Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.fields
            .insert(field.name().to_string(), format!("{:?}", value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.fields
            .insert(field.name().to_string(), value.to_string());
    }
}
