//! chatwire: duplex chat stream with per-message trace correlation.

pub mod bridge;
pub mod config;
pub mod driver;
pub mod echo;
pub mod error;
pub mod server;
pub mod span_ledger;
pub mod telemetry;
pub mod trace;

pub use bridge::channel::{FramedSink, FramedSource, MessageSink, MessageSource};
pub use bridge::protocol::{Message, StreamHeader, StreamId};
pub use config::{ChatConfig, ConfigError, LogFormat, TransportSecurity};
pub use driver::{
    ClientDriver, ClientStream, ClientSummary, LineInput, OutboundSource, ServerDriver,
    StreamSummary,
};
pub use echo::{EchoHook, ProcessingHook};
pub use error::{ChannelError, ChatError};
pub use span_ledger::{SpanLedger, SpanRecord};
pub use trace::{Role, SpanGuard, TraceCorrelator};
pub use tokio_util::sync::CancellationToken;
