//! Logging and trace export setup.
//!
//! Installs a global subscriber with an env filter, a text or JSON fmt layer
//! on stderr, and (when a collector endpoint is configured) an OpenTelemetry
//! layer exporting spans over OTLP/gRPC in batches.
//!
//! Export is best effort: if the exporter cannot be built the process keeps
//! running with local logs only.

use opentelemetry::KeyValue;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::{WithExportConfig, WithTonicConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::{Tracer, TracerProvider};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{ChatConfig, LogFormat, TransportSecurity};
use crate::trace;

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("failed to build span exporter: {0}")]
    Exporter(String),
}

/// Keeps the tracer provider alive; flush it with [`TelemetryGuard::shutdown`].
pub struct TelemetryGuard {
    provider: Option<TracerProvider>,
}

impl TelemetryGuard {
    pub fn is_exporting(&self) -> bool {
        self.provider.is_some()
    }

    /// Flush pending spans and stop the exporter.
    pub fn shutdown(mut self) {
        if let Some(provider) = self.provider.take()
            && let Err(e) = provider.shutdown()
        {
            tracing::warn!(error = %e, "Failed to flush trace exporter");
        }
    }
}

/// Install the global subscriber. Must run inside a tokio runtime when an
/// endpoint is configured (the batch exporter spawns onto it).
pub fn init(config: &ChatConfig) -> TelemetryGuard {
    trace::install_propagator();

    let (provider, export_error) = match config.collector_endpoint {
        Some(ref endpoint) => match build_provider(config, endpoint) {
            Ok(provider) => (Some(provider), None),
            Err(e) => (None, Some(e)),
        },
        None => (None, None),
    };
    let tracer: Option<Tracer> = provider
        .as_ref()
        .map(|p| p.tracer(config.service_name.clone()));

    let filter = EnvFilter::new(config.log_directive());

    match config.log_format {
        LogFormat::Json => {
            let subscriber = tracing_subscriber::registry()
                .with(filter)
                .with(tracer.map(|t| tracing_opentelemetry::layer().with_tracer(t)))
                .with(fmt::layer().json().with_writer(std::io::stderr));
            let _ = subscriber.try_init();
        }
        LogFormat::Text => {
            let subscriber = tracing_subscriber::registry()
                .with(filter)
                .with(tracer.map(|t| tracing_opentelemetry::layer().with_tracer(t)))
                .with(fmt::layer().with_writer(std::io::stderr));
            let _ = subscriber.try_init();
        }
    }

    match (export_error, config.collector_endpoint.as_deref()) {
        (Some(e), _) => {
            tracing::warn!(error = %e, "Trace export disabled");
        }
        (None, Some(endpoint)) => {
            tracing::info!(
                service = %config.service_name,
                %endpoint,
                security = ?config.security,
                "Exporting traces"
            );
        }
        (None, None) => {
            tracing::debug!("No collector endpoint configured, trace export disabled");
        }
    }

    TelemetryGuard { provider }
}

fn build_provider(config: &ChatConfig, endpoint: &str) -> Result<TracerProvider, TelemetryError> {
    let builder = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint.to_string());

    let builder = match config.security {
        TransportSecurity::Tls => builder
            .with_tls_config(tonic::transport::ClientTlsConfig::new().with_native_roots()),
        TransportSecurity::Insecure => builder,
    };

    let exporter = builder
        .build()
        .map_err(|e| TelemetryError::Exporter(e.to_string()))?;

    Ok(TracerProvider::builder()
        .with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio)
        .with_resource(Resource::new(vec![KeyValue::new(
            "service.name",
            config.service_name.clone(),
        )]))
        .build())
}
