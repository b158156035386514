use std::process;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;

use chatwire::config::{self, ChatConfig, ConfigError};
use chatwire::{CancellationToken, EchoHook, Role, ServerDriver, TraceCorrelator, server, telemetry};

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let config = match ChatConfig::from_env(Role::Server).apply_args(&args) {
        Ok(config) => config,
        Err(ConfigError::HelpRequested) => {
            eprint!("{}", config::usage(Role::Server));
            process::exit(0);
        }
        Err(e) => {
            eprintln!("error: {e}");
            eprintln!();
            eprint!("{}", config::usage(Role::Server));
            process::exit(2);
        }
    };

    let telemetry = telemetry::init(&config);
    info!("chatwire {}", env!("CARGO_PKG_VERSION"));

    let result = run(&config).await;
    telemetry.shutdown();

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

async fn run(config: &ChatConfig) -> anyhow::Result<()> {
    let listener = TcpListener::bind(&config.addr)
        .await
        .with_context(|| format!("failed to listen on {}", config.addr))?;

    let driver = Arc::new(ServerDriver::new(
        TraceCorrelator::new(Role::Server),
        EchoHook,
    ));

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        server::shutdown_signal().await;
        on_signal.cancel();
    });

    server::serve(listener, driver, shutdown)
        .await
        .context("chat server failed")
}
