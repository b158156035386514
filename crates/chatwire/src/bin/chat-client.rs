use std::process;

use anyhow::Context;
use tokio::io::BufReader;
use tracing::info;

use chatwire::config::{self, ChatConfig, ConfigError};
use chatwire::{CancellationToken, ClientDriver, LineInput, Role, TraceCorrelator, telemetry};

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let config = match ChatConfig::from_env(Role::Client).apply_args(&args) {
        Ok(config) => config,
        Err(ConfigError::HelpRequested) => {
            eprint!("{}", config::usage(Role::Client));
            process::exit(0);
        }
        Err(e) => {
            eprintln!("error: {e}");
            eprintln!();
            eprint!("{}", config::usage(Role::Client));
            process::exit(2);
        }
    };

    let telemetry = telemetry::init(&config);

    let result = run(&config).await;
    telemetry.shutdown();

    // Exit explicitly: a pending stdin read would otherwise hold the
    // runtime open on shutdown.
    match result {
        Ok(()) => process::exit(0),
        Err(e) => {
            eprintln!("error: {e:#}");
            process::exit(1);
        }
    }
}

async fn run(config: &ChatConfig) -> anyhow::Result<()> {
    let driver = ClientDriver::new(TraceCorrelator::new(Role::Client))
        .with_terminate_token(config.terminate_token.clone());

    let stream = driver
        .dial(&config.addr)
        .await
        .with_context(|| format!("failed to connect to {}", config.addr))?;

    let input = LineInput::new(BufReader::new(tokio::io::stdin())).with_prompt(format!(
        "Enter message (or '{}' to quit): ",
        config.terminate_token
    ));

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_ctrl_c.cancel();
        }
    });

    let summary = driver
        .run(stream, input, cancel)
        .await
        .context("chat stream failed")?;

    info!(sent = summary.sent, received = summary.received, "Chat finished");
    Ok(())
}
