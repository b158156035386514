//! TCP accept loop for the chat server.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;

use crate::bridge::transport::accept_tcp;
use crate::driver::ServerDriver;
use crate::echo::ProcessingHook;

/// Accept connections until `shutdown` fires, serving each stream on its
/// own task. In-flight streams are cancelled and awaited before returning.
///
/// A failing connection is logged and dropped; it never stops the loop.
pub async fn serve<H: ProcessingHook>(
    listener: TcpListener,
    driver: Arc<ServerDriver<H>>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let local_addr = listener.local_addr()?;
    info!("Starting chat server on {}", local_addr);

    let tracker = TaskTracker::new();
    let streams = shutdown.child_token();

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((socket, peer)) => {
                    tracker.spawn(handle_connection(
                        socket,
                        peer,
                        Arc::clone(&driver),
                        streams.clone(),
                    ));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to accept connection");
                }
            },
        }
    }

    tracker.close();
    streams.cancel();
    tracker.wait().await;
    info!("Server shutdown complete");
    Ok(())
}

async fn handle_connection<H: ProcessingHook>(
    socket: TcpStream,
    peer: SocketAddr,
    driver: Arc<ServerDriver<H>>,
    cancel: CancellationToken,
) {
    let (header, source, sink) = match accept_tcp(socket).await {
        Ok(accepted) => accepted,
        Err(e) => {
            tracing::warn!(%peer, role = "server", error = %e, "Rejected connection");
            return;
        }
    };

    match driver.run(&header, source, sink, cancel).await {
        Ok(summary) => {
            info!(
                %peer,
                stream_id = %header.stream_id,
                received = summary.received,
                replied = summary.replied,
                "Chat stream finished"
            );
        }
        Err(e) => {
            tracing::error!(
                %peer,
                role = "server",
                stream_id = %header.stream_id,
                error = %e,
                "Chat stream failed"
            );
        }
    }
}

/// Resolve when SIGINT or SIGTERM arrives.
///
/// # Panics
///
/// Panics if signal handlers cannot be installed, which only happens when
/// the tokio runtime is misconfigured.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler - is tokio runtime configured correctly?");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler - is tokio runtime configured correctly?")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::channel::{MessageSink, MessageSource};
    use crate::bridge::protocol::{Message, StreamHeader, StreamId};
    use crate::bridge::transport::dial;
    use crate::echo::EchoHook;
    use crate::trace::{Role, TraceCorrelator};

    async fn start() -> (String, CancellationToken, tokio::task::JoinHandle<std::io::Result<()>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let driver = Arc::new(ServerDriver::new(TraceCorrelator::new(Role::Server), EchoHook));
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(serve(listener, driver, shutdown.clone()));
        (addr, shutdown, handle)
    }

    #[tokio::test]
    async fn serves_concurrent_streams_independently() {
        let (addr, shutdown, handle) = start().await;

        let (mut a_source, mut a_sink) =
            dial(&addr, StreamHeader::chat(StreamId::new(), Default::default()))
                .await
                .unwrap();
        let (mut b_source, mut b_sink) =
            dial(&addr, StreamHeader::chat(StreamId::new(), Default::default()))
                .await
                .unwrap();

        a_sink.send(Message::new("a", "from a")).await.unwrap();
        b_sink.send(Message::new("b", "from b")).await.unwrap();

        assert_eq!(b_source.receive().await.unwrap().unwrap().text, "Echo: from b");
        assert_eq!(a_source.receive().await.unwrap().unwrap().text, "Echo: from a");

        a_sink.close_send().await.unwrap();
        b_sink.close_send().await.unwrap();
        assert!(a_source.receive().await.unwrap().is_none());
        assert!(b_source.receive().await.unwrap().is_none());

        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn bad_connection_does_not_stop_the_server() {
        let (addr, shutdown, handle) = start().await;

        // Connect and hang up without a header.
        drop(TcpStream::connect(&addr).await.unwrap());

        let (mut source, mut sink) =
            dial(&addr, StreamHeader::chat(StreamId::new(), Default::default()))
                .await
                .unwrap();
        sink.send(Message::new("ClientUser", "still up?")).await.unwrap();
        assert_eq!(
            source.receive().await.unwrap().unwrap().text,
            "Echo: still up?"
        );

        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn shutdown_cancels_open_streams() {
        let (addr, shutdown, handle) = start().await;

        let (mut source, mut sink) =
            dial(&addr, StreamHeader::chat(StreamId::new(), Default::default()))
                .await
                .unwrap();
        sink.send(Message::new("ClientUser", "hi")).await.unwrap();
        assert!(source.receive().await.unwrap().is_some());

        shutdown.cancel();
        handle.await.unwrap().unwrap();

        // No end frame follows the reply: the client sees a broken stream,
        // not a finished one.
        let err = source.receive().await.unwrap_err();
        assert!(err.is_transport(), "unexpected error: {err}");
    }
}
