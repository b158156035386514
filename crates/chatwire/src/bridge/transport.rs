//! Connection setup for chat streams.
//!
//! Turns a byte stream into a channel pair and performs the open handshake:
//! the dialing side writes a [`StreamHeader`], the accepting side reads and
//! validates it. Generic over AsyncRead/AsyncWrite; TCP helpers on top.

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use super::channel::{FramedSink, FramedSource};
use super::protocol::{CHAT_METHOD, StreamHeader};
use crate::error::ChannelError;

pub type TcpSource = FramedSource<OwnedReadHalf>;
pub type TcpSink = FramedSink<OwnedWriteHalf>;

/// Open a stream over an existing connection (client side).
pub async fn open_stream<R, W>(
    reader: R,
    writer: W,
    header: StreamHeader,
) -> Result<(FramedSource<R>, FramedSink<W>), ChannelError>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    let source = FramedSource::new(reader);
    let mut sink = FramedSink::new(writer);

    tracing::trace!(stream_id = %header.stream_id, method = %header.method, "Sending stream header");
    sink.open(header).await?;

    Ok((source, sink))
}

/// Accept a stream over an existing connection (server side).
///
/// Rejects any method other than `Chat`.
pub async fn accept_stream<R, W>(
    reader: R,
    writer: W,
) -> Result<(StreamHeader, FramedSource<R>, FramedSink<W>), ChannelError>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    let mut source = FramedSource::new(reader);
    let header = source.read_header().await?;

    if header.method != CHAT_METHOD {
        return Err(ChannelError::UnknownMethod(header.method));
    }

    tracing::trace!(stream_id = %header.stream_id, "Stream header accepted");
    Ok((header, source, FramedSink::new(writer)))
}

/// Dial a chat server over TCP and open a stream.
pub async fn dial(
    addr: &str,
    header: StreamHeader,
) -> Result<(TcpSource, TcpSink), ChannelError> {
    tracing::debug!(%addr, "Connecting to chat server");
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;

    let (read_half, write_half) = stream.into_split();
    open_stream(read_half, write_half, header).await
}

/// Accept a stream on a freshly accepted TCP connection.
pub async fn accept_tcp(
    stream: TcpStream,
) -> Result<(StreamHeader, TcpSource, TcpSink), ChannelError> {
    stream.set_nodelay(true)?;
    let (read_half, write_half) = stream.into_split();
    accept_stream(read_half, write_half).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::channel::{MessageSink, MessageSource};
    use crate::bridge::protocol::{Message, StreamId};

    #[tokio::test]
    async fn handshake_then_messages() {
        let (client_io, server_io) = tokio::io::duplex(4096);
        let (client_r, client_w) = tokio::io::split(client_io);
        let (server_r, server_w) = tokio::io::split(server_io);

        let id = StreamId::new();
        let (_client_source, mut client_sink) =
            open_stream(client_r, client_w, StreamHeader::chat(id, Default::default()))
                .await
                .unwrap();
        client_sink
            .send(Message::new("ClientUser", "hello"))
            .await
            .unwrap();

        let (header, mut server_source, _server_sink) =
            accept_stream(server_r, server_w).await.unwrap();
        assert_eq!(header.stream_id, id);

        let msg = server_source.receive().await.unwrap().unwrap();
        assert_eq!(msg.text, "hello");
    }

    #[tokio::test]
    async fn unknown_method_is_rejected() {
        let (client_io, server_io) = tokio::io::duplex(4096);
        let (client_r, client_w) = tokio::io::split(client_io);
        let (server_r, server_w) = tokio::io::split(server_io);

        let header = StreamHeader {
            method: "Broadcast".to_string(),
            stream_id: StreamId::new(),
            trace_context: Default::default(),
        };
        let _client = open_stream(client_r, client_w, header).await.unwrap();

        let err = accept_stream(server_r, server_w).await.err().unwrap();
        assert!(matches!(err, ChannelError::UnknownMethod(m) if m == "Broadcast"));
    }

    #[tokio::test]
    async fn dial_tcp_round_trip() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (header, mut source, _sink) = accept_tcp(socket).await.unwrap();
            let msg = source.receive().await.unwrap().unwrap();
            let end = source.receive().await.unwrap();
            (header, msg, end)
        });

        let id = StreamId::new();
        let (_source, mut sink) = dial(&addr, StreamHeader::chat(id, Default::default()))
            .await
            .unwrap();
        sink.send(Message::new("ClientUser", "over tcp")).await.unwrap();
        sink.close_send().await.unwrap();

        let (header, msg, end) = server.await.unwrap();
        assert_eq!(header.stream_id, id);
        assert_eq!(msg.text, "over tcp");
        assert!(end.is_none());
    }
}
