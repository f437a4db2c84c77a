use std::io;
use std::net::SocketAddr;

use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use url::Url;

use super::connection::{Connection, ConnectionOptions};
use super::error::ConnectionError;
use super::transport::{TransportReader, TransportWriter};
use super::{Message, opcode};

pub(super) struct WsReader<S> {
    stream: SplitStream<WebSocketStream<S>>,
}

impl<S> TransportReader for WsReader<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn read_message(&mut self) -> io::Result<Option<Message>> {
        loop {
            match self.stream.next().await {
                Some(Ok(WsMessage::Text(text))) => {
                    return Ok(Some(Message::new(
                        opcode::TEXT,
                        Bytes::copy_from_slice(text.as_bytes()),
                    )));
                }
                Some(Ok(WsMessage::Binary(data))) => {
                    return Ok(Some(Message::new(opcode::BINARY, data)));
                }
                // tungstenite answers pings on its own
                Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_))) => continue,
                Some(Ok(WsMessage::Close(_))) | None => return Ok(None),
                Some(Err(e)) => return Err(io::Error::other(e)),
            }
        }
    }
}

pub(super) struct WsWriter<S> {
    sink: SplitSink<WebSocketStream<S>, WsMessage>,
}

impl<S> TransportWriter for WsWriter<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn write_message(&mut self, message: Message) -> io::Result<()> {
        let frame = to_frame(message)?;
        self.sink.send(frame).await.map_err(io::Error::other)
    }
}

fn to_frame(message: Message) -> io::Result<WsMessage> {
    let kind = message.kind();
    let payload = message.into_payload();

    let frame = match kind {
        opcode::TEXT => {
            let text = String::from_utf8(payload.to_vec())
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            WsMessage::text(text)
        }
        opcode::PING => WsMessage::Ping(payload),
        opcode::PONG => WsMessage::Pong(payload),
        opcode::CLOSE => WsMessage::Close(None),
        _ => WsMessage::binary(payload),
    };
    Ok(frame)
}

impl Connection {
    /// Wrap an established WebSocket stream.
    ///
    /// Each message is one frame; its kind carries the frame opcode.
    pub fn open_ws<S>(
        stream: WebSocketStream<S>,
        local_addr: SocketAddr,
        peer_addr: SocketAddr,
        options: ConnectionOptions,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, stream) = stream.split();
        Self::spawn(
            WsReader { stream },
            WsWriter { sink },
            local_addr,
            peer_addr,
            options,
        )
    }

    /// Perform the server side of the WebSocket upgrade on an accepted socket.
    pub async fn accept_ws(
        stream: TcpStream,
        options: ConnectionOptions,
    ) -> Result<Self, ConnectionError> {
        let local_addr = stream.local_addr()?;
        let peer_addr = stream.peer_addr()?;
        let _ = stream.set_nodelay(true);

        let ws = tokio_tungstenite::accept_async(stream).await?;
        Ok(Self::open_ws(ws, local_addr, peer_addr, options))
    }

    /// Dial a `ws://` url and wrap the resulting stream.
    pub async fn connect_ws(url: &str, options: ConnectionOptions) -> Result<Self, ConnectionError> {
        let parsed = Url::parse(url).map_err(|e| ConnectionError::InvalidUrl(e.to_string()))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| ConnectionError::InvalidUrl(format!("'{url}' has no host")))?;
        let port = parsed
            .port_or_known_default()
            .ok_or_else(|| ConnectionError::InvalidUrl(format!("'{url}' has no port")))?;

        let stream = TcpStream::connect((host, port)).await?;
        let local_addr = stream.local_addr()?;
        let peer_addr = stream.peer_addr()?;

        let (ws, _response) = tokio_tungstenite::client_async(url, stream).await?;
        Ok(Self::open_ws(ws, local_addr, peer_addr, options))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_frames_keep_their_opcode() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let conn = Connection::accept_ws(stream, ConnectionOptions::default())
                .await
                .unwrap();
            let first = conn.receive().await.unwrap();
            let second = conn.receive().await.unwrap();
            conn.write(first.kind(), first.payload().clone()).await.unwrap();
            conn.write(second.kind(), second.payload().clone()).await.unwrap();
            // keep the connection alive until the client is done
            conn.closed().await;
        });

        let client = Connection::connect_ws(&format!("ws://{addr}"), ConnectionOptions::default())
            .await
            .unwrap();
        client.write(opcode::TEXT, "hello").await.unwrap();
        client.write(opcode::BINARY, vec![1u8, 2, 3]).await.unwrap();

        let text = client.receive().await.unwrap();
        assert_eq!(text.kind(), opcode::TEXT);
        assert_eq!(text.payload().as_ref(), b"hello");

        let binary = client.receive().await.unwrap();
        assert_eq!(binary.kind(), opcode::BINARY);
        assert_eq!(binary.payload().as_ref(), &[1, 2, 3]);

        client.close();
        server.await.unwrap();
    }

    #[test]
    fn test_invalid_utf8_text_is_rejected() {
        let message = Message::new(opcode::TEXT, vec![0xff, 0xfe]);
        let err = to_frame(message).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_unknown_kind_is_sent_as_binary() {
        let frame = to_frame(Message::new(42, "raw")).unwrap();
        assert!(matches!(frame, WsMessage::Binary(ref data) if data.as_ref() == b"raw"));
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_url() {
        let result = Connection::connect_ws("not a url", ConnectionOptions::default()).await;
        assert!(matches!(result, Err(ConnectionError::InvalidUrl(_))));
    }
}
