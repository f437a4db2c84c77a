use std::io;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};

use super::connection::{Connection, ConnectionOptions};
use super::error::ConnectionError;
use super::transport::{TransportReader, TransportWriter};
use super::{Message, opcode};

/// Upper bound on the bytes handed over by a single socket read.
const READ_CHUNK_SIZE: usize = 1024;

pub(super) struct TcpReader {
    half: OwnedReadHalf,
}

impl TransportReader for TcpReader {
    async fn read_message(&mut self) -> io::Result<Option<Message>> {
        let mut buf = BytesMut::with_capacity(READ_CHUNK_SIZE);
        let n = self.half.read_buf(&mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(Message::new(opcode::STREAM, buf.freeze())))
    }
}

pub(super) struct TcpWriter {
    half: OwnedWriteHalf,
}

impl TransportWriter for TcpWriter {
    async fn write_message(&mut self, message: Message) -> io::Result<()> {
        self.half.write_all(message.payload()).await?;
        self.half.flush().await
    }
}

impl Connection {
    /// Wrap an accepted TCP socket.
    ///
    /// There is no framing: every message handed to [`receive`](Self::receive) is whatever one
    /// socket read produced, and the message kind is always [`opcode::STREAM`].
    pub fn open_tcp(stream: TcpStream, options: ConnectionOptions) -> Result<Self, ConnectionError> {
        let local_addr = stream.local_addr()?;
        let peer_addr = stream.peer_addr()?;
        let _ = stream.set_nodelay(true);

        let (read, write) = stream.into_split();
        Ok(Self::spawn(
            TcpReader { half: read },
            TcpWriter { half: write },
            local_addr,
            peer_addr,
            options,
        ))
    }

    /// Dial a TCP peer and wrap the resulting socket.
    pub async fn connect_tcp(
        addr: impl ToSocketAddrs,
        options: ConnectionOptions,
    ) -> Result<Self, ConnectionError> {
        let stream = TcpStream::connect(addr).await?;
        Self::open_tcp(stream, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tcp_round_trip_through_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream.write_all(b"ping").await.unwrap();
            let mut buf = [0u8; 16];
            let n = stream.read(&mut buf).await.unwrap();
            buf[..n].to_vec()
        });

        let (stream, _) = listener.accept().await.unwrap();
        let conn = Connection::open_tcp(stream, ConnectionOptions::default()).unwrap();

        let message = conn.receive().await.unwrap();
        assert_eq!(message.kind(), opcode::STREAM);
        assert_eq!(message.payload().as_ref(), b"ping");

        conn.write(opcode::STREAM, "pong").await.unwrap();
        assert_eq!(client.await.unwrap(), b"pong");
    }

    #[tokio::test]
    async fn test_peer_disconnect_closes_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let conn = Connection::connect_tcp(addr, ConnectionOptions::default())
            .await
            .unwrap();
        let (server_side, _) = listener.accept().await.unwrap();
        drop(server_side);

        assert!(matches!(conn.receive().await, Err(ConnectionError::Closed)));
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn test_close_releases_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let conn = Connection::connect_tcp(addr, ConnectionOptions::default())
            .await
            .unwrap();
        let (mut server_side, _) = listener.accept().await.unwrap();

        conn.close();
        conn.close();

        let mut buf = [0u8; 8];
        let n = server_side.read(&mut buf).await.unwrap();
        assert_eq!(n, 0, "peer should observe EOF once the connection is closed");
    }
}
