use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use bon::Builder;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use super::error::ConnectionError;
use super::transport::{TransportReader, TransportWriter};
use super::Message;

const DEFAULT_IN_QUEUE_CAPACITY: usize = 1024;
const DEFAULT_OUT_QUEUE_CAPACITY: usize = 1024;

#[derive(Clone, Copy, Hash, PartialEq, Eq)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionId({})", self.0)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Queue sizing for a [`Connection`].
#[derive(Debug, Clone, Copy, Builder)]
pub struct ConnectionOptions {
    /// Messages read off the transport but not yet taken by [`Connection::receive`].
    #[builder(default = DEFAULT_IN_QUEUE_CAPACITY)]
    pub in_queue_capacity: usize,

    /// Messages handed to [`Connection::write`] but not yet flushed to the transport.
    #[builder(default = DEFAULT_OUT_QUEUE_CAPACITY)]
    pub out_queue_capacity: usize,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// The one-shot close signal shared by a connection and its two pumps.
#[derive(Debug)]
struct CloseSignal {
    token: CancellationToken,
    is_closed: Mutex<bool>,
}

impl CloseSignal {
    fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            is_closed: Mutex::new(false),
        }
    }

    /// Fire the signal. Returns `false` if it had already fired.
    fn close(&self) -> bool {
        let mut is_closed = self.is_closed.lock().expect("close flag lock poisoned");
        if *is_closed {
            return false;
        }
        *is_closed = true;
        self.token.cancel();
        true
    }
}

/// A bidirectional, queued wrapper over one transport socket.
///
/// Both queues are bounded, so a slow peer eventually blocks [`write`](Self::write) and a slow
/// consumer eventually stops the read pump from pulling more data off the socket.
///
/// Once closed, by [`close`](Self::close), by a transport failure or by dropping the
/// connection, every call to [`receive`](Self::receive) and [`write`](Self::write) fails with
/// [`ConnectionError::Closed`]. The pumps own the transport halves and release them when they
/// observe the close signal.
pub struct Connection {
    id: ConnectionId,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
    inbound: tokio::sync::Mutex<mpsc::Receiver<Message>>,
    outbound: mpsc::Sender<Message>,
    signal: Arc<CloseSignal>,
}

impl Connection {
    /// Bind a transport and start its read and write pumps.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<R, W>(
        reader: R,
        writer: W,
        local_addr: SocketAddr,
        peer_addr: SocketAddr,
        options: ConnectionOptions,
    ) -> Self
    where
        R: TransportReader,
        W: TransportWriter,
    {
        let id = ConnectionId::generate();
        let signal = Arc::new(CloseSignal::new());
        let (in_tx, in_rx) = mpsc::channel(options.in_queue_capacity.max(1));
        let (out_tx, out_rx) = mpsc::channel(options.out_queue_capacity.max(1));

        tokio::spawn(read_pump(id, reader, in_tx, Arc::clone(&signal)));
        tokio::spawn(write_pump(id, writer, out_rx, Arc::clone(&signal)));

        debug!(conn_id = %id, local = %local_addr, peer = %peer_addr, "Connection opened");

        Self {
            id,
            local_addr,
            peer_addr,
            inbound: tokio::sync::Mutex::new(in_rx),
            outbound: out_tx,
            signal,
        }
    }

    /// Wait for the next inbound message.
    pub async fn receive(&self) -> Result<Message, ConnectionError> {
        let closed = &self.signal.token;
        if closed.is_cancelled() {
            return Err(ConnectionError::Closed);
        }

        let mut inbound = tokio::select! {
            biased;
            () = closed.cancelled() => return Err(ConnectionError::Closed),
            guard = self.inbound.lock() => guard,
        };

        tokio::select! {
            biased;
            () = closed.cancelled() => Err(ConnectionError::Closed),
            message = inbound.recv() => message.ok_or(ConnectionError::Closed),
        }
    }

    /// Queue a message for transmission, waiting while the outbound queue is full.
    pub async fn write(&self, kind: i32, payload: impl Into<Bytes>) -> Result<(), ConnectionError> {
        let closed = &self.signal.token;
        if closed.is_cancelled() {
            return Err(ConnectionError::Closed);
        }

        let message = Message::new(kind, payload);
        tokio::select! {
            biased;
            () = closed.cancelled() => Err(ConnectionError::Closed),
            sent = self.outbound.send(message) => sent.map_err(|_| ConnectionError::Closed),
        }
    }

    /// Close the connection. Calling this more than once has no further effect.
    pub fn close(&self) {
        if self.signal.close() {
            debug!(conn_id = %self.id, peer = %self.peer_addr, "Connection closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.signal.token.is_cancelled()
    }

    /// Resolves once the connection has closed for any reason.
    pub async fn closed(&self) {
        self.signal.token.cancelled().await;
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.peer_addr
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("local_addr", &self.local_addr)
            .field("peer_addr", &self.peer_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

async fn read_pump<R: TransportReader>(
    id: ConnectionId,
    mut reader: R,
    inbound: mpsc::Sender<Message>,
    signal: Arc<CloseSignal>,
) {
    let closed = signal.token.clone();
    loop {
        let read = tokio::select! {
            biased;
            () = closed.cancelled() => return,
            read = reader.read_message() => read,
        };

        let message = match read {
            Ok(Some(message)) => message,
            Ok(None) => {
                debug!(conn_id = %id, "Peer closed transport");
                break;
            }
            Err(e) => {
                debug!(conn_id = %id, error = %e, "Transport read failed");
                break;
            }
        };

        tokio::select! {
            biased;
            () = closed.cancelled() => return,
            sent = inbound.send(message) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }

    signal.close();
}

async fn write_pump<W: TransportWriter>(
    id: ConnectionId,
    mut writer: W,
    mut outbound: mpsc::Receiver<Message>,
    signal: Arc<CloseSignal>,
) {
    let closed = signal.token.clone();
    loop {
        let message = tokio::select! {
            biased;
            () = closed.cancelled() => return,
            message = outbound.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        let written = tokio::select! {
            biased;
            () = closed.cancelled() => return,
            written = writer.write_message(message) => written,
        };

        if let Err(e) = written {
            debug!(conn_id = %id, error = %e, "Transport write failed");
            break;
        }
    }

    signal.close();
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::time::Duration;

    use super::*;

    struct ChannelReader(mpsc::UnboundedReceiver<io::Result<Message>>);

    impl TransportReader for ChannelReader {
        async fn read_message(&mut self) -> io::Result<Option<Message>> {
            match self.0.recv().await {
                Some(Ok(message)) => Ok(Some(message)),
                Some(Err(e)) => Err(e),
                None => Ok(None),
            }
        }
    }

    struct ChannelWriter {
        sent: mpsc::UnboundedSender<Message>,
        fail: bool,
    }

    impl TransportWriter for ChannelWriter {
        async fn write_message(&mut self, message: Message) -> io::Result<()> {
            if self.fail {
                return Err(io::Error::from(io::ErrorKind::BrokenPipe));
            }
            let _ = self.sent.send(message);
            Ok(())
        }
    }

    struct StalledWriter;

    impl TransportWriter for StalledWriter {
        async fn write_message(&mut self, _message: Message) -> io::Result<()> {
            std::future::pending().await
        }
    }

    fn addr() -> SocketAddr {
        "127.0.0.1:9000".parse().unwrap()
    }

    struct Harness {
        conn: Connection,
        wire_in: mpsc::UnboundedSender<io::Result<Message>>,
        wire_out: mpsc::UnboundedReceiver<Message>,
    }

    fn harness(fail_writes: bool) -> Harness {
        let (wire_in, reader_rx) = mpsc::unbounded_channel();
        let (writer_tx, wire_out) = mpsc::unbounded_channel();
        let conn = Connection::spawn(
            ChannelReader(reader_rx),
            ChannelWriter {
                sent: writer_tx,
                fail: fail_writes,
            },
            addr(),
            addr(),
            ConnectionOptions::default(),
        );
        Harness {
            conn,
            wire_in,
            wire_out,
        }
    }

    #[tokio::test]
    async fn test_receive_preserves_transport_order() {
        let h = harness(false);

        h.wire_in.send(Ok(Message::new(0, "one"))).unwrap();
        h.wire_in.send(Ok(Message::new(0, "two"))).unwrap();

        assert_eq!(h.conn.receive().await.unwrap().payload().as_ref(), b"one");
        assert_eq!(h.conn.receive().await.unwrap().payload().as_ref(), b"two");
    }

    #[tokio::test]
    async fn test_write_reaches_transport() {
        let mut h = harness(false);

        h.conn.write(2, "hello").await.unwrap();

        let sent = h.wire_out.recv().await.unwrap();
        assert_eq!(sent, Message::new(2, "hello"));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let h = harness(false);

        h.conn.close();
        h.conn.close();

        assert!(h.conn.is_closed());
    }

    #[tokio::test]
    async fn test_calls_fail_after_close() {
        let h = harness(false);
        h.wire_in.send(Ok(Message::new(0, "queued"))).unwrap();
        h.conn.close();

        for _ in 0..3 {
            assert!(matches!(h.conn.receive().await, Err(ConnectionError::Closed)));
            assert!(matches!(h.conn.write(0, "x").await, Err(ConnectionError::Closed)));
        }
    }

    #[tokio::test]
    async fn test_blocked_receive_wakes_on_close() {
        let h = harness(false);
        let conn = Arc::new(h.conn);

        let waiter = tokio::spawn({
            let conn = Arc::clone(&conn);
            async move { conn.receive().await }
        });

        tokio::task::yield_now().await;
        conn.close();

        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(ConnectionError::Closed)));
    }

    #[tokio::test]
    async fn test_read_error_self_closes() {
        let h = harness(false);

        h.wire_in
            .send(Err(io::Error::from(io::ErrorKind::ConnectionReset)))
            .unwrap();

        tokio::time::timeout(Duration::from_secs(1), h.conn.closed())
            .await
            .expect("connection should close after read failure");
        assert!(matches!(h.conn.receive().await, Err(ConnectionError::Closed)));
    }

    #[tokio::test]
    async fn test_peer_eof_self_closes() {
        let Harness { conn, wire_in, .. } = harness(false);

        drop(wire_in);

        tokio::time::timeout(Duration::from_secs(1), conn.closed())
            .await
            .expect("connection should close after EOF");
    }

    #[tokio::test]
    async fn test_write_error_self_closes() {
        let h = harness(true);

        h.conn.write(0, "doomed").await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), h.conn.closed())
            .await
            .expect("connection should close after write failure");
        assert!(matches!(h.conn.write(0, "x").await, Err(ConnectionError::Closed)));
    }

    #[tokio::test]
    async fn test_full_outbound_queue_blocks_writer() {
        let (_wire_in, reader_rx) = mpsc::unbounded_channel::<io::Result<Message>>();
        let options = ConnectionOptions::builder().out_queue_capacity(1).build();
        let conn = Connection::spawn(ChannelReader(reader_rx), StalledWriter, addr(), addr(), options);

        // First message is taken by the stalled pump, second fills the queue.
        conn.write(0, "a").await.unwrap();
        conn.write(0, "b").await.unwrap();

        let third = tokio::time::timeout(Duration::from_millis(50), conn.write(0, "c")).await;
        assert!(third.is_err(), "write should block while the queue is full");

        conn.close();
        assert!(matches!(conn.write(0, "c").await, Err(ConnectionError::Closed)));
    }

    #[tokio::test]
    async fn test_drop_fires_close_signal() {
        let h = harness(false);
        let token = h.conn.signal.token.clone();

        drop(h.conn);

        assert!(token.is_cancelled());
    }

    #[test]
    fn test_default_queue_capacity() {
        let options = ConnectionOptions::default();
        assert_eq!(options.in_queue_capacity, 1024);
        assert_eq!(options.out_queue_capacity, 1024);
    }
}
