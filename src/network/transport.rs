use std::future::Future;
use std::io;

use super::Message;

/// The receiving half of a transport socket, driven by a connection's read pump.
pub trait TransportReader: Send + 'static {
    /// Read the next message off the wire.
    ///
    /// Returns `Ok(None)` once the peer has closed its side. Must be cancel safe: the read pump
    /// drops this future when the connection closes.
    fn read_message(&mut self) -> impl Future<Output = io::Result<Option<Message>>> + Send;
}

/// The sending half of a transport socket, driven by a connection's write pump.
pub trait TransportWriter: Send + 'static {
    /// Write one message and flush it to the peer.
    fn write_message(&mut self, message: Message) -> impl Future<Output = io::Result<()>> + Send;
}
