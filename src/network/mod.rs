//! Queued, bidirectional client connections.
//!
//! A [`Connection`] wraps one transport socket (raw TCP or WebSocket) and hides it behind two
//! bounded queues. A read pump drains the socket into the inbound queue and a write pump drains
//! the outbound queue into the socket, so callers only ever see [`Connection::receive`],
//! [`Connection::write`] and [`Connection::close`] regardless of the transport underneath.

pub mod error;

mod connection;
mod message;
mod tcp;
mod transport;
mod ws;

pub use connection::{Connection, ConnectionId, ConnectionOptions};
pub use error::ConnectionError;
pub use message::{Message, opcode};
pub use transport::{TransportReader, TransportWriter};
