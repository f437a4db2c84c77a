//! Error types for client connections.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The connection was closed, either explicitly or after a transport failure.
    #[error("connection already closed")]
    Closed,

    /// Dialing or reading the underlying socket failed.
    #[error("transport I/O error")]
    Io(#[from] std::io::Error),

    /// The WebSocket handshake or framing failed.
    #[error("WebSocket error")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// A WebSocket address could not be parsed into a dialable host and port.
    #[error("invalid WebSocket url: {0}")]
    InvalidUrl(String),
}
