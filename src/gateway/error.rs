//! Error types for gateway sessions.

use crate::network::ConnectionError;

/// Why a gateway session ended abnormally.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("client connection failed")]
    Connection(#[from] ConnectionError),

    #[error("backend RPC failed: {0}")]
    Rpc(#[from] tonic::Status),
}
