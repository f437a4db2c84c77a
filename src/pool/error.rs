//! Error types for the backend RPC pool.

/// Indicates that the pool could not be built.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// A pool needs at least one entry to select from.
    #[error("pool size must be at least 1")]
    Empty,

    /// Dialing one of the backend channels failed.
    #[error("failed to dial backend at {addr}")]
    Dial {
        addr: String,
        #[source]
        source: tonic::transport::Error,
    },
}
