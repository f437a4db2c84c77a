//! Error types for the backend process.

use std::io;

use crate::lifecycle::error::{HandoffError, SignalInstall};

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error(transparent)]
    Handoff(#[from] HandoffError),

    #[error("failed to prepare listening socket")]
    Listener(#[source] io::Error),

    #[error(transparent)]
    Signals(#[from] SignalInstall),

    #[error("RPC server failed")]
    Transport(#[from] tonic::transport::Error),
}
