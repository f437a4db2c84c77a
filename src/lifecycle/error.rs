//! Error types for process lifecycle management.

use std::io;

/// Indicates that the listening socket could not be handed to or taken from another process.
#[derive(Debug, thiserror::Error)]
pub enum HandoffError {
    #[error("inherited listener descriptor is unusable")]
    Inherit(#[source] io::Error),

    #[error("failed to bind listener")]
    Bind(#[source] io::Error),

    #[error("failed to spawn successor process")]
    Spawn(#[source] io::Error),

    #[error("failed to signal parent process {pid}")]
    NotifyParent {
        pid: i32,
        #[source]
        source: nix::Error,
    },
}

/// Indicates that OS signal handling could not be installed.
#[derive(Debug, thiserror::Error)]
#[error("failed to install signal handlers")]
pub struct SignalInstall(#[from] pub io::Error);
