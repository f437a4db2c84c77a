use std::future::Future;

use tokio::signal::unix::{Signal, SignalKind, signal};
use tokio::sync::mpsc;

use super::error::SignalInstall;

/// Process control signals the backend reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessSignal {
    /// SIGINT
    Interrupt,
    /// SIGTERM, also sent by a successor once it is serving.
    Terminate,
    /// SIGHUP
    Reload,
}

/// Something that delivers [`ProcessSignal`]s to the lifecycle runner.
pub trait SignalSource: Send {
    /// Next signal, or `None` once no more can arrive.
    fn recv(&mut self) -> impl Future<Output = Option<ProcessSignal>> + Send;
}

/// OS signal handlers for SIGINT, SIGTERM and SIGHUP.
#[derive(Debug)]
pub struct OsSignals {
    interrupt: Signal,
    terminate: Signal,
    hangup: Signal,
}

impl OsSignals {
    pub fn install() -> Result<Self, SignalInstall> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
            hangup: signal(SignalKind::hangup())?,
        })
    }
}

impl SignalSource for OsSignals {
    async fn recv(&mut self) -> Option<ProcessSignal> {
        tokio::select! {
            Some(()) = self.interrupt.recv() => Some(ProcessSignal::Interrupt),
            Some(()) = self.terminate.recv() => Some(ProcessSignal::Terminate),
            Some(()) = self.hangup.recv() => Some(ProcessSignal::Reload),
            else => None,
        }
    }
}

impl SignalSource for mpsc::Receiver<ProcessSignal> {
    async fn recv(&mut self) -> Option<ProcessSignal> {
        mpsc::Receiver::recv(self).await
    }
}
