//! Signal driven graceful shutdown and hot reload for the backend process.
//!
//! SIGINT/SIGTERM move the process from Running to Draining: the listener stops accepting,
//! the drain hook gets at most the drain timeout, then the process stops. SIGHUP spawns a
//! successor that inherits the listening socket; once the successor serves it sends SIGTERM
//! back, which starts the drain here.
//!
//! If the successor dies before signalling, this process keeps serving and only an error log
//! records the failed reload.

pub mod error;
pub mod handoff;

mod drain;
mod machine;
mod signals;

use std::time::Duration;

use bon::Builder;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::state_machine::StateMachine;

pub use drain::{DEFAULT_DRAIN_TIMEOUT, DrainOutcome, drain};
pub use handoff::ListenerHandoff;
pub use machine::{LifecycleInput, LifecycleMachine, LifecycleOutput, LifecycleState};
pub use signals::{OsSignals, ProcessSignal, SignalSource};

/// Executes the [`LifecycleMachine`]'s decisions against the real process.
#[derive(Builder)]
pub struct ProcessLifecycle {
    /// Cancelled when draining begins; the accept side of the RPC server watches it.
    stop_accepting: CancellationToken,

    /// Without a handoff, reload requests are logged and ignored.
    handoff: Option<ListenerHandoff>,

    /// Session teardown to wait for while draining.
    drain_hook: Option<BoxFuture<'static, ()>>,

    #[builder(default = DEFAULT_DRAIN_TIMEOUT)]
    drain_timeout: Duration,

    #[builder(skip)]
    machine: LifecycleMachine,
}

impl ProcessLifecycle {
    pub fn state(&self) -> LifecycleState {
        self.machine.state()
    }

    /// React to signals until the machine reaches Stopped.
    ///
    /// Returns how draining ended, or `None` if the signal source dried up first.
    pub async fn run<S: SignalSource>(mut self, mut signals: S) -> Option<DrainOutcome> {
        let mut outcome = None;

        loop {
            let Some(signal) = signals.recv().await else {
                warn!("Signal source closed");
                return outcome;
            };

            info!(
                pid = std::process::id(),
                signal = ?signal,
                state = ?self.machine.state(),
                "Received signal"
            );
            self.machine.process_input(LifecycleInput::Signal(signal));

            while let Some(action) = self.machine.poll_output() {
                match action {
                    LifecycleOutput::SpawnSuccessor => self.spawn_successor(),
                    LifecycleOutput::BeginDrain => {
                        let finished = self.begin_drain().await;
                        outcome = Some(finished);
                        self.machine
                            .process_input(LifecycleInput::DrainFinished(finished));
                    }
                    LifecycleOutput::Stop => {
                        info!(pid = std::process::id(), "Process lifecycle stopped");
                        return outcome;
                    }
                }
            }
        }
    }

    fn spawn_successor(&self) {
        let Some(handoff) = &self.handoff else {
            warn!("Reload requested but no listener handoff is available");
            return;
        };

        if let Err(e) = handoff.spawn_successor() {
            error!(error = %e, "Reload failed, continuing to serve");
        }
    }

    async fn begin_drain(&mut self) -> DrainOutcome {
        info!(
            timeout_secs = self.drain_timeout.as_secs(),
            "Draining: no longer accepting connections"
        );
        self.stop_accepting.cancel();
        self.handoff = None;

        let finished = match self.drain_hook.take() {
            Some(hook) => drain(hook, self.drain_timeout).await,
            None => DrainOutcome::Completed,
        };

        match finished {
            DrainOutcome::Completed => info!("Drain completed"),
            DrainOutcome::TimedOut => warn!("Drain timed out, stopping anyway"),
        }
        finished
    }
}
