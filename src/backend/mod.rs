//! The backend RPC process: an echo stand-in service behind the reloadable lifecycle.

pub mod error;

mod echo;
mod registry;

use std::io;

use futures::Stream;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::BackendConfig;
use crate::lifecycle::handoff::{self, ListenerHandoff};
use crate::lifecycle::{OsSignals, ProcessLifecycle};
use crate::rpc_proto::backend_server::BackendServer;
use crate::server::{AcceptBackoff, is_temporary};

use self::error::BackendError;

pub use echo::EchoService;
pub use registry::{SessionRegistry, SessionTicket};

/// Serve `service` on `listener` until `stop_accepting` fires or accepting fails for good.
///
/// Sessions already open keep running after this returns; their tasks belong to the runtime.
pub async fn serve(
    listener: TcpListener,
    service: EchoService,
    stop_accepting: CancellationToken,
) -> Result<(), BackendError> {
    tonic::transport::Server::builder()
        .add_service(BackendServer::new(service))
        .serve_with_incoming(incoming(listener, stop_accepting))
        .await?;
    Ok(())
}

/// Accepted sockets until `stop_accepting` fires. Temporary accept errors are retried with
/// backoff; any other accept error ends the stream.
fn incoming(
    listener: TcpListener,
    stop_accepting: CancellationToken,
) -> impl Stream<Item = io::Result<TcpStream>> {
    async_stream::stream! {
        let mut backoff = AcceptBackoff::new();

        loop {
            let accepted = tokio::select! {
                biased;
                _ = stop_accepting.cancelled() => None,
                accepted = listener.accept() => Some(accepted),
            };

            match accepted {
                None => break,
                Some(Ok((stream, peer))) => {
                    backoff.reset();
                    debug!(peer = %peer, "Accepted RPC connection");
                    yield Ok(stream);
                }
                Some(Err(e)) if is_temporary(&e) => {
                    let delay = backoff.next_delay();
                    warn!(error = %e, delay_ms = delay.as_millis() as u64, "Temporary accept error, retrying");
                    let stopped = tokio::select! {
                        biased;
                        _ = stop_accepting.cancelled() => true,
                        _ = tokio::time::sleep(delay) => false,
                    };
                    if stopped {
                        break;
                    }
                }
                Some(Err(e)) => {
                    error!(error = %e, "Accept failed, no longer accepting");
                    break;
                }
            }
        }

        info!("Backend listener stopped accepting");
    }
}

/// Run the backend process until a stop signal has been handled.
pub async fn run(config: BackendConfig) -> Result<(), BackendError> {
    let std_listener = handoff::take_listener(config.listen_addr)?;
    let listener_handoff = ListenerHandoff::new(&std_listener).map_err(BackendError::Listener)?;
    let listener = TcpListener::from_std(std_listener).map_err(BackendError::Listener)?;
    let local_addr = listener.local_addr().map_err(BackendError::Listener)?;

    let signals = OsSignals::install()?;
    let sessions = SessionRegistry::new();
    let stop_accepting = CancellationToken::new();

    let server = tokio::spawn({
        let service = EchoService::new(sessions.clone());
        let stop_accepting = stop_accepting.clone();
        async move {
            if let Err(e) = serve(listener, service, stop_accepting).await {
                error!(error = %e, "RPC server exited");
            }
        }
    });

    info!(address = %local_addr, pid = std::process::id(), "Backend serving");

    if handoff::is_successor() {
        match handoff::notify_parent() {
            Ok(parent) => info!(parent = parent.as_raw(), "Notified parent to drain"),
            Err(e) => warn!(error = %e, "Could not notify parent process"),
        }
    }

    let lifecycle = ProcessLifecycle::builder()
        .stop_accepting(stop_accepting)
        .handoff(listener_handoff)
        .drain_hook(Box::pin(sessions.clone().wait_idle()))
        .drain_timeout(config.drain_timeout)
        .build();
    let outcome = lifecycle.run(signals).await;

    server.abort();
    info!(
        outcome = ?outcome,
        remaining_sessions = sessions.active(),
        "Backend stopped"
    );
    Ok(())
}
