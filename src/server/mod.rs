//! Accept loop and connection tracking for client-facing listeners.
//!
//! A [`Server`] owns one [`Handler`] and any number of listeners. Every accepted socket is
//! tracked until its handler task exits, so [`Server::close`] can stop the listeners, wait for
//! their accept loops to unwind, and then force-close whatever is still connected.

mod backoff;

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tokio_util::task::task_tracker::TaskTrackerToken;
use tracing::{debug, info, warn};

pub use backoff::{AcceptBackoff, is_temporary};

#[derive(Debug, Error)]
pub enum ServerError {
    /// Returned by [`Server::serve`] once shutdown has begun.
    #[error("server closed")]
    Closed,

    #[error("failed to bind listener")]
    Bind(#[source] io::Error),

    /// A non-temporary accept failure stopped the accept loop.
    #[error("accept failed")]
    Accept(#[source] io::Error),
}

/// Source of inbound sockets for [`Server::serve`].
pub trait Listener: Send + 'static {
    type Io: Send + 'static;

    fn accept(&mut self) -> impl Future<Output = io::Result<(Self::Io, SocketAddr)>> + Send;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

impl Listener for TcpListener {
    type Io = TcpStream;

    async fn accept(&mut self) -> io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpListener::local_addr(self)
    }
}

/// Per-socket behaviour of a [`Server`]. One `serve` call runs per accepted socket, each on its
/// own task.
pub trait Handler<Io>: Send + Sync + 'static {
    fn serve(&self, io: Io, peer: SocketAddr) -> impl Future<Output = ()> + Send;
}

/// A [`Handler`] built from a closure, see [`handler_fn`].
pub struct HandlerFn<F>(F);

/// Use a closure returning a future as a [`Handler`].
pub fn handler_fn<F>(f: F) -> HandlerFn<F> {
    HandlerFn(f)
}

impl<Io, F, Fut> Handler<Io> for HandlerFn<F>
where
    F: Fn(Io, SocketAddr) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send,
{
    fn serve(&self, io: Io, peer: SocketAddr) -> impl Future<Output = ()> + Send {
        (self.0)(io, peer)
    }
}

#[derive(Debug, Default)]
struct Tracked {
    connections: HashMap<u64, CancellationToken>,
    listeners: HashMap<u64, CancellationToken>,
}

pub struct Server<H> {
    handler: Arc<H>,
    in_shutdown: AtomicBool,
    next_id: AtomicU64,
    // Guards both tracked sets.
    tracked: Mutex<Tracked>,
    listener_group: TaskTracker,
}

impl<H> Server<H> {
    pub fn new(handler: H) -> Arc<Self> {
        Arc::new(Self {
            handler: Arc::new(handler),
            in_shutdown: AtomicBool::new(false),
            next_id: AtomicU64::new(0),
            tracked: Mutex::new(Tracked::default()),
            listener_group: TaskTracker::new(),
        })
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn is_shutting_down(&self) -> bool {
        self.in_shutdown.load(Ordering::SeqCst)
    }

    pub fn connection_count(&self) -> usize {
        self.lock_tracked().connections.len()
    }

    pub fn listener_count(&self) -> usize {
        self.lock_tracked().listeners.len()
    }

    /// Bind `addr` and run the accept loop on it.
    pub async fn listen_and_serve(self: &Arc<Self>, addr: impl ToSocketAddrs) -> Result<(), ServerError>
    where
        H: Handler<TcpStream>,
    {
        let listener = TcpListener::bind(addr).await.map_err(ServerError::Bind)?;
        self.serve(listener).await
    }

    /// Run the accept loop until shutdown or a fatal accept error.
    ///
    /// Transient accept errors are retried with [`AcceptBackoff`]. However the loop ends, the
    /// whole server is closed before this returns.
    pub async fn serve<L>(self: &Arc<Self>, mut listener: L) -> Result<(), ServerError>
    where
        L: Listener,
        H: Handler<L::Io>,
    {
        let Some(guard) = self.track_listener() else {
            return Err(ServerError::Closed);
        };

        if let Ok(addr) = listener.local_addr() {
            info!(address = %addr, "Listener accepting connections");
        }

        let mut backoff = AcceptBackoff::new();
        let result = loop {
            let accepted = tokio::select! {
                () = guard.closed.cancelled() => break Err(ServerError::Closed),
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((io, peer)) => {
                    backoff.reset();
                    self.dispatch(io, peer);
                }
                Err(_) if self.is_shutting_down() => break Err(ServerError::Closed),
                Err(e) if is_temporary(&e) => {
                    let delay = backoff.next_delay();
                    warn!(error = %e, retry_in_ms = delay.as_millis() as u64, "Temporary accept error");
                    tokio::select! {
                        () = guard.closed.cancelled() => break Err(ServerError::Closed),
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Accept failed, stopping listener");
                    break Err(ServerError::Accept(e));
                }
            }
        };

        drop(listener);
        drop(guard);
        self.close().await;
        result
    }

    /// Gracefully shut the server down.
    ///
    /// Stops every listener, waits for their accept loops to exit, then force-closes all
    /// connections that are still tracked. A force-closed connection stays counted by
    /// [`Server::connection_count`] until its handler future has been dropped.
    pub async fn close(&self) {
        self.in_shutdown.store(true, Ordering::SeqCst);

        let listeners: Vec<CancellationToken> =
            self.lock_tracked().listeners.values().cloned().collect();
        for listener in listeners {
            listener.cancel();
        }

        self.listener_group.close();
        self.listener_group.wait().await;

        // Entries stay tracked; each dispatch task removes its own once the handler is gone.
        let connections: Vec<CancellationToken> =
            self.lock_tracked().connections.values().cloned().collect();
        if !connections.is_empty() {
            info!(count = connections.len(), "Force closing remaining connections");
        }
        for connection in connections {
            connection.cancel();
        }
    }

    fn dispatch<Io>(self: &Arc<Self>, io: Io, peer: SocketAddr)
    where
        Io: Send + 'static,
        H: Handler<Io>,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        self.lock_tracked().connections.insert(id, token.clone());

        debug!(conn = id, peer = %peer, "Accepted connection");

        let server = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                () = server.handler.serve(io, peer) => {
                    debug!(conn = id, peer = %peer, "Handler finished");
                }
                () = token.cancelled() => {
                    debug!(conn = id, peer = %peer, "Connection force closed");
                }
            }
            server.lock_tracked().connections.remove(&id);
        });
    }

    /// Register a listener; refused once shutdown has begun.
    fn track_listener(&self) -> Option<ListenerGuard<'_, H>> {
        let mut tracked = self.lock_tracked();
        if self.is_shutting_down() {
            return None;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let closed = CancellationToken::new();
        tracked.listeners.insert(id, closed.clone());

        Some(ListenerGuard {
            server: self,
            id,
            closed,
            _task: self.listener_group.token(),
        })
    }

    fn lock_tracked(&self) -> std::sync::MutexGuard<'_, Tracked> {
        self.tracked.lock().expect("server tracking lock poisoned")
    }
}

/// Keeps a listener registered (and counted in the listener group) while its accept loop runs.
struct ListenerGuard<'a, H> {
    server: &'a Server<H>,
    id: u64,
    closed: CancellationToken,
    _task: TaskTrackerToken,
}

impl<H> Drop for ListenerGuard<'_, H> {
    fn drop(&mut self) {
        self.server.lock_tracked().listeners.remove(&self.id);
    }
}
