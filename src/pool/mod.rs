//! Fixed-size pool of backend RPC client handles.
//!
//! Every entry is dialed once when the pool is built and lives for the rest of the process.
//! Entries are never health checked, re-dialed or replaced; a broken backend handle stays
//! selectable by [`RpcPool::get_conn`], [`RpcPool::get_least_conn`] and
//! [`RpcPool::open_least_loaded`].

pub mod error;

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use tonic::transport::{Channel, Endpoint};
use tracing::{debug, info, warn};

use crate::rpc_proto::backend_client::BackendClient;

use self::error::PoolError;

/// One pooled backend client handle plus the number of streams currently open against it.
pub struct PoolEntry<C> {
    index: usize,
    client: C,
    // Own lock so counter churn on one entry never waits on the pool or other entries.
    streams: Mutex<usize>,
}

impl<C> PoolEntry<C> {
    fn new(index: usize, client: C) -> Self {
        Self {
            index,
            client,
            streams: Mutex::new(0),
        }
    }

    /// Position of this entry in construction order.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Streams currently open against this entry.
    pub fn streams(&self) -> usize {
        *self.lock_streams()
    }

    pub fn incr_streams(&self) {
        *self.lock_streams() += 1;
    }

    pub fn decr_streams(&self) {
        let mut streams = self.lock_streams();
        match streams.checked_sub(1) {
            Some(next) => *streams = next,
            None => warn!(entry = self.index, "Stream counter decremented below zero"),
        }
    }

    /// Count one open stream for as long as the returned guard lives.
    pub fn open_stream(self: &Arc<Self>) -> StreamGuard<C> {
        self.incr_streams();
        StreamGuard {
            entry: Arc::clone(self),
        }
    }

    fn lock_streams(&self) -> MutexGuard<'_, usize> {
        self.streams.lock().expect("stream counter lock poisoned")
    }
}

impl<C> fmt::Debug for PoolEntry<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolEntry")
            .field("index", &self.index)
            .field("streams", &self.streams())
            .finish()
    }
}

/// Decrements its entry's stream counter exactly once, when dropped.
pub struct StreamGuard<C> {
    entry: Arc<PoolEntry<C>>,
}

impl<C> StreamGuard<C> {
    pub fn entry(&self) -> &Arc<PoolEntry<C>> {
        &self.entry
    }
}

impl<C> Drop for StreamGuard<C> {
    fn drop(&mut self) {
        self.entry.decr_streams();
    }
}

pub struct RpcPool<C> {
    entries: Vec<Arc<PoolEntry<C>>>,
    // Pool lock: the round-robin cursor, also held for the whole least-loaded scan.
    cursor: Mutex<usize>,
}

impl<C> RpcPool<C> {
    /// Build a pool from already established client handles, keeping their order.
    pub fn from_clients(clients: impl IntoIterator<Item = C>) -> Result<Self, PoolError> {
        let entries: Vec<_> = clients
            .into_iter()
            .enumerate()
            .map(|(index, client)| Arc::new(PoolEntry::new(index, client)))
            .collect();

        if entries.is_empty() {
            return Err(PoolError::Empty);
        }

        Ok(Self {
            entries,
            cursor: Mutex::new(0),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Arc<PoolEntry<C>>] {
        &self.entries
    }

    /// Next entry in strict rotation, ignoring load.
    pub fn get_conn(&self) -> Arc<PoolEntry<C>> {
        let mut cursor = self.lock_cursor();
        let entry = Arc::clone(&self.entries[*cursor]);
        *cursor = (*cursor + 1) % self.entries.len();
        entry
    }

    /// Entry with the fewest open streams. Ties go to the lowest index.
    pub fn get_least_conn(&self) -> Arc<PoolEntry<C>> {
        let _pool = self.lock_cursor();
        Arc::clone(self.least_loaded())
    }

    /// Pick the least loaded entry and count a stream on it in one step.
    ///
    /// Selection and increment happen under the pool lock, so concurrent callers each see the
    /// load left by the ones before them.
    pub fn open_least_loaded(&self) -> StreamGuard<C> {
        let _pool = self.lock_cursor();
        self.least_loaded().open_stream()
    }

    // Caller holds the pool lock.
    fn least_loaded(&self) -> &Arc<PoolEntry<C>> {
        let mut least = &self.entries[0];
        let mut least_streams = least.streams();
        for entry in &self.entries[1..] {
            let streams = entry.streams();
            if streams < least_streams {
                least = entry;
                least_streams = streams;
            }
        }

        debug!(entry = least.index, streams = least_streams, "Selected least loaded entry");
        least
    }

    fn lock_cursor(&self) -> MutexGuard<'_, usize> {
        self.cursor.lock().expect("pool lock poisoned")
    }
}

impl RpcPool<BackendClient<Channel>> {
    /// Dial `size` independent channels to the backend at `addr`.
    ///
    /// Every channel is connected before this returns; the first dial failure aborts
    /// construction.
    pub async fn connect(addr: &str, size: usize) -> Result<Self, PoolError> {
        if size == 0 {
            return Err(PoolError::Empty);
        }

        let uri = if addr.contains("://") {
            addr.to_string()
        } else {
            format!("http://{addr}")
        };
        let endpoint = Endpoint::from_shared(uri.clone()).map_err(|source| PoolError::Dial {
            addr: uri.clone(),
            source,
        })?;

        let mut clients = Vec::with_capacity(size);
        for _ in 0..size {
            let channel = endpoint.connect().await.map_err(|source| PoolError::Dial {
                addr: uri.clone(),
                source,
            })?;
            clients.push(BackendClient::new(channel));
        }

        info!(backend = %uri, size, "RPC pool connected");
        Self::from_clients(clients)
    }
}

impl<C> fmt::Debug for RpcPool<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcPool")
            .field("entries", &self.entries)
            .finish_non_exhaustive()
    }
}
