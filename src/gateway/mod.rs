//! The client-facing half of the system: relays each client connection over its own backend
//! RPC session.
//!
//! Every accepted client gets the least loaded pool entry and one `Backend::Session` call on
//! it. Client messages go upstream as RPC requests, RPC responses come back as client writes,
//! and whichever direction ends first tears the whole session down.

pub mod error;

use std::net::SocketAddr;
use std::sync::Arc;

use bon::Builder;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::Streaming;
use tonic::transport::Channel;
use tracing::{debug, warn};

use crate::network::{Connection, ConnectionError, ConnectionOptions};
use crate::pool::{RpcPool, StreamGuard};
use crate::rpc_proto::backend_client::BackendClient;
use crate::rpc_proto::{Request as RpcRequest, Response as RpcResponse};
use crate::server::Handler;

use self::error::GatewayError;

pub type BackendPool = RpcPool<BackendClient<Channel>>;
pub type BackendStream = StreamGuard<BackendClient<Channel>>;

/// Requests buffered between the client read loop and the RPC send side.
const REQUEST_QUEUE_CAPACITY: usize = 64;

/// Wire protocol spoken by clients on one listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientTransport {
    Tcp,
    WebSocket,
}

/// [`Handler`] that turns every accepted client socket into a relayed backend session.
#[derive(Debug, Builder)]
pub struct Gateway {
    pool: Arc<BackendPool>,
    transport: ClientTransport,
    #[builder(default)]
    options: ConnectionOptions,
}

impl Gateway {
    pub fn pool(&self) -> &Arc<BackendPool> {
        &self.pool
    }

    async fn open(&self, io: TcpStream) -> Result<Connection, ConnectionError> {
        match self.transport {
            ClientTransport::Tcp => Connection::open_tcp(io, self.options),
            ClientTransport::WebSocket => Connection::accept_ws(io, self.options).await,
        }
    }
}

impl Handler<TcpStream> for Gateway {
    async fn serve(&self, io: TcpStream, peer: SocketAddr) {
        let conn = match self.open(io).await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(peer = %peer, transport = ?self.transport, error = %e, "Client connection setup failed");
                return;
            }
        };

        let stream = self.pool.open_least_loaded();
        let conn_id = conn.id();
        let index = stream.entry().index();

        match relay(conn, stream).await {
            Ok(()) => debug!(conn_id = %conn_id, peer = %peer, entry = index, "Gateway session ended"),
            Err(e) => warn!(
                conn_id = %conn_id,
                peer = %peer,
                entry = index,
                error = %e,
                "Gateway session failed"
            ),
        }
    }
}

/// Relay `conn` over a fresh RPC session on the entry counted by `stream` until either side
/// ends.
///
/// `stream` is released when this returns, including when the session cannot be opened. On
/// return the client connection is closed and the backend-to-client task has finished.
pub async fn relay(conn: Connection, stream: BackendStream) -> Result<(), GatewayError> {
    let entry = Arc::clone(stream.entry());
    let (requests, rx) = mpsc::channel(REQUEST_QUEUE_CAPACITY);
    let mut client = entry.client().clone();

    let responses = match client.session(ReceiverStream::new(rx)).await {
        Ok(response) => response.into_inner(),
        Err(status) => {
            conn.close();
            return Err(GatewayError::Rpc(status));
        }
    };

    let conn = Arc::new(conn);
    let done = CancellationToken::new();
    // A force-closed session drops this future; the response task must stop with it.
    let _stop_on_drop = done.clone().drop_guard();
    debug!(
        conn_id = %conn.id(),
        peer = %conn.remote_addr(),
        entry = entry.index(),
        streams = entry.streams(),
        "Gateway session started"
    );

    let downstream = tokio::spawn(forward_responses(
        responses,
        Arc::clone(&conn),
        done.clone(),
    ));

    let upstream = forward_requests(&conn, &requests, &done).await;

    done.cancel();
    conn.close();
    drop(requests);

    let downstream = match downstream.await {
        Ok(result) => result,
        Err(e) => {
            warn!(conn_id = %conn.id(), error = %e, "Response task did not finish cleanly");
            Ok(())
        }
    };
    drop(stream);

    upstream.and(downstream)
}

/// Client to backend: every received message becomes one RPC request.
async fn forward_requests(
    conn: &Connection,
    requests: &mpsc::Sender<RpcRequest>,
    done: &CancellationToken,
) -> Result<(), GatewayError> {
    let result = loop {
        let received = tokio::select! {
            biased;
            () = done.cancelled() => break Ok(()),
            received = conn.receive() => received,
        };

        let message = match received {
            Ok(message) => message,
            Err(ConnectionError::Closed) => break Ok(()),
            Err(e) => break Err(e.into()),
        };

        let request = RpcRequest {
            r#type: message.kind(),
            payload: message.into_payload().to_vec(),
        };
        let sent = tokio::select! {
            biased;
            () = done.cancelled() => break Ok(()),
            sent = requests.send(request) => sent,
        };
        if sent.is_err() {
            // RPC send side is gone; the response task reports why.
            break Ok(());
        }
    };

    done.cancel();
    result
}

/// Backend to client: every RPC response becomes one client write.
async fn forward_responses(
    mut responses: Streaming<RpcResponse>,
    conn: Arc<Connection>,
    done: CancellationToken,
) -> Result<(), GatewayError> {
    let result = loop {
        let next = tokio::select! {
            biased;
            () = done.cancelled() => break Ok(()),
            next = responses.message() => next,
        };

        match next {
            Ok(Some(response)) => {
                if let Err(e) = conn.write(response.r#type, response.payload).await {
                    break match e {
                        ConnectionError::Closed => Ok(()),
                        e => Err(e.into()),
                    };
                }
            }
            Ok(None) => {
                debug!(conn_id = %conn.id(), "Backend ended the session");
                break Ok(());
            }
            Err(status) => break Err(status.into()),
        }
    };

    done.cancel();
    result
}
