use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use gateway_grpc::config::GatewayConfig;
use gateway_grpc::gateway::{BackendPool, ClientTransport, Gateway};
use gateway_grpc::server::{Server, ServerError};
use tokio::net::TcpListener;
use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinSet;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let config = GatewayConfig::from_env()?;

    info!(
        backend = %config.backend_addr,
        pool_size = config.pool_size,
        "Gateway connecting to backend"
    );
    let pool = Arc::new(BackendPool::connect(&config.backend_addr, config.pool_size).await?);

    let mut servers = Vec::new();
    let mut listeners = JoinSet::new();

    let tcp = listen(&pool, ClientTransport::Tcp, config.listen_addr, &mut listeners).await?;
    servers.push(tcp);

    if let Some(ws_addr) = config.ws_listen_addr {
        let ws = listen(&pool, ClientTransport::WebSocket, ws_addr, &mut listeners).await?;
        servers.push(ws);
    }

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Received SIGINT, shutting down"),
        _ = terminate.recv() => info!("Received SIGTERM, shutting down"),
        Some(exited) = listeners.join_next() => {
            match exited {
                Ok(Err(ServerError::Closed)) | Ok(Ok(())) => info!("Listener closed"),
                Ok(Err(e)) => error!(error = %e, "Listener failed"),
                Err(e) => error!(error = %e, "Listener task panicked"),
            }
        }
    }

    for server in &servers {
        server.close().await;
    }
    listeners.shutdown().await;

    info!("Gateway stopped");
    Ok(())
}

async fn listen(
    pool: &Arc<BackendPool>,
    transport: ClientTransport,
    addr: SocketAddr,
    listeners: &mut JoinSet<Result<(), ServerError>>,
) -> Result<Arc<Server<Gateway>>> {
    let listener = TcpListener::bind(addr).await?;
    info!(address = %listener.local_addr()?, transport = ?transport, "Gateway listening");

    let server = Server::new(
        Gateway::builder()
            .pool(Arc::clone(pool))
            .transport(transport)
            .build(),
    );
    listeners.spawn({
        let server = Arc::clone(&server);
        async move { server.serve(listener).await }
    });
    Ok(server)
}
