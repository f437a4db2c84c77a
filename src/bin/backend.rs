use anyhow::Result;
use gateway_grpc::backend;
use gateway_grpc::config::BackendConfig;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let config = BackendConfig::from_env()?;

    info!(
        address = %config.listen_addr,
        drain_timeout_secs = config.drain_timeout.as_secs(),
        pid = std::process::id(),
        "Backend starting"
    );

    backend::run(config).await?;
    Ok(())
}
