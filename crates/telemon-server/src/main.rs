use anyhow::Result;
use telemon_server::config::ServerConfig;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("telemon=info".parse()?))
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/server.toml".to_string());

    let config = ServerConfig::load(&config_path)?;

    tracing::info!(
        address = %config.address,
        store_interval_secs = config.store_interval_secs,
        file = %config.file_storage_path,
        restore = config.restore,
        database = config.database_path.as_deref().unwrap_or("-"),
        "telemon-server starting"
    );

    let listener = tokio::net::TcpListener::bind(&config.address).await?;

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Shutting down gracefully");
                on_signal.cancel();
            }
            Err(e) => tracing::error!(error = %e, "Failed to listen for ctrl-c"),
        }
    });

    telemon_server::run(config, listener, shutdown).await
}
