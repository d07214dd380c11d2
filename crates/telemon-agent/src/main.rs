use anyhow::Result;
use telemon_agent::config::AgentConfig;
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
        .unwrap_or_else(|| "config/agent.toml".to_string());

    let config = AgentConfig::load(&config_path)?;

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

    telemon_agent::run(config, shutdown).await?;
    tracing::info!("Agent stopped");
    Ok(())
}
