//! The telemon server: receives metrics over HTTP, keeps the current
//! snapshot in memory and persists it to a snapshot file and an optional
//! SQLite store.

pub mod api;
pub mod app;
pub mod config;
pub mod error;
pub mod logging;
pub mod persist;
pub mod receiver;
pub mod state;

use anyhow::Result;
use config::ServerConfig;
use state::AppState;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Serves on `listener` until `shutdown` fires, then drains connections and
/// persists what is left.
pub async fn run(config: ServerConfig, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
    let state = AppState::build(config)?;

    let saver = match (&state.file, state.config.store_interval()) {
        (Some(file), Some(every)) => Some(persist::spawn_snapshot_saver(
            file.clone(),
            every,
            shutdown.clone(),
        )),
        _ => None,
    };

    let app = app::build_http_app(state.clone());
    tracing::info!(address = %listener.local_addr()?, "Server started");

    let token = shutdown.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await;
    shutdown.cancel();

    if let Some(saver) = saver {
        if let Err(e) = saver.await {
            tracing::error!(error = %e, "Snapshot saver task failed");
        }
    }
    persist::finish(&state).await;
    tracing::info!("Server stopped");

    served?;
    Ok(())
}
