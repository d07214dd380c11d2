use crate::state::AppState;
use std::sync::Arc;
use std::time::Duration;
use telemon_collector::FileCollector;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Saves the snapshot file every `every` until `shutdown` fires.
pub fn spawn_snapshot_saver(
    file: Arc<FileCollector>,
    every: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = interval_at(Instant::now() + every, every);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tick.tick() => save_snapshot(file.clone()).await,
            }
        }
        tracing::debug!("Snapshot saver stopped");
    })
}

pub async fn save_snapshot(file: Arc<FileCollector>) {
    let path = file.path().display().to_string();
    match tokio::task::spawn_blocking(move || file.save()).await {
        Ok(Ok(())) => tracing::debug!(path = %path, "Snapshot file saved"),
        Ok(Err(e)) => tracing::error!(path = %path, error = %e, "Failed to save snapshot file"),
        Err(e) => tracing::error!(error = %e, "Snapshot save task failed"),
    }
}

/// Final persistence on shutdown: commits whatever the batch writer still
/// buffers, then writes the snapshot file once more.
pub async fn finish(state: &AppState) {
    if let Some(writer) = state.batch_writer.clone() {
        match tokio::task::spawn_blocking(move || writer.flush()).await {
            Ok(Ok(flushed)) => tracing::info!(flushed, "Batch writer flushed"),
            Ok(Err(e)) => tracing::error!(error = %e, "Final batch flush failed"),
            Err(e) => tracing::error!(error = %e, "Final batch flush task failed"),
        }
    }
    if let Some(file) = state.file.clone() {
        save_snapshot(file).await;
    }
}
