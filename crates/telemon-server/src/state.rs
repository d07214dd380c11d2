use crate::config::ServerConfig;
use crate::receiver::Receiver;
use anyhow::Result;
use std::sync::Arc;
use telemon_collector::{Collector, FileCollector, MetricStore};
use telemon_common::sign::Signer;
use telemon_common::types::Snapshot;
use telemon_storage::batch::BatchWriter;
use telemon_storage::engine::SqliteStorage;
use telemon_storage::MetricsStorage;

#[derive(Clone)]
pub struct AppState {
    pub receiver: Arc<Receiver>,
    /// Set when a snapshot file is configured; the same object backs `receiver`.
    pub file: Option<Arc<FileCollector>>,
    pub storage: Option<Arc<dyn MetricsStorage>>,
    pub batch_writer: Option<Arc<BatchWriter>>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    /// Opens the configured stores, restores the last known snapshot and
    /// wires the receiver.
    pub fn build(config: ServerConfig) -> Result<Self> {
        let storage: Option<Arc<dyn MetricsStorage>> = match config.database_path() {
            Some(path) => {
                let engine: Arc<dyn MetricsStorage> = Arc::new(SqliteStorage::open(&path)?);
                tracing::info!(path = %path.display(), "Durable store opened");
                Some(engine)
            }
            None => {
                tracing::info!("No database configured, durable store disabled");
                None
            }
        };

        let batch_writer = storage.as_ref().map(|storage| {
            Arc::new(BatchWriter::new(
                storage.clone(),
                config.batch_capacity,
                tracing::info_span!("batch_writer"),
            ))
        });

        let restored = if config.restore {
            storage.as_deref().and_then(restore_from_storage)
        } else {
            None
        };

        let (store, file): (Arc<dyn MetricStore>, Option<Arc<FileCollector>>) = match config.snapshot_path() {
            Some(path) => {
                let sync_writes = config.store_interval().is_none();
                let file = match (&restored, config.restore) {
                    (None, true) => FileCollector::restore(&path, sync_writes).unwrap_or_else(|e| {
                        tracing::error!(path = %path.display(), error = %e, "Failed to restore snapshot file");
                        FileCollector::new(&path, sync_writes)
                    }),
                    _ => FileCollector::new(&path, sync_writes),
                };
                if let Some(snapshot) = restored {
                    file.replace(snapshot);
                }
                let file = Arc::new(file);
                let store: Arc<dyn MetricStore> = file.clone();
                (store, Some(file))
            }
            None => {
                let store: Arc<dyn MetricStore> =
                    Arc::new(Collector::with_snapshot(restored.unwrap_or_default()));
                (store, None)
            }
        };

        let signer = Signer::from_key(config.key.as_deref());
        tracing::info!(
            store = store.describe(),
            metrics = store.snapshot().len(),
            signed = signer.is_some(),
            "Metric store ready"
        );

        let receiver = Receiver::new(
            store,
            batch_writer.clone(),
            signer,
            tracing::info_span!("receiver"),
        );

        Ok(Self {
            receiver: Arc::new(receiver),
            file,
            storage,
            batch_writer,
            config: Arc::new(config),
        })
    }
}

/// Latest values from the durable store. An empty or failing store yields
/// `None` so the snapshot file gets its turn.
fn restore_from_storage(storage: &dyn MetricsStorage) -> Option<Snapshot> {
    match storage.load_latest() {
        Ok(snapshot) if snapshot.is_empty() => None,
        Ok(snapshot) => {
            tracing::info!(metrics = snapshot.len(), "Restored snapshot from durable store");
            Some(snapshot)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to restore from durable store, trying snapshot file");
            None
        }
    }
}
