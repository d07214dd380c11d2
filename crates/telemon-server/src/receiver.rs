use std::sync::{Arc, Mutex};
use telemon_collector::MetricStore;
use telemon_common::error::MetricError;
use telemon_common::sign::{SignError, Signer};
use telemon_common::types::{Metric, MetricKind, WireRecord};
use telemon_storage::batch::BatchWriter;

#[derive(Debug, thiserror::Error)]
pub enum ReceiveError {
    #[error(transparent)]
    Metric(#[from] MetricError),

    #[error("Receive: record '{id}' failed verification: {source}")]
    Integrity {
        id: String,
        #[source]
        source: SignError,
    },

    #[error("Receive: {kind} '{id}' not found")]
    NotFound { kind: MetricKind, id: String },

    #[error("Receive: merge task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Server-side entry point for inbound metrics.
///
/// Verifies integrity codes when a key is configured, merges into the
/// [`MetricStore`] and hands whatever was merged to the [`BatchWriter`].
/// Store handoff failures are logged and never reach the caller.
///
/// Merging and the handoff happen under one lock, so records reach the
/// durable store in the order they were merged and the newest row for a
/// counter always carries its latest total.
pub struct Receiver {
    store: Arc<dyn MetricStore>,
    batch_writer: Option<Arc<BatchWriter>>,
    signer: Option<Signer>,
    handoff: Arc<Mutex<()>>,
    span: tracing::Span,
}

/// How merged records travel to the durable store.
#[derive(Debug, Clone, Copy)]
enum Handoff {
    /// Written on their own, bypassing the buffer.
    Immediate,
    Buffered,
}

impl Receiver {
    pub fn new(
        store: Arc<dyn MetricStore>,
        batch_writer: Option<Arc<BatchWriter>>,
        signer: Option<Signer>,
        span: tracing::Span,
    ) -> Self {
        Self {
            store,
            batch_writer,
            signer,
            handoff: Arc::default(),
            span,
        }
    }

    pub fn store(&self) -> &Arc<dyn MetricStore> {
        &self.store
    }

    /// Accepts a path-encoded update. Such updates carry no hash and are
    /// written to the durable store straight away.
    pub async fn accept_metric(&self, metric: Metric) -> Result<WireRecord, ReceiveError> {
        let record = metric.to_wire();
        self.merge_forward(Handoff::Immediate, move |store| {
            store.merge_one(&record).map(single)
        })
        .await
    }

    /// Accepts one JSON record and returns it as now stored, re-signed.
    pub async fn accept(&self, record: WireRecord) -> Result<WireRecord, ReceiveError> {
        self.verify(&record)?;
        let mut merged = self
            .merge_forward(Handoff::Buffered, move |store| {
                store.merge_one(&record).map(single)
            })
            .await?;
        self.sign(&mut merged)?;
        Ok(merged)
    }

    /// Accepts a batch all-or-nothing: every record is decoded and verified
    /// before any of them is merged.
    pub async fn accept_batch(&self, records: Vec<WireRecord>) -> Result<usize, ReceiveError> {
        for record in &records {
            record.metric()?;
            self.verify(record)?;
        }
        self.merge_forward(Handoff::Buffered, move |store| {
            store
                .merge_batch(&records)
                .map(|merged| (merged.len(), merged))
        })
        .await
    }

    /// Fills a query record's payload from the store, signing the answer.
    pub fn lookup(&self, query: &WireRecord) -> Result<WireRecord, ReceiveError> {
        let kind = query.kind()?;
        let value = self
            .store
            .value(kind, &query.id)
            .ok_or_else(|| ReceiveError::NotFound {
                kind,
                id: query.id.clone(),
            })?;
        let mut record = Metric {
            name: query.id.clone(),
            value,
        }
        .to_wire();
        self.sign(&mut record)?;
        Ok(record)
    }

    fn verify(&self, record: &WireRecord) -> Result<(), ReceiveError> {
        let Some(signer) = &self.signer else {
            return Ok(());
        };
        signer.verify_record(record).map_err(|source| {
            tracing::warn!(parent: &self.span, id = %record.id, error = %source, "Rejected record");
            ReceiveError::Integrity {
                id: record.id.clone(),
                source,
            }
        })
    }

    fn sign(&self, record: &mut WireRecord) -> Result<(), ReceiveError> {
        if let Some(signer) = &self.signer {
            signer.sign_record(record)?;
        }
        Ok(())
    }

    /// Runs `merge` and the store handoff on the blocking pool; a
    /// synchronous file save or a batch flush may happen inside either.
    ///
    /// `merge` returns the caller's answer plus the merged records to forward.
    async fn merge_forward<T, F>(&self, handoff: Handoff, merge: F) -> Result<T, ReceiveError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn MetricStore) -> Result<(T, Vec<WireRecord>), MetricError> + Send + 'static,
    {
        let store = self.store.clone();
        let writer = self.batch_writer.clone();
        let lock = self.handoff.clone();
        let span = self.span.clone();
        let answer = tokio::task::spawn_blocking(move || {
            let _entered = span.enter();
            let _ordered = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            let (answer, merged) = merge(store.as_ref())?;
            tracing::debug!(count = merged.len(), ?handoff, "Records merged");
            if let Some(writer) = writer {
                if let Err(e) = forward(&writer, handoff, merged) {
                    tracing::error!(error = %e, "Durable store handoff failed");
                }
            }
            Ok::<_, MetricError>(answer)
        })
        .await??;
        Ok(answer)
    }
}

fn forward(
    writer: &BatchWriter,
    handoff: Handoff,
    merged: Vec<WireRecord>,
) -> telemon_storage::error::Result<()> {
    match handoff {
        Handoff::Buffered => writer.add_all(merged),
        Handoff::Immediate => merged.iter().try_for_each(|record| writer.write_one(record)),
    }
}

fn single(merged: WireRecord) -> (WireRecord, Vec<WireRecord>) {
    (merged.clone(), vec![merged])
}
