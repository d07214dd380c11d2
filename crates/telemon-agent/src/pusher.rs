use std::time::Duration;
use telemon_common::error::MetricError;
use telemon_common::sign::Signer;
use telemon_common::types::{Snapshot, WireRecord};
use tracing::Instrument;

#[derive(Debug, thiserror::Error)]
pub enum PushError {
    #[error("Push: failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("Push: request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Push: {url} answered {status}")]
    Rejected { url: String, status: u16 },

    #[error(transparent)]
    Metric(#[from] MetricError),
}

/// Sends snapshots to the server, either one signed request per metric or
/// a single batch.
pub struct Pusher {
    client: reqwest::Client,
    base_url: String,
    signer: Option<Signer>,
    batch: bool,
    span: tracing::Span,
}

impl Pusher {
    pub fn new(
        base_url: &str,
        signer: Option<Signer>,
        batch: bool,
        timeout: Duration,
        span: tracing::Span,
    ) -> Result<Self, PushError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(PushError::Client)?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            signer,
            batch,
            span,
        })
    }

    /// Wire records for a snapshot, signed when a key is configured.
    pub fn prepare(&self, snapshot: &Snapshot) -> Result<Vec<WireRecord>, MetricError> {
        let mut records = snapshot.records();
        if let Some(signer) = &self.signer {
            for record in &mut records {
                signer.sign_record(record)?;
            }
        }
        Ok(records)
    }

    /// Pushes the snapshot. Returns how many records the server accepted.
    ///
    /// There is no retry: a failed push is reported to the caller, who logs
    /// it, and the next push carries fresher values anyway.
    pub async fn push(&self, snapshot: &Snapshot) -> Result<usize, PushError> {
        let records = self.prepare(snapshot)?;
        if records.is_empty() {
            return Ok(0);
        }
        let count = records.len();
        async move {
            if self.batch {
                self.post("/updates/", &records).await?;
                tracing::debug!(count, "Batch pushed");
                Ok(count)
            } else {
                self.push_each(&records).await
            }
        }
        .instrument(self.span.clone())
        .await
    }

    /// Legacy path: one request per record. Every record is attempted; the
    /// first failure is returned after the rest have been sent.
    async fn push_each(&self, records: &[WireRecord]) -> Result<usize, PushError> {
        let mut sent = 0;
        let mut first_error = None;
        for record in records {
            match self.post("/update/", record).await {
                Ok(()) => sent += 1,
                Err(e) => {
                    tracing::debug!(id = %record.id, error = %e, "Record push failed");
                    first_error.get_or_insert(e);
                }
            }
        }
        tracing::debug!(sent, total = records.len(), "Records pushed");
        match first_error {
            Some(e) => Err(e),
            None => Ok(sent),
        }
    }

    async fn post<T: serde::Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<(), PushError> {
        let url = format!("{}{path}", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|source| PushError::Transport {
                url: url.clone(),
                source,
            })?;
        let status = resp.status();
        if !status.is_success() {
            return Err(PushError::Rejected {
                url,
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}
