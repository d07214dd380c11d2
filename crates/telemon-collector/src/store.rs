use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use telemon_common::error::MetricError;
use telemon_common::types::{
    Metric, MetricKind, MetricValue, Snapshot, WireRecord, POLL_COUNT,
};
use telemon_storage::error::StorageError;
use telemon_storage::snapshot_file;

/// Read/merge capability shared by every snapshot holder.
///
/// The server's handlers only see this trait; which variant backs it is
/// decided once at startup.
pub trait MetricStore: Send + Sync {
    /// Short label for logs and the status page.
    fn describe(&self) -> &'static str;

    /// A consistent copy of the current snapshot.
    fn snapshot(&self) -> Snapshot;

    fn value(&self, kind: MetricKind, name: &str) -> Option<MetricValue>;

    /// Applies one record: gauges overwrite, counters accumulate. Returns the
    /// record as now stored (a counter carries its new total in `delta`).
    fn merge_one(&self, record: &WireRecord) -> Result<WireRecord, MetricError>;

    /// Applies records in order. The first failing record stops the batch;
    /// records merged before it stay merged.
    fn merge_batch(&self, records: &[WireRecord]) -> Result<Vec<WireRecord>, MetricError>;
}

/// Single lock-protected owner of the current [`Snapshot`].
#[derive(Default)]
pub struct Collector {
    snapshot: Mutex<Snapshot>,
}

impl Collector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: Snapshot) -> Self {
        Self {
            snapshot: Mutex::new(snapshot),
        }
    }

    /// Lock the snapshot, recovering from a poisoned Mutex if necessary.
    fn lock(&self) -> MutexGuard<'_, Snapshot> {
        self.snapshot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Applies a fresh sample and bumps `PollCount`, as one critical section.
    ///
    /// Sampling happens before the call; the lock only covers the update.
    pub fn refresh(&self, sampled: Vec<Metric>) {
        let mut snapshot = self.lock();
        apply_sample(&mut snapshot, sampled);
        let polls = snapshot.counters.entry(POLL_COUNT.to_string()).or_insert(0);
        *polls = polls.saturating_add(1);
    }

    /// Applies a sample without counting it as a poll.
    pub fn update(&self, sampled: Vec<Metric>) {
        let mut snapshot = self.lock();
        apply_sample(&mut snapshot, sampled);
    }

    pub fn get(&self) -> Snapshot {
        self.lock().clone()
    }

    /// Looks a name up across both kinds.
    pub fn get_one(&self, name: &str) -> Option<MetricValue> {
        self.lock().find(name)
    }

    /// Replaces the whole snapshot, e.g. after a restore.
    pub fn replace(&self, snapshot: Snapshot) {
        *self.lock() = snapshot;
    }
}

fn apply_sample(snapshot: &mut Snapshot, sampled: Vec<Metric>) {
    for metric in sampled {
        match metric.value {
            MetricValue::Gauge(v) => {
                snapshot.gauges.insert(metric.name, v);
            }
            MetricValue::Counter(d) => {
                let total = snapshot.counters.entry(metric.name).or_insert(0);
                *total = total.saturating_add(d);
            }
        }
    }
}

fn merge_locked(snapshot: &mut Snapshot, record: &WireRecord) -> Result<WireRecord, MetricError> {
    let metric = record.metric()?;
    let merged = match metric.value {
        MetricValue::Gauge(v) => {
            snapshot.gauges.insert(metric.name.clone(), v);
            WireRecord::gauge(metric.name, v)
        }
        MetricValue::Counter(d) => {
            let total = snapshot.counters.entry(metric.name.clone()).or_insert(0);
            *total = total.saturating_add(d);
            WireRecord::counter(metric.name, *total)
        }
    };
    Ok(merged)
}

impl MetricStore for Collector {
    fn describe(&self) -> &'static str {
        "memory"
    }

    fn snapshot(&self) -> Snapshot {
        self.get()
    }

    fn value(&self, kind: MetricKind, name: &str) -> Option<MetricValue> {
        self.lock().get(kind, name)
    }

    fn merge_one(&self, record: &WireRecord) -> Result<WireRecord, MetricError> {
        merge_locked(&mut self.lock(), record)
    }

    fn merge_batch(&self, records: &[WireRecord]) -> Result<Vec<WireRecord>, MetricError> {
        let mut snapshot = self.lock();
        records
            .iter()
            .map(|record| merge_locked(&mut snapshot, record))
            .collect()
    }
}

/// A [`Collector`] mirrored to a JSON snapshot file.
///
/// With `sync_writes` the file is rewritten after every successful merge;
/// otherwise the owner calls [`FileCollector::save`] on its own schedule.
/// Saves are serialized, so the file never goes back to an older copy.
pub struct FileCollector {
    inner: Collector,
    path: PathBuf,
    sync_writes: bool,
    save_lock: Mutex<()>,
}

impl FileCollector {
    pub fn new(path: &Path, sync_writes: bool) -> Self {
        Self {
            inner: Collector::new(),
            path: path.to_path_buf(),
            sync_writes,
            save_lock: Mutex::new(()),
        }
    }

    /// Loads the snapshot file if present. A missing file yields an empty
    /// collector; an unreadable one is an error.
    pub fn restore(path: &Path, sync_writes: bool) -> Result<Self, StorageError> {
        let collector = Self::new(path, sync_writes);
        if let Some(snapshot) = snapshot_file::load(path)? {
            tracing::info!(
                path = %path.display(),
                metrics = snapshot.len(),
                "Restored snapshot from file"
            );
            collector.inner.replace(snapshot);
        }
        Ok(collector)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn replace(&self, snapshot: Snapshot) {
        self.inner.replace(snapshot);
    }

    /// Writes the current snapshot. The copy and the write happen under the
    /// save lock; merges only wait for the copy.
    pub fn save(&self) -> Result<(), StorageError> {
        let _saving = self
            .save_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let snapshot = self.inner.get();
        snapshot_file::save(&self.path, &snapshot)
    }

    fn save_if_sync(&self) {
        if !self.sync_writes {
            return;
        }
        if let Err(e) = self.save() {
            tracing::error!(path = %self.path.display(), error = %e, "Failed to save snapshot file");
        }
    }
}

impl MetricStore for FileCollector {
    fn describe(&self) -> &'static str {
        "file"
    }

    fn snapshot(&self) -> Snapshot {
        self.inner.get()
    }

    fn value(&self, kind: MetricKind, name: &str) -> Option<MetricValue> {
        self.inner.value(kind, name)
    }

    fn merge_one(&self, record: &WireRecord) -> Result<WireRecord, MetricError> {
        let merged = self.inner.merge_one(record)?;
        self.save_if_sync();
        Ok(merged)
    }

    fn merge_batch(&self, records: &[WireRecord]) -> Result<Vec<WireRecord>, MetricError> {
        let result = self.inner.merge_batch(records);
        // Earlier records of a failed batch are already merged, so persist either way.
        self.save_if_sync();
        result
    }
}
