//! Durable storage for accepted metric records.
//!
//! [`engine::SqliteStorage`] keeps one append-only table per metric kind.
//! [`batch::BatchWriter`] buffers records in front of it and flushes them as
//! a single transaction once the buffer is full. [`snapshot_file`] reads and
//! writes the JSON snapshot used for restore-on-restart.

pub mod batch;
pub mod engine;
pub mod error;
pub mod snapshot_file;


use error::Result;
use telemon_common::types::{Snapshot, WireRecord};

/// Persistence backend for metric records.
///
/// Implementations must be safe to share across threads (`Send + Sync`)
/// because the storage is written from concurrent request handlers and
/// pinged from the health endpoint.
pub trait MetricsStorage: Send + Sync {
    /// Checks that the backend answers a trivial query.
    fn ping(&self) -> Result<()>;

    /// Inserts one record outside of any batch.
    fn write_one(&self, record: &WireRecord) -> Result<()>;

    /// Inserts all records in one transaction. On any failure the
    /// transaction is rolled back and none of the records are stored.
    fn write_batch(&self, records: &[WireRecord]) -> Result<()>;

    /// Latest stored value per name and kind.
    fn load_latest(&self) -> Result<Snapshot>;
}
