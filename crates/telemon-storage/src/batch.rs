use crate::error::Result;
use crate::MetricsStorage;
use std::sync::{Arc, Mutex, MutexGuard};
use telemon_common::types::WireRecord;

/// What happened to a record handed to [`BatchWriter::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Added {
    /// The record is waiting in the buffer, which now holds this many records.
    Buffered(usize),
    /// The record filled the buffer and this many records were committed.
    Flushed(usize),
}

/// Bounded write buffer in front of a [`MetricsStorage`].
///
/// Appending, checking the length and flushing happen under one lock, so
/// concurrent request handlers can neither overrun the buffer nor flush the
/// same records twice. A failed flush rolls the transaction back and drops
/// the batch; records are not requeued.
pub struct BatchWriter {
    storage: Arc<dyn MetricsStorage>,
    capacity: usize,
    buffer: Mutex<Vec<WireRecord>>,
    span: tracing::Span,
}

impl BatchWriter {
    /// A zero `capacity` is treated as one, i.e. every record is flushed
    /// as its own transaction.
    pub fn new(storage: Arc<dyn MetricsStorage>, capacity: usize, span: tracing::Span) -> Self {
        let capacity = capacity.max(1);
        Self {
            storage,
            capacity,
            buffer: Mutex::new(Vec::with_capacity(capacity)),
            span,
        }
    }

    /// Lock the buffer, recovering from a poisoned Mutex if necessary.
    fn lock(&self) -> MutexGuard<'_, Vec<WireRecord>> {
        self.buffer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Buffers a record, flushing synchronously when the buffer fills up.
    pub fn add(&self, record: WireRecord) -> Result<Added> {
        let _entered = self.span.enter();
        let mut buffer = self.lock();
        buffer.push(record);
        if buffer.len() < self.capacity {
            return Ok(Added::Buffered(buffer.len()));
        }
        self.flush_locked(&mut buffer).map(Added::Flushed)
    }

    /// Buffers every record. A failed flush drops that batch but the
    /// remaining records are still buffered; the first error is returned.
    pub fn add_all(&self, records: Vec<WireRecord>) -> Result<()> {
        let mut first_error = None;
        for record in records {
            if let Err(e) = self.add(record) {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Commits whatever is buffered. Returns the number of records written.
    pub fn flush(&self) -> Result<usize> {
        let _entered = self.span.enter();
        let mut buffer = self.lock();
        self.flush_locked(&mut buffer)
    }

    /// Writes one record immediately, bypassing the buffer.
    ///
    /// Anything already buffered is older, so it is committed first and the
    /// newest row for a name stays the newest value.
    pub fn write_one(&self, record: &WireRecord) -> Result<()> {
        let _entered = self.span.enter();
        let mut buffer = self.lock();
        let flushed = self.flush_locked(&mut buffer);
        self.storage.write_one(record)?;
        flushed.map(|_| ())
    }

    fn flush_locked(&self, buffer: &mut Vec<WireRecord>) -> Result<usize> {
        let pending = std::mem::replace(buffer, Vec::with_capacity(self.capacity));
        if pending.is_empty() {
            return Ok(0);
        }
        match self.storage.write_batch(&pending) {
            Ok(()) => {
                tracing::debug!(count = pending.len(), "Batch committed");
                Ok(pending.len())
            }
            Err(e) => {
                tracing::error!(dropped = pending.len(), error = %e, "Batch rolled back");
                Err(e)
            }
        }
    }
}
