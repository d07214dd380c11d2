//! Metric sampling and the in-memory snapshot store.
//!
//! Each [`Sampler`] gathers one category of host or process statistics and
//! returns them as [`Metric`]s. The [`store::Collector`] holds the current
//! [`Snapshot`](telemon_common::types::Snapshot) behind a single lock and is
//! shared between the agent's poll jobs and push jobs, or between the
//! server's request handlers.

pub mod cpu;
pub mod memory;
pub mod runtime;
pub mod store;


use anyhow::Result;
use telemon_common::types::Metric;

pub use store::{Collector, FileCollector, MetricStore};

/// A source of metric samples.
///
/// Samplers are called from blocking tasks at each poll interval, outside of
/// any collector lock. The trait requires `Send + Sync` so a sampler can be
/// moved into those tasks.
pub trait Sampler: Send + Sync {
    /// Returns the sampler name (e.g., `"cpu"`), used for logging.
    fn name(&self) -> &str;

    /// Samples current values.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying system API call fails.
    fn sample(&mut self) -> Result<Vec<Metric>>;
}
