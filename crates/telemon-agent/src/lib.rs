//! The telemon agent: samples process and host metrics on one timer and
//! pushes them to the server on another.

pub mod config;
pub mod pusher;
pub mod runner;
pub mod scheduler;

#[cfg(test)]
mod tests;

use anyhow::Result;
use config::AgentConfig;
use pusher::Pusher;
use runner::{JobRunner, SamplerGroup};
use scheduler::Scheduler;
use std::sync::Arc;
use telemon_collector::cpu::CpuSampler;
use telemon_collector::memory::MemorySampler;
use telemon_collector::runtime::RuntimeSampler;
use telemon_collector::{Collector, Sampler};
use telemon_common::sign::Signer;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Runs the agent until `shutdown` fires, then waits for in-flight jobs.
pub async fn run(config: AgentConfig, shutdown: CancellationToken) -> Result<()> {
    let collector = Arc::new(Collector::new());
    let runtime: Vec<Box<dyn Sampler>> = vec![Box::new(RuntimeSampler::new()?)];
    let host: Vec<Box<dyn Sampler>> = vec![
        Box::new(CpuSampler::new()),
        Box::new(MemorySampler::new()),
    ];

    let signer = Signer::from_key(config.key.as_deref());
    if signer.is_none() {
        tracing::info!("No key configured, pushing unsigned records");
    }
    let pusher = Arc::new(Pusher::new(
        &config.base_url(),
        signer,
        config.batch,
        config.request_timeout(),
        tracing::info_span!("pusher"),
    )?);

    tracing::info!(
        server = %config.base_url(),
        poll_secs = config.poll_interval().as_secs(),
        report_secs = config.report_interval().as_secs(),
        rate_limit = config.rate_limit,
        batch = config.batch,
        "Starting agent"
    );

    let (jobs_tx, jobs_rx) = mpsc::channel(config.rate_limit.max(1));
    let scheduler = Scheduler::new(
        config.poll_interval(),
        config.report_interval(),
        tracing::info_span!("scheduler"),
    );
    let runner = JobRunner::new(
        collector,
        SamplerGroup::new(runtime),
        SamplerGroup::new(host),
        pusher,
        config.rate_limit,
        tracing::info_span!("runner"),
    );

    let scheduler_handle = tokio::spawn(scheduler.run(jobs_tx, shutdown.clone()));
    runner.run(jobs_rx, shutdown).await;
    scheduler_handle.await?;
    Ok(())
}
