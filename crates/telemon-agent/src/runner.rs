use crate::pusher::Pusher;
use crate::scheduler::Job;
use anyhow::Result;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use telemon_collector::{Collector, Sampler};
use telemon_common::types::{Metric, Snapshot};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Samplers run together as one unit of poll work.
pub struct SamplerGroup {
    samplers: Mutex<Vec<Box<dyn Sampler>>>,
}

impl SamplerGroup {
    pub fn new(samplers: Vec<Box<dyn Sampler>>) -> Self {
        Self {
            samplers: Mutex::new(samplers),
        }
    }

    /// Samples every member; a failing sampler is logged and skipped.
    pub fn sample_all(&self) -> Vec<Metric> {
        let mut samplers = self
            .samplers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut metrics = Vec::new();
        for sampler in samplers.iter_mut() {
            match sampler.sample() {
                Ok(points) => metrics.extend(points),
                Err(e) => tracing::warn!(sampler = sampler.name(), error = %e, "Sampling failed"),
            }
        }
        metrics
    }
}

/// Counter totals the server has already acknowledged.
///
/// The server adds every counter it receives, so a push carries only what
/// accrued since the last successful push. Pushes hold the lock for their
/// whole round trip and therefore never send the same increment twice.
#[derive(Default)]
pub struct Reported {
    counters: tokio::sync::Mutex<HashMap<String, i64>>,
}

impl Reported {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes the collector's snapshot with counters reduced to their
    /// unreported part and records the totals once the push succeeds.
    pub async fn push(&self, collector: &Collector, pusher: &Pusher) -> Result<usize> {
        let mut reported = self.counters.lock().await;
        let snapshot = collector.get();
        let delta = unreported(&snapshot, &reported);
        let sent = pusher.push(&delta).await?;
        reported.extend(snapshot.counters);
        Ok(sent)
    }
}

fn unreported(snapshot: &Snapshot, reported: &HashMap<String, i64>) -> Snapshot {
    let counters = snapshot
        .counters
        .iter()
        .map(|(name, total)| {
            let before = reported.get(name).copied().unwrap_or(0);
            (name.clone(), total.saturating_sub(before))
        })
        .collect();
    Snapshot {
        gauges: snapshot.gauges.clone(),
        counters,
    }
}

/// Drains the job queue and dispatches each job onto a bounded pool of
/// tasks.
///
/// Dispatch only waits when every worker permit is taken. Failures inside a
/// job are logged at the job boundary and never reach the scheduler.
pub struct JobRunner {
    collector: Arc<Collector>,
    runtime: Arc<SamplerGroup>,
    host: Arc<SamplerGroup>,
    pusher: Arc<Pusher>,
    reported: Arc<Reported>,
    permits: Arc<Semaphore>,
    span: tracing::Span,
}

impl JobRunner {
    pub fn new(
        collector: Arc<Collector>,
        runtime: SamplerGroup,
        host: SamplerGroup,
        pusher: Arc<Pusher>,
        workers: usize,
        span: tracing::Span,
    ) -> Self {
        Self {
            collector,
            runtime: Arc::new(runtime),
            host: Arc::new(host),
            pusher,
            reported: Arc::new(Reported::new()),
            permits: Arc::new(Semaphore::new(workers.max(1))),
            span,
        }
    }

    /// Runs until `shutdown` fires or the queue closes, then waits for
    /// in-flight jobs.
    pub async fn run(self, mut jobs: mpsc::Receiver<Job>, shutdown: CancellationToken) {
        let span = self.span.clone();
        async move {
            let mut tasks = JoinSet::new();
            loop {
                let job = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    job = jobs.recv() => match job {
                        Some(job) => job,
                        None => break,
                    },
                };

                while let Some(done) = tasks.try_join_next() {
                    log_join(done);
                }

                match job {
                    Job::Poll => {
                        let (collector, runtime) = (self.collector.clone(), self.runtime.clone());
                        if !self
                            .dispatch(&mut tasks, &shutdown, "poll", refresh_runtime(collector, runtime))
                            .await
                        {
                            break;
                        }
                        let (collector, host) = (self.collector.clone(), self.host.clone());
                        if !self
                            .dispatch(&mut tasks, &shutdown, "poll-host", refresh_host(collector, host))
                            .await
                        {
                            break;
                        }
                    }
                    Job::Push => {
                        let collector = self.collector.clone();
                        let (pusher, reported) = (self.pusher.clone(), self.reported.clone());
                        if !self
                            .dispatch(&mut tasks, &shutdown, "push", push(collector, pusher, reported))
                            .await
                        {
                            break;
                        }
                    }
                }
            }

            tracing::info!(in_flight = tasks.len(), "Runner stopping, waiting for in-flight jobs");
            while let Some(done) = tasks.join_next().await {
                log_join(done);
            }
            tracing::info!("Runner stopped");
        }
        .instrument(span)
        .await
    }

    /// Spawns `work` once a worker permit is free. Returns `false` if
    /// shutdown fired while waiting.
    async fn dispatch<F>(
        &self,
        tasks: &mut JoinSet<()>,
        shutdown: &CancellationToken,
        name: &'static str,
        work: F,
    ) -> bool
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let permit = tokio::select! {
            _ = shutdown.cancelled() => return false,
            permit = self.permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return false,
            },
        };
        tasks.spawn(
            async move {
                if let Err(e) = work.await {
                    tracing::warn!(job = name, error = %e, "Job failed");
                }
                drop(permit);
            }
            .in_current_span(),
        );
        true
    }
}

fn log_join(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        tracing::error!(error = %e, "Job task aborted");
    }
}

async fn refresh_runtime(collector: Arc<Collector>, samplers: Arc<SamplerGroup>) -> Result<()> {
    let sampled = tokio::task::spawn_blocking(move || samplers.sample_all()).await?;
    tracing::debug!(count = sampled.len(), "Runtime metrics sampled");
    collector.refresh(sampled);
    Ok(())
}

async fn refresh_host(collector: Arc<Collector>, samplers: Arc<SamplerGroup>) -> Result<()> {
    let sampled = tokio::task::spawn_blocking(move || samplers.sample_all()).await?;
    tracing::debug!(count = sampled.len(), "Host metrics sampled");
    collector.update(sampled);
    Ok(())
}

async fn push(collector: Arc<Collector>, pusher: Arc<Pusher>, reported: Arc<Reported>) -> Result<()> {
    let sent = reported.push(&collector, &pusher).await?;
    tracing::debug!(sent, "Snapshot pushed");
    Ok(())
}
