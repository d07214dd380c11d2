use tokio::sync::mpsc;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Work item produced by a timer tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
    Poll,
    Push,
}

/// Turns the poll and push periods into [`Job`]s on a bounded queue.
///
/// A full queue blocks the tick loop until the runner catches up; ticks
/// missed meanwhile are delayed rather than replayed in a burst.
pub struct Scheduler {
    poll_interval: Duration,
    push_interval: Duration,
    span: tracing::Span,
}

/// Shortest period a timer may tick at; `interval_at` rejects zero.
const MIN_PERIOD: Duration = Duration::from_millis(1);

impl Scheduler {
    pub fn new(poll_interval: Duration, push_interval: Duration, span: tracing::Span) -> Self {
        Self {
            poll_interval: poll_interval.max(MIN_PERIOD),
            push_interval: push_interval.max(MIN_PERIOD),
            span,
        }
    }

    /// Runs until `shutdown` fires or the queue's receiver is dropped.
    pub async fn run(self, jobs: mpsc::Sender<Job>, shutdown: CancellationToken) {
        let span = self.span.clone();
        async move {
            tracing::info!(
                poll_ms = self.poll_interval.as_millis() as u64,
                push_ms = self.push_interval.as_millis() as u64,
                "Scheduler started"
            );

            let start = Instant::now();
            let mut poll = interval_at(start + self.poll_interval, self.poll_interval);
            let mut push = interval_at(start + self.push_interval, self.push_interval);
            poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
            push.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                let job = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = poll.tick() => Job::Poll,
                    _ = push.tick() => Job::Push,
                };

                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    sent = jobs.send(job) => {
                        if sent.is_err() {
                            tracing::debug!("Job queue closed");
                            break;
                        }
                    }
                }
            }

            tracing::info!("Scheduler stopped");
        }
        .instrument(span)
        .await
    }
}
