use crate::config::AgentConfig;
use crate::pusher::{PushError, Pusher};
use crate::runner::{JobRunner, Reported, SamplerGroup};
use crate::scheduler::{Job, Scheduler};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use telemon_collector::{Collector, Sampler};
use telemon_common::sign::Signer;
use telemon_common::types::{Metric, Snapshot, WireRecord};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

struct FixedSampler {
    metrics: Vec<Metric>,
}

impl Sampler for FixedSampler {
    fn name(&self) -> &str {
        "fixed"
    }

    fn sample(&mut self) -> anyhow::Result<Vec<Metric>> {
        Ok(self.metrics.clone())
    }
}

struct BrokenSampler;

impl Sampler for BrokenSampler {
    fn name(&self) -> &str {
        "broken"
    }

    fn sample(&mut self) -> anyhow::Result<Vec<Metric>> {
        anyhow::bail!("sensor unavailable")
    }
}

fn group(metrics: Vec<Metric>) -> SamplerGroup {
    let samplers: Vec<Box<dyn Sampler>> = vec![Box::new(FixedSampler { metrics }), Box::new(BrokenSampler)];
    SamplerGroup::new(samplers)
}

fn pusher(base_url: &str, key: Option<&str>, batch: bool) -> Pusher {
    Pusher::new(
        base_url,
        Signer::from_key(key),
        batch,
        Duration::from_secs(2),
        tracing::Span::none(),
    )
    .unwrap()
}

type Seen = Arc<Mutex<Vec<(&'static str, Value)>>>;

/// Starts a receiver on an ephemeral port that records every body and
/// answers with `status`.
async fn spawn_receiver(status: StatusCode) -> (String, Seen) {
    let seen: Seen = Arc::default();
    let one = seen.clone();
    let many = seen.clone();
    let app = Router::new()
        .route(
            "/update/",
            post(move |Json(body): Json<Value>| {
                let seen = one.clone();
                async move {
                    seen.lock().unwrap().push(("/update/", body));
                    status
                }
            }),
        )
        .route(
            "/updates/",
            post(move |Json(body): Json<Value>| {
                let seen = many.clone();
                async move {
                    seen.lock().unwrap().push(("/updates/", body));
                    status
                }
            }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), seen)
}

fn sample_snapshot() -> Snapshot {
    let mut snapshot = Snapshot::default();
    snapshot.gauges.insert("Alloc".to_string(), 1024.0);
    snapshot.counters.insert("PollCount".to_string(), 3);
    snapshot
}

#[test]
fn config_defaults() {
    let config = AgentConfig::parse("").unwrap();
    assert_eq!(config.server_address, "localhost:8080");
    assert_eq!(config.poll_interval(), Duration::from_secs(2));
    assert_eq!(config.report_interval(), Duration::from_secs(10));
    assert_eq!(config.rate_limit, 4);
    assert!(config.batch);
    assert!(config.key.is_none());
    assert_eq!(config.base_url(), "http://localhost:8080");
}

#[test]
fn config_overrides_and_validation() {
    let config = AgentConfig::parse(
        r#"
server_address = "https://metrics.example.com/"
poll_interval_secs = 0
key = "secret"
batch = false
"#,
    )
    .unwrap();
    assert_eq!(config.base_url(), "https://metrics.example.com");
    assert_eq!(config.poll_interval(), Duration::from_secs(1));
    assert_eq!(config.key.as_deref(), Some("secret"));
    assert!(!config.batch);

    assert!(AgentConfig::parse("rate_limit = 0").is_err());
}

#[tokio::test]
async fn scheduler_emits_both_jobs_and_stops_on_cancel() {
    let (tx, mut rx) = mpsc::channel(16);
    let shutdown = CancellationToken::new();
    let scheduler = Scheduler::new(
        Duration::from_millis(20),
        Duration::from_millis(50),
        tracing::Span::none(),
    );
    let handle = tokio::spawn(scheduler.run(tx, shutdown.clone()));

    let mut polls = 0;
    let mut pushes = 0;
    while polls < 2 || pushes < 1 {
        match tokio::time::timeout(Duration::from_secs(2), rx.recv()).await {
            Ok(Some(Job::Poll)) => polls += 1,
            Ok(Some(Job::Push)) => pushes += 1,
            other => panic!("scheduler stalled: {other:?}"),
        }
    }

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("scheduler did not stop")
        .unwrap();
}

#[tokio::test]
async fn scheduler_blocks_on_full_queue() {
    let (tx, mut rx) = mpsc::channel(1);
    let shutdown = CancellationToken::new();
    let scheduler = Scheduler::new(
        Duration::from_millis(10),
        Duration::from_millis(10),
        tracing::Span::none(),
    );
    let handle = tokio::spawn(scheduler.run(tx, shutdown.clone()));

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(rx.try_recv().is_ok());
    assert!(!handle.is_finished());

    // A blocked send must still observe cancellation.
    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("scheduler ignored cancel while blocked")
        .unwrap();
}

#[tokio::test]
async fn scheduler_stops_when_queue_closes() {
    let (tx, rx) = mpsc::channel(1);
    drop(rx);
    let scheduler = Scheduler::new(
        Duration::from_millis(10),
        Duration::from_millis(10),
        tracing::Span::none(),
    );
    tokio::time::timeout(Duration::from_secs(1), scheduler.run(tx, CancellationToken::new()))
        .await
        .expect("scheduler kept running without a receiver");
}

#[tokio::test]
async fn scheduler_tolerates_zero_periods() {
    let (tx, mut rx) = mpsc::channel(4);
    let shutdown = CancellationToken::new();
    let scheduler = Scheduler::new(Duration::ZERO, Duration::ZERO, tracing::Span::none());
    let handle = tokio::spawn(scheduler.run(tx, shutdown.clone()));

    let job = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await;
    assert!(matches!(job, Ok(Some(_))));

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("scheduler did not stop")
        .unwrap();
}

#[tokio::test]
async fn runner_polls_and_drains_on_close() {
    let collector = Arc::new(Collector::new());
    let runner = JobRunner::new(
        collector.clone(),
        group(vec![Metric::gauge("Alloc", 64.0)]),
        group(vec![Metric::gauge("TotalMemory", 4096.0)]),
        Arc::new(pusher("http://127.0.0.1:1", None, true)),
        2,
        tracing::Span::none(),
    );

    let (tx, rx) = mpsc::channel(4);
    tx.send(Job::Poll).await.unwrap();
    tx.send(Job::Poll).await.unwrap();
    drop(tx);
    runner.run(rx, CancellationToken::new()).await;

    let snapshot = collector.get();
    assert_eq!(snapshot.poll_count(), 2);
    assert_eq!(snapshot.gauges.get("Alloc"), Some(&64.0));
    assert_eq!(snapshot.gauges.get("TotalMemory"), Some(&4096.0));
}

#[tokio::test]
async fn runner_survives_failed_push() {
    let collector = Arc::new(Collector::new());
    collector.refresh(vec![Metric::gauge("Alloc", 1.0)]);
    let runner = JobRunner::new(
        collector.clone(),
        group(vec![]),
        group(vec![]),
        Arc::new(pusher("http://127.0.0.1:1", None, true)),
        1,
        tracing::Span::none(),
    );

    let (tx, rx) = mpsc::channel(4);
    tx.send(Job::Push).await.unwrap();
    tx.send(Job::Poll).await.unwrap();
    drop(tx);
    runner.run(rx, CancellationToken::new()).await;

    assert_eq!(collector.get().poll_count(), 2);
}

#[tokio::test]
async fn runner_stops_on_cancel() {
    let collector = Arc::new(Collector::new());
    let runner = JobRunner::new(
        collector,
        group(vec![]),
        group(vec![]),
        Arc::new(pusher("http://127.0.0.1:1", None, true)),
        1,
        tracing::Span::none(),
    );

    let (_tx, rx) = mpsc::channel::<Job>(1);
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(runner.run(rx, shutdown.clone()));
    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("runner did not stop")
        .unwrap();
}

#[test]
fn prepare_signs_every_record_with_key() {
    let pusher = pusher("http://127.0.0.1:1", Some("aaab"), true);
    let records = pusher.prepare(&sample_snapshot()).unwrap();
    assert_eq!(records.len(), 2);

    let signer = Signer::from_key(Some("aaab")).unwrap();
    for record in &records {
        assert!(record.hash.is_some());
        signer.verify_record(record).unwrap();
    }
}

#[test]
fn prepare_without_key_leaves_hash_unset() {
    let pusher = pusher("http://127.0.0.1:1", None, true);
    let records = pusher.prepare(&sample_snapshot()).unwrap();
    assert!(records.iter().all(|r| r.hash.is_none()));
}

#[tokio::test]
async fn batch_push_sends_one_signed_request() {
    let (url, seen) = spawn_receiver(StatusCode::OK).await;
    let pusher = pusher(&url, Some("aaab"), true);

    let sent = pusher.push(&sample_snapshot()).await.unwrap();
    assert_eq!(sent, 2);

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0, "/updates/");
    let records: Vec<WireRecord> = serde_json::from_value(seen[0].1.clone()).unwrap();
    let signer = Signer::from_key(Some("aaab")).unwrap();
    for record in &records {
        signer.verify_record(record).unwrap();
    }
}

#[tokio::test]
async fn single_push_sends_one_request_per_record() {
    let (url, seen) = spawn_receiver(StatusCode::OK).await;
    let pusher = pusher(&url, None, false);

    let sent = pusher.push(&sample_snapshot()).await.unwrap();
    assert_eq!(sent, 2);

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert!(seen.iter().all(|(path, _)| *path == "/update/"));
    assert_eq!(seen[0].1["id"], "Alloc");
    assert_eq!(seen[1].1["type"], "counter");
}

#[tokio::test]
async fn push_reports_rejection_and_transport_errors() {
    let (url, _seen) = spawn_receiver(StatusCode::BAD_REQUEST).await;
    let err = pusher(&url, None, true)
        .push(&sample_snapshot())
        .await
        .unwrap_err();
    assert!(matches!(err, PushError::Rejected { status: 400, .. }));

    let err = pusher("http://127.0.0.1:1", None, true)
        .push(&sample_snapshot())
        .await
        .unwrap_err();
    assert!(matches!(err, PushError::Transport { .. }));
}

#[tokio::test]
async fn empty_snapshot_sends_nothing() {
    let (url, seen) = spawn_receiver(StatusCode::OK).await;
    let sent = pusher(&url, None, true).push(&Snapshot::default()).await.unwrap();
    assert_eq!(sent, 0);
    assert!(seen.lock().unwrap().is_empty());
}

fn pushed_poll_count(body: &Value) -> Option<i64> {
    let records: Vec<WireRecord> = serde_json::from_value(body.clone()).unwrap();
    records
        .into_iter()
        .find(|r| r.id == "PollCount")
        .and_then(|r| r.delta)
}

#[tokio::test]
async fn pushes_carry_counter_increments_since_last_success() {
    let (url, seen) = spawn_receiver(StatusCode::OK).await;
    let collector = Collector::new();
    let reported = Reported::new();
    let ok = pusher(&url, None, true);
    let down = pusher("http://127.0.0.1:1", None, true);

    collector.refresh(vec![Metric::gauge("Alloc", 1.0)]);
    collector.refresh(vec![]);
    reported.push(&collector, &ok).await.unwrap();

    collector.refresh(vec![]);
    assert!(reported.push(&collector, &down).await.is_err());
    collector.refresh(vec![]);
    reported.push(&collector, &ok).await.unwrap();

    // the local total keeps growing
    assert_eq!(collector.get().poll_count(), 4);

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert_eq!(pushed_poll_count(&seen[0].1), Some(2));
    // the failed push reported nothing, so its poll is still included
    assert_eq!(pushed_poll_count(&seen[1].1), Some(2));
    assert!(seen[1].1.as_array().unwrap().iter().any(|r| r["id"] == "Alloc"));
}
