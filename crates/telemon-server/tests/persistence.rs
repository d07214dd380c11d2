mod common;

use axum::http::StatusCode;
use common::{build_test_context_with, get_value, request, test_config};
use telemon_common::types::{Snapshot, WireRecord};
use telemon_server::config::ServerConfig;
use telemon_server::persist;
use telemon_server::state::AppState;
use telemon_storage::engine::SqliteStorage;
use telemon_storage::{snapshot_file, MetricsStorage};

fn file_snapshot() -> Snapshot {
    let mut snapshot = Snapshot::default();
    snapshot.gauges.insert("FromFile".to_string(), 1.0);
    snapshot
}

#[test]
fn config_defaults_and_validation() {
    let config = ServerConfig::parse("").unwrap();
    assert_eq!(config.address, "0.0.0.0:8080");
    assert_eq!(config.store_interval_secs, 300);
    assert_eq!(config.file_storage_path, "/tmp/metrics-db.json");
    assert!(config.restore);
    assert!(config.database_path().is_none());
    assert_eq!(config.batch_capacity, 64);
    assert!(config.key.is_none());

    let config = ServerConfig::parse("file_storage_path = \"\"\nstore_interval_secs = 0").unwrap();
    assert!(config.snapshot_path().is_none());
    assert!(config.store_interval().is_none());

    assert!(ServerConfig::parse("batch_capacity = 0").is_err());
}

#[test]
fn restore_prefers_durable_store() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());

    let db = SqliteStorage::open(&dir.path().join("metrics.db")).unwrap();
    db.write_batch(&[WireRecord::gauge("FromDb", 2.0), WireRecord::counter("hits", 5)])
        .unwrap();
    drop(db);
    snapshot_file::save(&dir.path().join("metrics.json"), &file_snapshot()).unwrap();

    let state = AppState::build(config).unwrap();
    let snapshot = state.receiver.store().snapshot();
    assert_eq!(snapshot.gauges.get("FromDb"), Some(&2.0));
    assert_eq!(snapshot.counters.get("hits"), Some(&5));
    assert!(!snapshot.gauges.contains_key("FromFile"));
}

#[test]
fn restore_falls_back_to_file_when_store_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    snapshot_file::save(&dir.path().join("metrics.json"), &file_snapshot()).unwrap();

    let state = AppState::build(test_config(dir.path())).unwrap();
    assert_eq!(
        state.receiver.store().snapshot().gauges.get("FromFile"),
        Some(&1.0)
    );
    assert_eq!(state.receiver.store().describe(), "file");
}

#[test]
fn corrupt_snapshot_file_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("metrics.json"), "{broken").unwrap();

    let state = AppState::build(test_config(dir.path())).unwrap();
    assert!(state.receiver.store().snapshot().is_empty());
}

#[test]
fn restore_disabled_ignores_saved_state() {
    let dir = tempfile::tempdir().unwrap();
    snapshot_file::save(&dir.path().join("metrics.json"), &file_snapshot()).unwrap();

    let mut config = test_config(dir.path());
    config.restore = false;
    let state = AppState::build(config).unwrap();
    assert!(state.receiver.store().snapshot().is_empty());
}

#[test]
fn no_file_and_no_database_keeps_metrics_in_memory() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.file_storage_path = String::new();
    config.database_path = None;

    let state = AppState::build(config).unwrap();
    assert_eq!(state.receiver.store().describe(), "memory");
    assert!(state.file.is_none());
    assert!(state.storage.is_none());
    assert!(state.batch_writer.is_none());
}

#[tokio::test]
async fn interval_mode_saves_only_when_asked() {
    let ctx = build_test_context_with(|c| c.store_interval_secs = 300).unwrap();
    let path = ctx.temp_dir.path().join("metrics.json");

    request(&ctx.app, "POST", "/update/gauge/Alloc/3", None).await;
    assert!(snapshot_file::load(&path).unwrap().is_none());

    persist::finish(&ctx.state).await;
    let saved = snapshot_file::load(&path).unwrap().unwrap();
    assert_eq!(saved.gauges.get("Alloc"), Some(&3.0));
}

#[tokio::test]
async fn restart_restores_last_values() {
    let dir = tempfile::tempdir().unwrap();
    {
        let state = AppState::build(test_config(dir.path())).unwrap();
        let app = telemon_server::app::build_http_app(state.clone());
        request(&app, "POST", "/update/counter/hits/4", None).await;
        request(&app, "POST", "/update/gauge/Alloc/1.25", None).await;
        persist::finish(&state).await;
    }

    let state = AppState::build(test_config(dir.path())).unwrap();
    let app = telemon_server::app::build_http_app(state);
    let (status, body) = get_value(&app, "counter", "hits").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "4");
    assert_eq!(get_value(&app, "gauge", "Alloc").await.1, "1.25");
}
