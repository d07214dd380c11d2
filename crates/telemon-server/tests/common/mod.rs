#![allow(dead_code)]

use anyhow::Result;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use serde_json::Value;
use std::path::Path;
use telemon_common::sign::Signer;
use telemon_common::types::WireRecord;
use telemon_server::app;
use telemon_server::config::ServerConfig;
use telemon_server::state::AppState;
use tempfile::TempDir;
use tower::util::ServiceExt;

pub struct TestContext {
    pub temp_dir: TempDir,
    pub state: AppState,
    pub app: axum::Router,
}

/// Snapshot file and SQLite store inside `dir`, synchronous file saves and a
/// small batch capacity.
pub fn test_config(dir: &Path) -> ServerConfig {
    ServerConfig {
        address: "127.0.0.1:0".to_string(),
        store_interval_secs: 0,
        file_storage_path: dir.join("metrics.json").display().to_string(),
        restore: true,
        database_path: Some(dir.join("metrics.db").display().to_string()),
        batch_capacity: 2,
        key: None,
    }
}

pub fn build_test_context() -> Result<TestContext> {
    build_test_context_with(|_| {})
}

pub fn build_test_context_with(customize: impl FnOnce(&mut ServerConfig)) -> Result<TestContext> {
    let temp_dir = tempfile::tempdir()?;
    let mut config = test_config(temp_dir.path());
    customize(&mut config);
    let state = AppState::build(config)?;
    let app = app::build_http_app(state.clone());
    Ok(TestContext {
        temp_dir,
        state,
        app,
    })
}

/// Sends a request and returns the status, the body as text and the
/// `X-Trace-Id` header.
pub async fn request(
    app: &axum::Router,
    method: &str,
    uri: &str,
    body: Option<String>,
) -> (StatusCode, String, Option<String>) {
    let mut builder = Request::builder().method(method).uri(uri);
    let req_body = match body {
        Some(body) => {
            builder = builder.header("Content-Type", "application/json");
            Body::from(body)
        }
        None => Body::empty(),
    };
    let req = builder.body(req_body).expect("request should build");

    let resp = app
        .clone()
        .oneshot(req)
        .await
        .expect("request should be handled");

    let status = resp.status();
    let trace_id = resp
        .headers()
        .get("x-trace-id")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string());
    let bytes = to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("body should read");
    (status, String::from_utf8_lossy(&bytes).to_string(), trace_id)
}

pub async fn request_json(
    app: &axum::Router,
    method: &str,
    uri: &str,
    body: Value,
) -> (StatusCode, Value) {
    let (status, text, _) = request(app, method, uri, Some(body.to_string())).await;
    let json = if text.is_empty() {
        Value::Null
    } else {
        serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text))
    };
    (status, json)
}

pub async fn get_value(app: &axum::Router, kind: &str, name: &str) -> (StatusCode, String) {
    let (status, body, _) = request(app, "GET", &format!("/value/{kind}/{name}"), None).await;
    (status, body)
}

pub fn signed(mut record: WireRecord, key: &str) -> WireRecord {
    Signer::from_key(Some(key))
        .expect("key should be non-empty")
        .sign_record(&mut record)
        .expect("record should sign");
    record
}

pub fn to_json<T: serde::Serialize>(v: &T) -> Value {
    serde_json::to_value(v).expect("value should serialize")
}
