use crate::error::ApiError;
use crate::receiver::ReceiveError;
use crate::state::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt::Write;
use std::time::Duration;
use telemon_common::types::{Metric, MetricKind, MetricValue, WireRecord};

const PING_TIMEOUT: Duration = Duration::from_secs(1);

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(index))
        .route("/ping", get(ping))
        .route("/update/", post(update_json))
        .route("/updates/", post(update_batch))
        .route("/update/:kind/:name/:value", post(update_path))
        .route("/value/", post(value_json))
        .route("/value/:kind/:name", get(value_path))
}

fn status_ok() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

fn decode<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|e| ApiError::BadRequest(e.body_text()))
}

async fn update_path(
    State(state): State<AppState>,
    Path((kind, name, raw)): Path<(String, String, String)>,
) -> Result<Json<Value>, ApiError> {
    let kind: MetricKind = kind
        .parse()
        .map_err(|_| ApiError::NotImplemented(kind.clone()))?;
    let value = MetricValue::parse(kind, &raw).map_err(|_| ApiError::WrongValue(kind))?;
    state.receiver.accept_metric(Metric { name, value }).await?;
    Ok(status_ok())
}

async fn update_json(
    State(state): State<AppState>,
    payload: Result<Json<WireRecord>, JsonRejection>,
) -> Result<Json<WireRecord>, ApiError> {
    let record = decode(payload)?;
    let merged = state.receiver.accept(record).await?;
    Ok(Json(merged))
}

async fn update_batch(
    State(state): State<AppState>,
    payload: Result<Json<Vec<WireRecord>>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let records = decode(payload)?;
    let accepted = state.receiver.accept_batch(records).await?;
    tracing::debug!(accepted, "Batch accepted");
    Ok(status_ok())
}

async fn value_path(
    State(state): State<AppState>,
    Path((kind, name)): Path<(String, String)>,
) -> Result<String, ApiError> {
    let kind: MetricKind = kind
        .parse()
        .map_err(|_| ApiError::NotFound(format!("Unknown metric type '{kind}'")))?;
    state
        .receiver
        .store()
        .value(kind, &name)
        .map(|value| value.to_string())
        .ok_or_else(|| ApiError::NotFound(format!("{kind} '{name}' not found")))
}

/// Body of a `POST /value/` miss: the query echoed back without a payload.
#[derive(Serialize)]
struct ValueMiss {
    id: String,
    #[serde(rename = "type")]
    mtype: String,
    error: String,
}

async fn value_json(
    State(state): State<AppState>,
    payload: Result<Json<WireRecord>, JsonRejection>,
) -> Result<Response, ApiError> {
    let query = decode(payload)?;
    match state.receiver.lookup(&query) {
        Ok(record) => Ok(Json(record).into_response()),
        Err(e @ (ReceiveError::NotFound { .. } | ReceiveError::Metric(_))) => {
            let miss = ValueMiss {
                id: query.id,
                mtype: query.mtype,
                error: e.to_string(),
            };
            Ok((StatusCode::NOT_FOUND, Json(miss)).into_response())
        }
        Err(e) => Err(e.into()),
    }
}

async fn ping(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let Some(storage) = state.storage.clone() else {
        return Err(ApiError::Internal("durable store not configured".to_string()));
    };
    let check = tokio::task::spawn_blocking(move || storage.ping());
    match tokio::time::timeout(PING_TIMEOUT, check).await {
        Ok(Ok(Ok(()))) => Ok(status_ok()),
        Ok(Ok(Err(e))) => Err(ApiError::Internal(format!("durable store unreachable: {e}"))),
        Ok(Err(e)) => Err(ApiError::Internal(format!("ping task failed: {e}"))),
        Err(_) => Err(ApiError::Internal("durable store ping timed out".to_string())),
    }
}

async fn index(State(state): State<AppState>) -> Html<String> {
    let snapshot = state.receiver.store().snapshot();
    let mut page = String::from(
        "<!DOCTYPE html>\n<html><head><title>telemon</title></head><body>\n<h1>Metrics</h1>\n",
    );
    let _ = writeln!(page, "<p>{} metrics</p>", snapshot.len());
    page.push_str("<table>\n<tr><th>Name</th><th>Type</th><th>Value</th></tr>\n");
    for metric in snapshot.metrics() {
        let _ = writeln!(
            page,
            "<tr><td>{}</td><td>{}</td><td>{}</td></tr>",
            escape_html(&metric.name),
            metric.kind(),
            metric.value
        );
    }
    page.push_str("</table>\n</body></html>\n");
    Html(page)
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
