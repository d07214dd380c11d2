use axum::{
    body::Body,
    extract::Request,
    http::{header, HeaderValue},
    middleware::Next,
    response::Response,
};
use rand::Rng;
use std::fmt::Write;
use std::time::Instant;
use tracing::Instrument;

pub const TRACE_HEADER: &str = "X-Trace-Id";

/// 16 hex characters from 8 random bytes.
fn generate_trace_id() -> String {
    let bytes: [u8; 8] = rand::thread_rng().gen();
    let mut s = String::with_capacity(16);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

const MAX_BODY_LOG_CHARS: usize = 200;

/// Metric bodies are small; anything larger is not buffered for logging.
const MAX_BUFFERED_BODY: usize = 1024 * 1024;

/// Truncates to at most `max` bytes on a char boundary.
fn truncate_body(bytes: &[u8], max: usize) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) if s.len() > max => {
            let mut end = max;
            while end > 0 && !s.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}...", &s[..end])
        }
        Ok(s) => s.trim_end().to_string(),
        Err(_) => "<non-utf8 body>".to_string(),
    }
}

fn format_elapsed(elapsed_us: u128) -> String {
    if elapsed_us < 1000 {
        format!("{elapsed_us}µs")
    } else if elapsed_us < 1_000_000 {
        format!("{}ms", elapsed_us / 1000)
    } else {
        format!("{:.1}s", elapsed_us as f64 / 1_000_000.0)
    }
}

fn is_loggable(content_type: Option<&HeaderValue>) -> bool {
    content_type
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.starts_with("application/json") || ct.starts_with("text/plain"))
        .unwrap_or(false)
}

/// Logs each request and its response inside a `request` span and echoes
/// the generated trace id in `X-Trace-Id`.
///
/// Bodies are only captured at debug level; the html status page is never
/// captured.
pub async fn request_logging(req: Request, next: Next) -> Response {
    let trace_id = generate_trace_id();

    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let span = tracing::info_span!("request", trace_id = %trace_id, method = %method, path = %path);
    tracing::info!(parent: &span, "--> request");

    let capture = tracing::enabled!(tracing::Level::DEBUG);
    let req = if capture && method == axum::http::Method::POST {
        let (parts, body) = req.into_parts();
        let bytes = axum::body::to_bytes(body, MAX_BUFFERED_BODY)
            .await
            .unwrap_or_default();
        if !bytes.is_empty() {
            tracing::debug!(parent: &span, body = %truncate_body(&bytes, MAX_BODY_LOG_CHARS), "--> body");
        }
        Request::from_parts(parts, Body::from(bytes))
    } else {
        req
    };

    let start = Instant::now();
    let response = next.run(req).instrument(span.clone()).await;
    let elapsed = format_elapsed(start.elapsed().as_micros());
    let status = response.status();

    let mut response = if capture && is_loggable(response.headers().get(header::CONTENT_TYPE)) {
        let (parts, body) = response.into_parts();
        let bytes = axum::body::to_bytes(body, MAX_BUFFERED_BODY)
            .await
            .unwrap_or_default();
        tracing::debug!(parent: &span, body = %truncate_body(&bytes, MAX_BODY_LOG_CHARS), "<-- body");
        Response::from_parts(parts, Body::from(bytes))
    } else {
        response
    };

    let status_code = status.as_u16();
    if status.is_server_error() {
        tracing::error!(parent: &span, status = status_code, elapsed = %elapsed, "<-- response");
    } else if status.is_client_error() {
        tracing::warn!(parent: &span, status = status_code, elapsed = %elapsed, "<-- response");
    } else {
        tracing::info!(parent: &span, status = status_code, elapsed = %elapsed, "<-- response");
    }

    if let Ok(val) = HeaderValue::from_str(&trace_id) {
        response.headers_mut().insert(TRACE_HEADER, val);
    }
    response
}
