use crate::receiver::ReceiveError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use telemon_common::types::MetricKind;

/// Handler failures and the status each one maps to.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// A path-encoded value that does not parse for its kind.
    #[error("Wrong {} value", title(.0))]
    WrongValue(MetricKind),

    /// A metric type this server does not know.
    #[error("Unsupported metric type '{0}'")]
    NotImplemented(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::WrongValue(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(msg) = &self {
            tracing::error!(error = %msg, "Request failed");
        }
        (self.status(), format!("{self}\n")).into_response()
    }
}

impl From<ReceiveError> for ApiError {
    fn from(e: ReceiveError) -> Self {
        match e {
            ReceiveError::Metric(_) | ReceiveError::Integrity { .. } => {
                ApiError::BadRequest(e.to_string())
            }
            ReceiveError::NotFound { .. } => ApiError::NotFound(e.to_string()),
            ReceiveError::Task(_) => ApiError::Internal(e.to_string()),
        }
    }
}

fn title(kind: &MetricKind) -> &'static str {
    match kind {
        MetricKind::Gauge => "Gauge",
        MetricKind::Counter => "Counter",
    }
}
