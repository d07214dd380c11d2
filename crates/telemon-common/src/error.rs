use crate::types::MetricKind;

/// Errors raised while interpreting a metric or wire record.
///
/// # Examples
///
/// ```rust
/// use telemon_common::error::MetricError;
///
/// let err = MetricError::UnsupportedKind("histogram".to_string());
/// assert!(err.to_string().contains("histogram"));
/// ```
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MetricError {
    /// The `type` field names neither a gauge nor a counter.
    #[error("Metric: unsupported metric type '{0}'")]
    UnsupportedKind(String),

    /// The metric id is empty.
    #[error("Metric: metric id is empty")]
    EmptyId,

    /// A gauge without `value` or a counter without `delta`.
    #[error("Metric: {kind} '{id}' carries no value")]
    MissingValue { kind: MetricKind, id: String },

    /// A path-encoded value that does not parse for its kind.
    #[error("Metric: invalid {kind} value '{raw}'")]
    InvalidValue { kind: MetricKind, raw: String },
}

pub type Result<T> = std::result::Result<T, MetricError>;
