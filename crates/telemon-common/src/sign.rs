//! Integrity codes binding a metric's id, kind and value to a shared key.
//!
//! The code is `hex(sha256(canonical || key))` where the canonical string is
//! `"{id}:gauge:{value:.6}"` for gauges and `"{id}:counter:{delta}"` for
//! counters. Agent and server must agree on whether a key is configured:
//! without one, records are neither signed nor verified.

use crate::error::MetricError;
use crate::types::{MetricValue, WireRecord};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SignError {
    #[error("Integrity: record '{0}' carries no hash")]
    MissingHash(String),

    #[error("Integrity: hash of '{0}' is not valid hex")]
    MalformedHash(String),

    #[error("Integrity: hash mismatch for '{0}'")]
    Mismatch(String),

    #[error(transparent)]
    Metric(#[from] MetricError),
}

/// Canonical string signed for a metric.
pub fn canonical(id: &str, value: MetricValue) -> String {
    match value {
        MetricValue::Gauge(v) => format!("{id}:gauge:{v:.6}"),
        MetricValue::Counter(d) => format!("{id}:counter:{d}"),
    }
}

/// Computes the raw digest for `(id, value)` under `key`.
fn digest(id: &str, value: MetricValue, key: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(canonical(id, value).as_bytes());
    hasher.update(key.as_bytes());
    hasher.finalize().to_vec()
}

/// Hex-encoded integrity code for `(id, value)` under `key`.
///
/// # Examples
///
/// ```
/// use telemon_common::sign::{sign, verify};
/// use telemon_common::types::MetricValue;
///
/// let code = sign("Alloc", MetricValue::Gauge(4.0), "aaab");
/// assert_eq!(code.len(), 64);
/// assert!(verify(&code, "Alloc", MetricValue::Gauge(4.0), "aaab"));
/// assert!(!verify(&code, "Alloc", MetricValue::Gauge(4.5), "aaab"));
/// ```
pub fn sign(id: &str, value: MetricValue, key: &str) -> String {
    hex::encode(digest(id, value, key))
}

/// Checks a hex-encoded code against one recomputed locally.
pub fn verify(code: &str, id: &str, value: MetricValue, key: &str) -> bool {
    match hex::decode(code) {
        Ok(received) => constant_time_eq(&received, &digest(id, value, key)),
        Err(_) => false,
    }
}

/// Compares every byte regardless of where the first mismatch sits.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Signs and verifies wire records with a configured shared key.
#[derive(Clone)]
pub struct Signer {
    key: String,
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer").field("key", &"<redacted>").finish()
    }
}

impl Signer {
    /// Returns `None` for a missing or empty key, which disables signing.
    pub fn from_key(key: Option<&str>) -> Option<Self> {
        key.filter(|k| !k.is_empty()).map(|k| Self { key: k.to_string() })
    }

    pub fn hash(&self, record: &WireRecord) -> Result<String, MetricError> {
        let metric = record.metric()?;
        Ok(sign(&metric.name, metric.value, &self.key))
    }

    /// Sets `record.hash` from its current payload.
    pub fn sign_record(&self, record: &mut WireRecord) -> Result<(), MetricError> {
        record.hash = Some(self.hash(record)?);
        Ok(())
    }

    pub fn verify_record(&self, record: &WireRecord) -> Result<(), SignError> {
        let code = record
            .hash
            .as_deref()
            .ok_or_else(|| SignError::MissingHash(record.id.clone()))?;
        let metric = record.metric()?;
        let received =
            hex::decode(code).map_err(|_| SignError::MalformedHash(record.id.clone()))?;
        if constant_time_eq(&received, &digest(&metric.name, metric.value, &self.key)) {
            Ok(())
        } else {
            Err(SignError::Mismatch(record.id.clone()))
        }
    }
}
