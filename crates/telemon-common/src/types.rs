use crate::error::{MetricError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Reserved counter incremented once per snapshot refresh.
pub const POLL_COUNT: &str = "PollCount";

/// Metric kind. Gauges overwrite, counters accumulate.
///
/// # Examples
///
/// ```
/// use telemon_common::types::MetricKind;
///
/// let kind: MetricKind = "counter".parse().unwrap();
/// assert_eq!(kind, MetricKind::Counter);
/// assert_eq!(kind.to_string(), "counter");
/// assert!("histogram".parse::<MetricKind>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Gauge,
    Counter,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MetricKind {
    type Err = MetricError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "gauge" => Ok(MetricKind::Gauge),
            "counter" => Ok(MetricKind::Counter),
            _ => Err(MetricError::UnsupportedKind(s.to_string())),
        }
    }
}

/// A single typed metric value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Gauge(f64),
    Counter(i64),
}

impl MetricValue {
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricValue::Gauge(_) => MetricKind::Gauge,
            MetricValue::Counter(_) => MetricKind::Counter,
        }
    }

    /// Parses a path-encoded value for the given kind.
    pub fn parse(kind: MetricKind, raw: &str) -> Result<Self> {
        let invalid = || MetricError::InvalidValue {
            kind,
            raw: raw.to_string(),
        };
        match kind {
            MetricKind::Gauge => raw
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(MetricValue::Gauge)
                .ok_or_else(invalid),
            MetricKind::Counter => raw
                .parse::<i64>()
                .map(MetricValue::Counter)
                .map_err(|_| invalid()),
        }
    }
}

/// Renders gauges in their shortest round-trip form (`4.0` prints as `4`).
impl std::fmt::Display for MetricValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricValue::Gauge(v) => write!(f, "{v}"),
            MetricValue::Counter(d) => write!(f, "{d}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    pub name: String,
    pub value: MetricValue,
}

impl Metric {
    pub fn gauge(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value: MetricValue::Gauge(value),
        }
    }

    pub fn counter(name: impl Into<String>, delta: i64) -> Self {
        Self {
            name: name.into(),
            value: MetricValue::Counter(delta),
        }
    }

    pub fn kind(&self) -> MetricKind {
        self.value.kind()
    }

    /// Builds an unsigned wire record holding a copy of this value.
    pub fn to_wire(&self) -> WireRecord {
        match self.value {
            MetricValue::Gauge(v) => WireRecord::gauge(&self.name, v),
            MetricValue::Counter(d) => WireRecord::counter(&self.name, d),
        }
    }
}

/// Over-the-wire form of one metric update or query.
///
/// `type` is kept as the raw string so an unknown kind survives decoding and
/// is reported by the merge path rather than the JSON layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub mtype: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

impl WireRecord {
    pub fn gauge(id: impl Into<String>, value: f64) -> Self {
        Self {
            id: id.into(),
            mtype: MetricKind::Gauge.to_string(),
            delta: None,
            value: Some(value),
            hash: None,
        }
    }

    pub fn counter(id: impl Into<String>, delta: i64) -> Self {
        Self {
            id: id.into(),
            mtype: MetricKind::Counter.to_string(),
            delta: Some(delta),
            value: None,
            hash: None,
        }
    }

    /// A value query: identity only, no payload.
    pub fn query(id: impl Into<String>, kind: MetricKind) -> Self {
        Self {
            id: id.into(),
            mtype: kind.to_string(),
            delta: None,
            value: None,
            hash: None,
        }
    }

    pub fn kind(&self) -> Result<MetricKind> {
        self.mtype.parse()
    }

    /// Interprets the record as a metric, checking that the payload field
    /// matching its kind is populated.
    pub fn metric(&self) -> Result<Metric> {
        if self.id.is_empty() {
            return Err(MetricError::EmptyId);
        }
        let kind = self.kind()?;
        let value = match kind {
            MetricKind::Gauge => self.value.filter(|v| v.is_finite()).map(MetricValue::Gauge),
            MetricKind::Counter => self.delta.map(MetricValue::Counter),
        };
        value
            .map(|value| Metric {
                name: self.id.clone(),
                value,
            })
            .ok_or_else(|| MetricError::MissingValue {
                kind,
                id: self.id.clone(),
            })
    }
}

impl From<&Metric> for WireRecord {
    fn from(metric: &Metric) -> Self {
        metric.to_wire()
    }
}

/// Point-in-time view of every gauge and counter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub gauges: HashMap<String, f64>,
    #[serde(default)]
    pub counters: HashMap<String, i64>,
}

impl Snapshot {
    pub fn get(&self, kind: MetricKind, name: &str) -> Option<MetricValue> {
        match kind {
            MetricKind::Gauge => self.gauges.get(name).copied().map(MetricValue::Gauge),
            MetricKind::Counter => self.counters.get(name).copied().map(MetricValue::Counter),
        }
    }

    /// Looks a name up in both mappings, gauges first.
    pub fn find(&self, name: &str) -> Option<MetricValue> {
        self.get(MetricKind::Gauge, name)
            .or_else(|| self.get(MetricKind::Counter, name))
    }

    pub fn poll_count(&self) -> i64 {
        self.counters.get(POLL_COUNT).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.gauges.len() + self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gauges.is_empty() && self.counters.is_empty()
    }

    /// All metrics ordered by kind, then name.
    pub fn metrics(&self) -> Vec<Metric> {
        let mut gauges: Vec<Metric> = self
            .gauges
            .iter()
            .map(|(name, v)| Metric::gauge(name.clone(), *v))
            .collect();
        gauges.sort_by(|a, b| a.name.cmp(&b.name));

        let mut counters: Vec<Metric> = self
            .counters
            .iter()
            .map(|(name, d)| Metric::counter(name.clone(), *d))
            .collect();
        counters.sort_by(|a, b| a.name.cmp(&b.name));

        gauges.extend(counters);
        gauges
    }

    pub fn records(&self) -> Vec<WireRecord> {
        self.metrics().iter().map(Metric::to_wire).collect()
    }
}
