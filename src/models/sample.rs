use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A scored observation taken from one captured frame.
///
/// `raw_metrics` is whatever the scorer returned, kept opaque so the collector can
/// store fields this crate does not interpret.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetricSample {
    pub timestamp: DateTime<Utc>,
    pub score: u8,
    #[serde(default)]
    pub raw_metrics: serde_json::Value,
}

impl MetricSample {
    pub fn new(timestamp: DateTime<Utc>, score: u8, raw_metrics: serde_json::Value) -> Self {
        Self {
            timestamp,
            score: score.min(100),
            raw_metrics,
        }
    }
}
