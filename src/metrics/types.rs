use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Timings for one sampler cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleMetrics {
    pub timestamp: DateTime<Utc>,
    pub grab_ms: u64,
    pub encode_ms: Option<u64>,
    pub payload_bytes: usize,
    pub analyze_ms: Option<u64>,
    pub total_ms: u64,
    pub outcome: String,
    pub cpu_percent: f32,
    pub memory_mb: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemMetrics {
    pub cpu_percent: f32,
    pub memory_mb: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub system: SystemMetrics,
    pub recent_cycles: Vec<CycleMetrics>,
    pub cycle_count: u64,
    pub scored_count: u64,
    pub abandoned_count: u64,
}

impl Default for MetricsSnapshot {
    fn default() -> Self {
        Self {
            system: SystemMetrics {
                cpu_percent: 0.0,
                memory_mb: 0.0,
            },
            recent_cycles: Vec::new(),
            cycle_count: 0,
            scored_count: 0,
            abandoned_count: 0,
        }
    }
}
