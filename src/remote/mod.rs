mod best_effort;
mod http;
mod uploader;

pub use best_effort::{send_best_effort, BestEffort};
pub use http::{HttpCollector, MetricPoint, SampleUpload};
pub use uploader::{SampleQueue, SampleUploader};

use anyhow::Result;
use async_trait::async_trait;

use crate::models::MetricSample;
use crate::sensing::RawMetrics;

/// The collector side of a session: create, push samples, read them back.
#[async_trait]
pub trait RemoteSync: Send + Sync {
    /// Returns the collector's identifier for the new session.
    async fn create_session(&self, duration_minutes: u32) -> Result<String>;

    async fn submit_sample(&self, session_id: &str, sample: &MetricSample) -> Result<()>;

    /// Samples in the order the collector stored them.
    async fn fetch_samples(&self, session_id: &str) -> Result<Vec<MetricSample>>;
}

/// Turns one encoded frame into focus metrics.
#[async_trait]
pub trait FrameScorer: Send + Sync {
    async fn analyze(&self, jpeg: Vec<u8>) -> Result<RawMetrics>;
}

/// Who the calls are made for. The token is attached as a bearer credential when present.
#[derive(Debug, Clone, Default)]
pub struct UserContext {
    pub user_id: String,
    pub token: Option<String>,
}

impl UserContext {
    pub fn new(user_id: impl Into<String>, token: Option<String>) -> Self {
        Self {
            user_id: user_id.into(),
            token,
        }
    }
}
