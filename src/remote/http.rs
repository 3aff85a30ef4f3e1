use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use log::debug;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::MetricSample;
use crate::sensing::RawMetrics;

use super::{FrameScorer, RemoteSync, UserContext};

/// JSON client for the collector and the frame scorer, which share a base URL.
#[derive(Clone)]
pub struct HttpCollector {
    client: Client,
    base_url: String,
    token: Option<String>,
}

#[derive(Serialize)]
struct CreateSessionBody {
    duration: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionResponse {
    session_id: Option<Value>,
}

/// Body of `POST /sessions/{id}/metrics`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SampleUpload {
    pub ts: i64,
    pub score: u8,
    pub metrics: Value,
}

impl From<&MetricSample> for SampleUpload {
    fn from(sample: &MetricSample) -> Self {
        Self {
            ts: sample.timestamp.timestamp_millis(),
            score: sample.score,
            metrics: sample.raw_metrics.clone(),
        }
    }
}

/// One entry of `GET /sessions/{id}/metrics`.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricPoint {
    pub ts: i64,
    pub score: f64,
    #[serde(default)]
    pub metrics: Value,
}

impl MetricPoint {
    fn into_sample(self) -> Option<MetricSample> {
        if !self.score.is_finite() {
            return None;
        }
        let timestamp = Utc.timestamp_millis_opt(self.ts).single()?;
        let score = self.score.clamp(0.0, 100.0).round() as u8;
        Some(MetricSample::new(timestamp, score, self.metrics))
    }
}

#[derive(Deserialize)]
struct MetricsEnvelope {
    #[serde(default)]
    metrics: Vec<Value>,
}

#[derive(Deserialize)]
struct AnalyzeResponse {
    metrics: Option<RawMetrics>,
}

impl HttpCollector {
    pub fn new(base_url: impl Into<String>, user: &UserContext) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("focusfy/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: user.token.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.token.as_deref() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl RemoteSync for HttpCollector {
    async fn create_session(&self, duration_minutes: u32) -> Result<String> {
        let response = self
            .authorize(self.client.post(self.url("/sessions")))
            .json(&CreateSessionBody {
                duration: duration_minutes,
            })
            .send()
            .await
            .context("create-session request failed")?
            .error_for_status()
            .context("collector rejected create-session")?;

        let body: CreateSessionResponse = response
            .json()
            .await
            .context("create-session response was not JSON")?;

        match body.session_id {
            Some(Value::String(id)) if !id.is_empty() => Ok(id),
            Some(Value::Number(id)) => Ok(id.to_string()),
            _ => Err(anyhow!("create-session response missing sessionId")),
        }
    }

    async fn submit_sample(&self, session_id: &str, sample: &MetricSample) -> Result<()> {
        self.authorize(
            self.client
                .post(self.url(&format!("/sessions/{session_id}/metrics"))),
        )
        .json(&SampleUpload::from(sample))
        .send()
        .await
        .context("submit-sample request failed")?
        .error_for_status()
        .context("collector rejected sample")?;
        Ok(())
    }

    async fn fetch_samples(&self, session_id: &str) -> Result<Vec<MetricSample>> {
        let envelope: MetricsEnvelope = self
            .authorize(
                self.client
                    .get(self.url(&format!("/sessions/{session_id}/metrics"))),
            )
            .send()
            .await
            .context("fetch-samples request failed")?
            .error_for_status()
            .context("collector rejected fetch-samples")?
            .json()
            .await
            .context("fetch-samples response was not JSON")?;

        let total = envelope.metrics.len();
        let samples: Vec<MetricSample> = envelope
            .metrics
            .into_iter()
            .filter_map(|entry| serde_json::from_value::<MetricPoint>(entry).ok())
            .filter_map(MetricPoint::into_sample)
            .collect();

        if samples.len() != total {
            debug!(
                "skipped {} malformed samples for session {session_id}",
                total - samples.len()
            );
        }

        Ok(samples)
    }
}

#[async_trait]
impl FrameScorer for HttpCollector {
    async fn analyze(&self, jpeg: Vec<u8>) -> Result<RawMetrics> {
        let part = Part::bytes(jpeg)
            .file_name("frame.jpg")
            .mime_str("image/jpeg")
            .context("invalid frame mime type")?;
        let form = Form::new().part("file", part);

        let body: AnalyzeResponse = self
            .authorize(self.client.post(self.url("/analyze")))
            .multipart(form)
            .send()
            .await
            .context("analyze request failed")?
            .error_for_status()
            .context("scorer rejected frame")?
            .json()
            .await
            .context("analyze response was not JSON")?;

        body.metrics
            .ok_or_else(|| anyhow!("analyze response missing metrics"))
    }
}
