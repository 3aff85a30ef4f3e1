//! Local history row for a focus session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::Session;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum RecordStatus {
    Running,
    Completed,
    /// The process went away before the session was stopped.
    Interrupted,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Running => "Running",
            RecordStatus::Completed => "Completed",
            RecordStatus::Interrupted => "Interrupted",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: String,
    pub user_id: String,
    pub remote_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub status: RecordStatus,
    pub duration_seconds: u64,
    pub focused_seconds: u64,
    pub sample_count: u64,
    pub average_score: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn started(session: &Session, user_id: &str) -> Self {
        Self {
            id: session.id.clone(),
            user_id: user_id.to_string(),
            remote_id: session.remote_id.clone(),
            started_at: session.started_at,
            stopped_at: None,
            status: RecordStatus::Running,
            duration_seconds: session.duration_seconds,
            focused_seconds: 0,
            sample_count: 0,
            average_score: None,
            created_at: session.started_at,
            updated_at: session.started_at,
        }
    }
}
