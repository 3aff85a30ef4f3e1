use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::summary::SessionSummary;
use crate::timer::{SessionReport, SessionSnapshot};

/// Everything the controller tells a UI layer. Sent over a broadcast channel;
/// a lagging or absent subscriber never blocks the controller.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum FocusEvent {
    StateChanged {
        snapshot: SessionSnapshot,
    },
    Heartbeat {
        snapshot: SessionSnapshot,
    },
    #[serde(rename_all = "camelCase")]
    ScoreUpdated {
        session_id: String,
        score: u8,
        timestamp: DateTime<Utc>,
    },
    /// A short user-facing message (toast).
    Notice {
        title: String,
        description: String,
        destructive: bool,
    },
    SessionCompleted {
        report: Box<SessionReport>,
    },
    /// Follows `SessionCompleted` once the collector's copy of the samples is in.
    SummaryReady {
        summary: Box<SessionSummary>,
    },
}

impl FocusEvent {
    pub fn notice(title: impl Into<String>, description: impl Into<String>) -> Self {
        FocusEvent::Notice {
            title: title.into(),
            description: description.into(),
            destructive: false,
        }
    }

    pub fn warning(title: impl Into<String>, description: impl Into<String>) -> Self {
        FocusEvent::Notice {
            title: title.into(),
            description: description.into(),
            destructive: true,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FocusEvent::StateChanged { .. } => "state-changed",
            FocusEvent::Heartbeat { .. } => "heartbeat",
            FocusEvent::ScoreUpdated { .. } => "score-updated",
            FocusEvent::Notice { .. } => "notice",
            FocusEvent::SessionCompleted { .. } => "session-completed",
            FocusEvent::SummaryReady { .. } => "summary-ready",
        }
    }
}
