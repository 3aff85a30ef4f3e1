//! Per-user focus statistics, mutated once per finished session.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_WEEKLY_GOAL_HOURS: f64 = 20.0;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DailyStats {
    pub today_focus_hours: f64,
    pub total_sessions: u32,
    pub weekly_goal_hours: f64,
    pub average_focus: f64,
}

impl Default for DailyStats {
    fn default() -> Self {
        Self {
            today_focus_hours: 0.0,
            total_sessions: 0,
            weekly_goal_hours: DEFAULT_WEEKLY_GOAL_HOURS,
            average_focus: 0.0,
        }
    }
}

impl DailyStats {
    /// Share of the weekly goal already covered today, in percent.
    pub fn goal_progress_percent(&self) -> f64 {
        if self.weekly_goal_hours <= 0.0 {
            return 0.0;
        }
        (self.today_focus_hours / self.weekly_goal_hours * 100.0).min(100.0)
    }
}

/// What one finished session contributes to [`DailyStats`].
#[derive(Debug, Clone, PartialEq)]
pub struct SessionCredit {
    pub focused_seconds: u64,
    /// Mean live score, `None` when the session produced no scores.
    pub mean_score: Option<f64>,
    pub finished_at: DateTime<Utc>,
    pub day: NaiveDate,
}
