use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::models::{Session, SessionStatus};

pub const MIN_DURATION_MINUTES: u32 = 5;
pub const MAX_DURATION_MINUTES: u32 = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The tick belongs to an earlier session and was discarded.
    Stale,
    /// Not running (paused or idle); nothing changed.
    Ignored,
    Counted { remaining_seconds: u64 },
    /// Remaining time hit zero on this tick; the session must be stopped.
    Expired,
}

/// What [`SessionState::finish`] hands back for bookkeeping.
#[derive(Debug, Clone)]
pub struct FinishedSession {
    pub session: Session,
    pub focused_seconds: u64,
    pub live_scores: Vec<u8>,
}

/// Where a freshly computed score should go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreTarget {
    pub session_id: String,
    pub remote_id: Option<String>,
}

/// Countdown and lifecycle state for the focus session.
///
/// `generation` is bumped whenever a session begins or finishes; ticks and sampler
/// cycles carry the generation they were scheduled under and are dropped on mismatch.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub status: SessionStatus,
    pub session: Option<Session>,
    pub duration_seconds: u64,
    pub remaining_seconds: u64,
    pub generation: u64,
    pub device_enabled: bool,
    pub live_score: Option<u8>,
    live_scores: Vec<u8>,
    last_sample_at: Option<DateTime<Utc>>,
}

impl SessionState {
    pub fn new(default_minutes: u32) -> Self {
        let minutes = default_minutes.clamp(MIN_DURATION_MINUTES, MAX_DURATION_MINUTES);
        let duration_seconds = u64::from(minutes) * 60;
        Self {
            status: SessionStatus::Idle,
            session: None,
            duration_seconds,
            remaining_seconds: duration_seconds,
            generation: 0,
            device_enabled: false,
            live_score: None,
            live_scores: Vec::new(),
            last_sample_at: None,
        }
    }

    pub fn set_duration(&mut self, minutes: u32) -> Result<()> {
        if self.status != SessionStatus::Idle {
            bail!("duration can only change while idle");
        }
        validate_minutes(minutes)?;
        self.duration_seconds = u64::from(minutes) * 60;
        self.remaining_seconds = self.duration_seconds;
        Ok(())
    }

    pub fn begin(&mut self, minutes: u32, started_at: DateTime<Utc>) -> Result<Session> {
        if self.status != SessionStatus::Idle {
            bail!("session already active");
        }
        validate_minutes(minutes)?;

        let duration_seconds = u64::from(minutes) * 60;
        let session = Session {
            id: Uuid::new_v4().to_string(),
            remote_id: None,
            duration_seconds,
            started_at,
            status: SessionStatus::Running,
        };

        self.status = SessionStatus::Running;
        self.session = Some(session.clone());
        self.duration_seconds = duration_seconds;
        self.remaining_seconds = duration_seconds;
        self.generation += 1;
        self.live_score = None;
        self.live_scores.clear();
        self.last_sample_at = None;

        Ok(session)
    }

    pub fn pause(&mut self) -> Result<()> {
        if self.status != SessionStatus::Running {
            bail!("only a running session can be paused");
        }
        self.set_status(SessionStatus::Paused);
        Ok(())
    }

    pub fn resume(&mut self) -> Result<()> {
        if self.status != SessionStatus::Paused {
            bail!("only a paused session can be resumed");
        }
        self.set_status(SessionStatus::Running);
        Ok(())
    }

    pub fn tick(&mut self, generation: u64) -> TickOutcome {
        if generation != self.generation {
            return TickOutcome::Stale;
        }
        if self.status != SessionStatus::Running {
            return TickOutcome::Ignored;
        }

        self.remaining_seconds = self.remaining_seconds.saturating_sub(1);
        if self.remaining_seconds == 0 {
            TickOutcome::Expired
        } else {
            TickOutcome::Counted {
                remaining_seconds: self.remaining_seconds,
            }
        }
    }

    pub fn elapsed_seconds(&self) -> u64 {
        self.duration_seconds.saturating_sub(self.remaining_seconds)
    }

    /// `Running ∧ ¬Paused ∧ deviceEnabled`.
    pub fn capturing(&self) -> bool {
        self.status == SessionStatus::Running && self.device_enabled
    }

    /// Attaches the collector's id, unless the session it was requested for is gone.
    pub fn attach_remote_id(&mut self, generation: u64, remote_id: String) -> bool {
        if generation != self.generation || !self.status.is_active() {
            return false;
        }
        match self.session.as_mut() {
            Some(session) => {
                session.remote_id = Some(remote_id);
                true
            }
            None => false,
        }
    }

    /// Publishes a score if the cycle that produced it is still current and capturing.
    ///
    /// Samples taken before the last published one are refused, so published
    /// timestamps never go backwards.
    pub fn record_score(
        &mut self,
        generation: u64,
        score: u8,
        taken_at: DateTime<Utc>,
    ) -> Option<ScoreTarget> {
        if generation != self.generation || !self.capturing() {
            return None;
        }
        if self.last_sample_at.is_some_and(|last| taken_at < last) {
            return None;
        }
        let session = self.session.as_ref()?;
        let target = ScoreTarget {
            session_id: session.id.clone(),
            remote_id: session.remote_id.clone(),
        };
        self.live_score = Some(score);
        self.live_scores.push(score);
        self.last_sample_at = Some(taken_at);
        Some(target)
    }

    /// Moves an active session to `Completed`. Returns `None` if there was nothing
    /// to finish, so a session can only be finalized once.
    pub fn finish(&mut self) -> Option<FinishedSession> {
        if !self.status.is_active() {
            return None;
        }

        let focused_seconds = self.elapsed_seconds();
        self.set_status(SessionStatus::Completed);
        self.generation += 1;
        self.device_enabled = false;

        let session = self.session.clone()?;
        Some(FinishedSession {
            session,
            focused_seconds,
            live_scores: std::mem::take(&mut self.live_scores),
        })
    }

    /// Back to `Idle` with the full configured duration on the clock.
    pub fn reset_to_idle(&mut self) {
        self.status = SessionStatus::Idle;
        self.remaining_seconds = self.duration_seconds;
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            status: self.status,
            session: self.session.clone(),
            duration_seconds: self.duration_seconds,
            remaining_seconds: self.remaining_seconds,
            remaining_display: format_clock(self.remaining_seconds),
            live_score: self.live_score,
            camera_enabled: self.device_enabled,
        }
    }

    fn set_status(&mut self, status: SessionStatus) {
        self.status = status;
        if let Some(session) = self.session.as_mut() {
            session.status = status;
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub session: Option<Session>,
    pub duration_seconds: u64,
    pub remaining_seconds: u64,
    pub remaining_display: String,
    pub live_score: Option<u8>,
    pub camera_enabled: bool,
}

pub fn validate_minutes(minutes: u32) -> Result<()> {
    if !(MIN_DURATION_MINUTES..=MAX_DURATION_MINUTES).contains(&minutes) {
        bail!(
            "session duration must be between {MIN_DURATION_MINUTES} and {MAX_DURATION_MINUTES} minutes, got {minutes}"
        );
    }
    Ok(())
}

/// `MM:SS`, minutes not capped at 59.
pub fn format_clock(seconds: u64) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}
