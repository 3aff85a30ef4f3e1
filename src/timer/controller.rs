use std::{sync::Arc, time::Duration};

use anyhow::{anyhow, bail, Context, Result};
use chrono::{Local, Utc};
use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::{
    sync::{broadcast, Mutex, Semaphore},
    task::JoinHandle,
    time,
};
use tokio_util::sync::CancellationToken;

use crate::{
    db::{DailyStats, Database, SessionCredit, SessionRecord},
    events::FocusEvent,
    metrics::MetricsCollector,
    models::{Session, SessionStatus},
    remote::{
        send_best_effort, BestEffort, FrameScorer, RemoteSync, SampleUploader, UserContext,
    },
    sensing::{
        loop_worker::{run_cycle, CycleContext, MAX_CYCLES_IN_FLIGHT},
        CaptureSource, CycleOutcome, DeviceSlot, SamplerController, ScoringMode,
    },
    settings::FocusSettings,
    summary::SessionSummary,
};

use super::state::{FinishedSession, SessionSnapshot, SessionState, TickOutcome};

const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub default_duration_minutes: u32,
    pub weekly_goal_hours: f64,
    /// `None` disables the background clock; the host then calls [`FocusController::tick`].
    pub tick_interval: Option<Duration>,
    /// `None` disables the background sampler; the host then calls
    /// [`FocusController::sample_once`].
    pub sample_interval: Option<Duration>,
    pub heartbeat_every_ticks: u64,
    pub jpeg_quality: u8,
    pub scoring: ScoringMode,
}

impl ControllerConfig {
    pub fn from_settings(settings: &FocusSettings, debug_mode: bool) -> Self {
        Self {
            default_duration_minutes: settings.default_duration_minutes,
            weekly_goal_hours: settings.weekly_goal_hours,
            tick_interval: Some(Duration::from_secs(1)),
            sample_interval: Some(settings.sample_interval()),
            heartbeat_every_ticks: if debug_mode { 1 } else { 10 },
            jpeg_quality: settings.jpeg_quality,
            scoring: settings.scoring,
        }
    }

    /// Same settings with both periodic tasks left to the host.
    pub fn externally_driven(mut self) -> Self {
        self.tick_interval = None;
        self.sample_interval = None;
        self
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self::from_settings(&FocusSettings::default(), false)
    }
}

/// Local result of a finished session, handed to the UI and broadcast as
/// `session-completed`. The collector-side chart follows later as `summary-ready`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionReport {
    pub session: Session,
    pub focused_seconds: u64,
    /// Scores published locally during the session, oldest first.
    pub live_scores: Vec<u8>,
    /// Updated stats, `None` if the local write failed.
    pub stats: Option<DailyStats>,
}

impl SessionReport {
    pub fn focused_minutes(&self) -> u64 {
        self.focused_seconds / 60
    }
}

/// Orchestrates the countdown clock, the sampler, and local/remote bookkeeping.
#[derive(Clone)]
pub struct FocusController {
    state: Arc<Mutex<SessionState>>,
    db: Database,
    user: UserContext,
    config: ControllerConfig,
    remote: Arc<dyn RemoteSync>,
    scorer: Arc<dyn FrameScorer>,
    capture: Arc<dyn CaptureSource>,
    sampler: Arc<Mutex<SamplerController>>,
    ticker: Arc<Mutex<Option<CancellationToken>>>,
    uploader: Arc<Mutex<Option<SampleUploader>>>,
    cycle_slots: Arc<Semaphore>,
    events: broadcast::Sender<FocusEvent>,
    metrics: MetricsCollector,
}

impl FocusController {
    pub fn new(
        db: Database,
        user: UserContext,
        config: ControllerConfig,
        remote: Arc<dyn RemoteSync>,
        scorer: Arc<dyn FrameScorer>,
        capture: Arc<dyn CaptureSource>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            state: Arc::new(Mutex::new(SessionState::new(config.default_duration_minutes))),
            db,
            user,
            config,
            remote,
            scorer,
            capture,
            sampler: Arc::new(Mutex::new(SamplerController::new())),
            ticker: Arc::new(Mutex::new(None)),
            uploader: Arc::new(Mutex::new(None)),
            cycle_slots: Arc::new(Semaphore::new(MAX_CYCLES_IN_FLIGHT)),
            events,
            metrics: MetricsCollector::new(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FocusEvent> {
        self.events.subscribe()
    }

    pub fn metrics(&self) -> MetricsCollector {
        self.metrics.clone()
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        self.state.lock().await.snapshot()
    }

    pub async fn set_duration(&self, minutes: u32) -> Result<SessionSnapshot> {
        self.state.lock().await.set_duration(minutes)?;
        self.emit_state_changed().await;
        Ok(self.snapshot().await)
    }

    pub async fn start(&self, duration_minutes: u32) -> Result<SessionSnapshot> {
        let (session, generation) = {
            let mut state = self.state.lock().await;
            let session = state.begin(duration_minutes, Utc::now())?;
            (session, state.generation)
        };

        info!(
            "Starting {duration_minutes}-minute focus session {}",
            session.id
        );

        if let Err(err) = self
            .db
            .insert_session(&SessionRecord::started(&session, &self.user.user_id))
            .await
        {
            error!("Failed to record session {} locally: {err:#}", session.id);
        }

        self.metrics.reset().await;

        let uploader = SampleUploader::spawn(Arc::clone(&self.remote));
        if let Some(previous) = self.uploader.lock().await.replace(uploader) {
            drop(previous.close());
        }

        if let Some(every) = self.config.tick_interval {
            self.spawn_ticker(generation, every).await;
        }
        self.spawn_remote_session(session.id.clone(), duration_minutes, generation);
        self.reconcile_sampler().await;

        self.notify(FocusEvent::notice(
            "Session Started!",
            "Stay focused and productive!",
        ));
        self.emit_state_changed().await;

        Ok(self.snapshot().await)
    }

    pub async fn pause(&self) -> Result<SessionSnapshot> {
        self.state.lock().await.pause()?;
        self.reconcile_sampler().await;
        self.notify(FocusEvent::notice("Session Paused", "Take a quick break"));
        self.emit_state_changed().await;
        Ok(self.snapshot().await)
    }

    pub async fn resume(&self) -> Result<SessionSnapshot> {
        self.state.lock().await.resume()?;
        self.reconcile_sampler().await;
        self.notify(FocusEvent::notice("Session Resumed", "Keep going!"));
        self.emit_state_changed().await;
        Ok(self.snapshot().await)
    }

    pub async fn toggle_pause(&self) -> Result<SessionSnapshot> {
        let paused = self.state.lock().await.status == SessionStatus::Paused;
        if paused {
            self.resume().await
        } else {
            self.pause().await
        }
    }

    /// Opens the camera. On failure a destructive notice is broadcast, capture
    /// stays off, and the session (if any) carries on untouched.
    pub async fn enable_camera(&self) -> Result<()> {
        {
            let mut sampler = self.sampler.lock().await;
            if !sampler.has_device() {
                let capture = Arc::clone(&self.capture);
                let opened = tokio::task::spawn_blocking(move || capture.open())
                    .await
                    .context("camera open worker join failed")
                    .and_then(|result| result);

                match opened {
                    Ok(device) => sampler.attach_device(device)?,
                    Err(err) => {
                        warn!("Camera unavailable: {err:#}");
                        self.notify(FocusEvent::warning(
                            "Camera Access Denied",
                            "Please allow camera access for focus tracking",
                        ));
                        return Err(err.context("camera unavailable"));
                    }
                }
            }
        }

        self.state.lock().await.device_enabled = true;
        self.reconcile_sampler().await;

        self.notify(FocusEvent::notice(
            "Camera Started",
            "Focus monitoring is now active",
        ));
        self.emit_state_changed().await;
        Ok(())
    }

    pub async fn disable_camera(&self) -> Result<()> {
        self.state.lock().await.device_enabled = false;
        self.sampler.lock().await.release_device().await?;
        self.emit_state_changed().await;
        Ok(())
    }

    /// Advances the countdown by one second. Reaching zero stops the session.
    pub async fn tick(&self) -> TickOutcome {
        let generation = self.state.lock().await.generation;
        self.tick_generation(generation).await
    }

    /// Runs one capture-and-score cycle right now, outside the sampler loop.
    pub async fn sample_once(&self) -> CycleOutcome {
        let device = self.sampler.lock().await.device_slot();
        let Some(device) = device else {
            return CycleOutcome::Inactive;
        };
        let generation = self.state.lock().await.generation;
        let context = self.cycle_context(generation, device).await;
        run_cycle(&context).await
    }

    /// Finalizes the session locally and returns to `Idle` without waiting on the
    /// collector. The fetched sample series arrives afterwards as
    /// [`FocusEvent::SummaryReady`].
    pub async fn stop(&self) -> Result<SessionReport> {
        let finished = {
            let mut state = self.state.lock().await;
            state
                .finish()
                .ok_or_else(|| anyhow!("no active session to stop"))?
        };
        let stopped_at = Utc::now();

        self.cancel_ticker().await;
        if let Err(err) = self.sampler.lock().await.release_device().await {
            warn!("Sampler did not shut down cleanly: {err:#}");
        }
        let uploads = self.uploader.lock().await.take().map(SampleUploader::close);

        let FinishedSession {
            session,
            focused_seconds,
            live_scores,
        } = finished;
        let mean_score = mean_score(&live_scores);

        let credit = SessionCredit {
            focused_seconds,
            mean_score,
            finished_at: stopped_at,
            day: stopped_at.with_timezone(&Local).date_naive(),
        };
        let stats = match self
            .db
            .record_session_stats(&self.user.user_id, &credit, self.config.weekly_goal_hours)
            .await
        {
            Ok(stats) => Some(stats),
            Err(err) => {
                error!("Failed to update stats for session {}: {err:#}", session.id);
                None
            }
        };

        if let Err(err) = self
            .db
            .complete_session(
                &session.id,
                stopped_at,
                focused_seconds,
                live_scores.len() as u64,
                mean_score,
            )
            .await
        {
            error!("Failed to mark session {} completed: {err:#}", session.id);
        }

        self.state.lock().await.reset_to_idle();

        info!(
            "Session {} completed: {}s focused, {} live scores",
            session.id,
            focused_seconds,
            live_scores.len()
        );

        let report = SessionReport {
            session,
            focused_seconds,
            live_scores,
            stats,
        };

        self.notify(FocusEvent::notice(
            "Session Complete!",
            format!(
                "Great work! You focused for {} minutes",
                report.focused_minutes()
            ),
        ));
        self.emit_state_changed().await;
        self.notify(FocusEvent::SessionCompleted {
            report: Box::new(report.clone()),
        });

        self.spawn_summary(
            report.session.id.clone(),
            report.session.remote_id.clone(),
            uploads,
        );

        Ok(report)
    }

    pub async fn daily_stats(&self) -> Result<DailyStats> {
        self.db
            .get_daily_stats(
                &self.user.user_id,
                Local::now().date_naive(),
                self.config.weekly_goal_hours,
            )
            .await
    }

    pub async fn set_weekly_goal(&self, hours: f64) -> Result<DailyStats> {
        if !hours.is_finite() || hours <= 0.0 {
            bail!("weekly goal must be a positive number of hours, got {hours}");
        }
        self.db
            .set_weekly_goal(&self.user.user_id, hours, Local::now().date_naive())
            .await?;
        self.daily_stats().await
    }

    pub async fn history(&self, limit: usize, offset: usize) -> Result<Vec<SessionRecord>> {
        self.db.list_sessions(limit, offset).await
    }

    async fn tick_generation(&self, generation: u64) -> TickOutcome {
        let (outcome, heartbeat) = {
            let mut state = self.state.lock().await;
            let outcome = state.tick(generation);
            let heartbeat = match (outcome, state.session.as_ref()) {
                (TickOutcome::Counted { .. }, Some(session))
                    if state.elapsed_seconds() % self.config.heartbeat_every_ticks.max(1) == 0 =>
                {
                    Some((state.snapshot(), session.id.clone(), state.elapsed_seconds()))
                }
                _ => None,
            };
            (outcome, heartbeat)
        };

        if let Some((snapshot, session_id, elapsed)) = heartbeat {
            self.notify(FocusEvent::Heartbeat { snapshot });

            let db = self.db.clone();
            tokio::spawn(async move {
                if let Err(err) = db
                    .update_session_progress(&session_id, elapsed, Utc::now())
                    .await
                {
                    debug!("Progress update for {session_id} failed: {err:#}");
                }
            });
        }

        if outcome == TickOutcome::Expired {
            if let Err(err) = self.stop().await {
                debug!("Auto-stop skipped: {err:#}");
            }
        }

        outcome
    }

    async fn spawn_ticker(&self, generation: u64, every: Duration) {
        let mut ticker_guard = self.ticker.lock().await;
        if let Some(previous) = ticker_guard.take() {
            previous.cancel();
        }

        let cancel_token = CancellationToken::new();
        let token = cancel_token.clone();
        let controller = self.clone();

        tokio::spawn(async move {
            let mut interval = time::interval_at(time::Instant::now() + every, every);
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        match controller.tick_generation(generation).await {
                            TickOutcome::Stale | TickOutcome::Expired => break,
                            TickOutcome::Ignored | TickOutcome::Counted { .. } => {}
                        }
                    }
                }
            }
        });

        *ticker_guard = Some(cancel_token);
    }

    async fn cancel_ticker(&self) {
        if let Some(token) = self.ticker.lock().await.take() {
            token.cancel();
        }
    }

    fn spawn_remote_session(&self, session_id: String, duration_minutes: u32, generation: u64) {
        let remote = Arc::clone(&self.remote);
        let state = Arc::clone(&self.state);
        let db = self.db.clone();

        tokio::spawn(async move {
            let BestEffort::Delivered(remote_id) =
                send_best_effort("create session", remote.create_session(duration_minutes)).await
            else {
                return;
            };

            let attached = state
                .lock()
                .await
                .attach_remote_id(generation, remote_id.clone());
            if !attached {
                debug!("Remote session {remote_id} arrived after {session_id} ended; ignored");
                return;
            }

            info!("Session {session_id} mirrored remotely as {remote_id}");
            if let Err(err) = db.set_session_remote_id(&session_id, &remote_id).await {
                error!("Failed to store remote id for {session_id}: {err:#}");
            }
        });
    }

    /// Starts or stops the sampler loop so it runs exactly while capturing.
    async fn reconcile_sampler(&self) {
        let mut sampler = self.sampler.lock().await;
        let (capturing, generation) = {
            let state = self.state.lock().await;
            (state.capturing(), state.generation)
        };
        let want = capturing && sampler.has_device();

        if sampler.is_sampling() && (!want || sampler.sampling_generation() != Some(generation)) {
            if let Err(err) = sampler.stop_sampling().await {
                warn!("Failed to stop sampling loop: {err:#}");
            }
        }

        if want && !sampler.is_sampling() {
            let (Some(every), Some(device)) = (self.config.sample_interval, sampler.device_slot())
            else {
                return;
            };
            let context = self.cycle_context(generation, device).await;
            if let Err(err) = sampler.start_sampling(context, every) {
                warn!("Failed to start sampling loop: {err:#}");
            }
        }
    }

    /// Waits for the session's queued uploads, fetches what the collector stored,
    /// and broadcasts the rendered summary. Runs detached so a stalled collector
    /// only delays the chart.
    fn spawn_summary(
        &self,
        session_id: String,
        remote_id: Option<String>,
        uploads: Option<JoinHandle<usize>>,
    ) {
        let remote = Arc::clone(&self.remote);
        let events = self.events.clone();

        tokio::spawn(async move {
            if let Some(uploads) = uploads {
                match uploads.await {
                    Ok(delivered) => debug!("{delivered} samples uploaded for {session_id}"),
                    Err(err) => warn!("Sample uploader for {session_id} failed: {err}"),
                }
            }

            let samples = match remote_id.as_deref() {
                Some(remote_id) => {
                    send_best_effort("fetch samples", remote.fetch_samples(remote_id))
                        .await
                        .unwrap_or_default()
                }
                None => Vec::new(),
            };

            let summary = SessionSummary::from_samples(session_id, samples);
            info!(
                "Summary for {} ready with {} synced samples",
                summary.session_id,
                summary.samples.len()
            );
            let _ = events.send(FocusEvent::SummaryReady {
                summary: Box::new(summary),
            });
        });
    }

    async fn cycle_context(&self, generation: u64, device: DeviceSlot) -> CycleContext {
        let uploads = self
            .uploader
            .lock()
            .await
            .as_ref()
            .map(SampleUploader::queue);

        CycleContext {
            state: Arc::clone(&self.state),
            generation,
            device,
            scorer: Arc::clone(&self.scorer),
            uploads,
            slots: Arc::clone(&self.cycle_slots),
            scoring: self.config.scoring,
            jpeg_quality: self.config.jpeg_quality,
            events: self.events.clone(),
            metrics: self.metrics.clone(),
        }
    }

    fn notify(&self, event: FocusEvent) {
        let _ = self.events.send(event);
    }

    async fn emit_state_changed(&self) {
        let snapshot = self.snapshot().await;
        self.notify(FocusEvent::StateChanged { snapshot });
    }
}

fn mean_score(scores: &[u8]) -> Option<f64> {
    if scores.is_empty() {
        return None;
    }
    let total: u64 = scores.iter().map(|&score| u64::from(score)).sum();
    Some(total as f64 / scores.len() as f64)
}
