use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use tokio::sync::{broadcast, Mutex, Semaphore};
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::events::FocusEvent;
use crate::metrics::{CycleMetrics, MetricsCollector};
use crate::models::MetricSample;
use crate::remote::{send_best_effort, BestEffort, FrameScorer, SampleQueue};
use crate::timer::SessionState;

use super::capture::{encode_jpeg, render_frame, DeviceSlot};
use super::scoring::{compute_focus_score, placeholder_score, RawMetrics, ScoringMode};

// Set to false to silence per-cycle logging
const ENABLE_LOGS: bool = true;

/// The running cycle plus one extra may be in flight at once.
pub const MAX_CYCLES_IN_FLIGHT: usize = 2;

use crate::{log_debug, log_info, log_warn};

/// How a single capture-and-score cycle ended.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", tag = "outcome")]
pub enum CycleOutcome {
    /// Session not running, paused, or camera off.
    Inactive,
    /// Too many earlier cycles still waiting on the scorer.
    Busy,
    /// Device has no decoded frame yet.
    NotReady,
    /// Encoding or scoring failed; the previous score stands.
    Abandoned,
    /// The session changed, or a newer sample was published first.
    Stale,
    /// Score published; `synced` is false when the sample could not be queued for upload.
    Published { score: u8, synced: bool },
}

impl CycleOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            CycleOutcome::Inactive => "inactive",
            CycleOutcome::Busy => "busy",
            CycleOutcome::NotReady => "not_ready",
            CycleOutcome::Abandoned => "abandoned",
            CycleOutcome::Stale => "stale",
            CycleOutcome::Published { .. } => "published",
        }
    }
}

/// Everything a cycle needs, captured when the loop (or a one-off sample) starts.
#[derive(Clone)]
pub struct CycleContext {
    pub state: Arc<Mutex<SessionState>>,
    pub generation: u64,
    pub device: DeviceSlot,
    pub scorer: Arc<dyn FrameScorer>,
    /// `None` until the session has an upload queue.
    pub uploads: Option<SampleQueue>,
    /// Shared by the loop and one-off samples; see [`MAX_CYCLES_IN_FLIGHT`].
    pub slots: Arc<Semaphore>,
    pub scoring: ScoringMode,
    pub jpeg_quality: u8,
    pub events: broadcast::Sender<FocusEvent>,
    pub metrics: MetricsCollector,
}

/// Samples immediately, then every `every`, until cancelled.
///
/// Each cycle runs on its own task so a slow scorer never delays the next one.
/// Ticks that find every slot taken are skipped as [`CycleOutcome::Busy`].
pub async fn sampling_loop(context: CycleContext, every: Duration, cancel_token: CancellationToken) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let context = Arc::new(context);

    log_info!(
        "sampling loop started (generation {}, every {}ms)",
        context.generation,
        every.as_millis()
    );

    loop {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => {
                log_info!("sampling loop shutting down");
                break;
            }
            _ = ticker.tick() => {
                let context = Arc::clone(&context);
                tokio::spawn(async move {
                    let outcome = run_cycle(&context).await;
                    log_debug!("sampler cycle finished: {}", outcome.label());
                });
            }
        }
    }
}

/// One capture-and-score cycle. Never fails: every problem degrades to an outcome.
pub async fn run_cycle(context: &CycleContext) -> CycleOutcome {
    {
        let state = context.state.lock().await;
        if state.generation != context.generation || !state.capturing() {
            return CycleOutcome::Inactive;
        }
    }

    let Ok(_slot) = context.slots.try_acquire() else {
        log_debug!("earlier cycles still in flight; skipping this one");
        return CycleOutcome::Busy;
    };

    let cycle_start = Instant::now();
    let timestamp = Utc::now();

    let grab_start = Instant::now();
    let device = context.device.clone();
    let frame = match tokio::task::spawn_blocking(move || device.grab())
        .await
        .context("frame grab worker join failed")
    {
        Ok(Ok(Some(frame))) => frame,
        Ok(Ok(None)) => return CycleOutcome::NotReady,
        Ok(Err(err)) | Err(err) => {
            log_warn!("frame grab failed: {err:#}");
            return CycleOutcome::NotReady;
        }
    };
    let grab_ms = grab_start.elapsed().as_millis() as u64;

    let mut encode_ms = None;
    let mut analyze_ms = None;
    let mut payload_bytes = 0;

    let metrics = match context.scoring {
        ScoringMode::Remote => {
            let encode_start = Instant::now();
            let quality = context.jpeg_quality;
            let jpeg = match tokio::task::spawn_blocking(move || -> Result<Vec<u8>> {
                let image = render_frame(frame)?;
                encode_jpeg(&image, quality)
            })
            .await
            .context("frame encode worker join failed")
            {
                Ok(Ok(jpeg)) => jpeg,
                Ok(Err(err)) | Err(err) => {
                    log_warn!("frame encode failed: {err:#}");
                    return finish_cycle(
                        context,
                        CycleOutcome::Abandoned,
                        timestamp,
                        cycle_start,
                        grab_ms,
                        None,
                        0,
                        None,
                    )
                    .await;
                }
            };
            encode_ms = Some(encode_start.elapsed().as_millis() as u64);
            payload_bytes = jpeg.len();

            let analyze_start = Instant::now();
            let scored = send_best_effort("analyze frame", context.scorer.analyze(jpeg)).await;
            analyze_ms = Some(analyze_start.elapsed().as_millis() as u64);

            match scored {
                BestEffort::Delivered(metrics) => metrics,
                BestEffort::Dropped { .. } => {
                    return finish_cycle(
                        context,
                        CycleOutcome::Abandoned,
                        timestamp,
                        cycle_start,
                        grab_ms,
                        encode_ms,
                        payload_bytes,
                        analyze_ms,
                    )
                    .await;
                }
            }
        }
        ScoringMode::Placeholder => {
            drop(frame);
            placeholder_metrics()
        }
    };

    let score = match context.scoring {
        ScoringMode::Remote => compute_focus_score(&metrics),
        ScoringMode::Placeholder => placeholder_score(&mut rand::thread_rng()),
    };

    // Queue while holding the state lock so uploads follow publish order.
    let published = {
        let mut state = context.state.lock().await;
        state
            .record_score(context.generation, score, timestamp)
            .map(|target| {
                let synced = match (target.remote_id, &context.uploads) {
                    (Some(remote_id), Some(queue)) => queue.enqueue(
                        remote_id,
                        MetricSample::new(timestamp, score, metrics.to_json()),
                    ),
                    _ => false,
                };
                (target.session_id, synced)
            })
    };

    let outcome = match published {
        None => CycleOutcome::Stale,
        Some((session_id, synced)) => {
            if !synced {
                log_debug!("sample for {} not queued for upload", session_id);
            }
            let _ = context.events.send(FocusEvent::ScoreUpdated {
                session_id,
                score,
                timestamp,
            });
            CycleOutcome::Published { score, synced }
        }
    };

    finish_cycle(
        context,
        outcome,
        timestamp,
        cycle_start,
        grab_ms,
        encode_ms,
        payload_bytes,
        analyze_ms,
    )
    .await
}

fn placeholder_metrics() -> RawMetrics {
    let mut metrics = RawMetrics::default();
    metrics
        .extra
        .insert("placeholder".into(), serde_json::Value::Bool(true));
    metrics
}

#[allow(clippy::too_many_arguments)]
async fn finish_cycle(
    context: &CycleContext,
    outcome: CycleOutcome,
    timestamp: chrono::DateTime<Utc>,
    cycle_start: Instant,
    grab_ms: u64,
    encode_ms: Option<u64>,
    payload_bytes: usize,
    analyze_ms: Option<u64>,
) -> CycleOutcome {
    let (cpu_percent, memory_mb) = context.metrics.sample_system_metrics().await;
    let total_ms = cycle_start.elapsed().as_millis() as u64;

    context
        .metrics
        .record_cycle(CycleMetrics {
            timestamp,
            grab_ms,
            encode_ms,
            payload_bytes,
            analyze_ms,
            total_ms,
            outcome: outcome.label().to_string(),
            cpu_percent,
            memory_mb,
        })
        .await;

    log_debug!(
        "cycle {} in {}ms (grab: {}ms, encode: {:?}ms, analyze: {:?}ms, {} bytes)",
        outcome.label(),
        total_ms,
        grab_ms,
        encode_ms,
        analyze_ms,
        payload_bytes
    );

    outcome
}
