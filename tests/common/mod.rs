#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tempfile::TempDir;

use focusfy_lib::models::MetricSample;
use focusfy_lib::remote::{FrameScorer, RemoteSync, UserContext};
use focusfy_lib::sensing::{CaptureDevice, CaptureSource, RawFrame, RawMetrics};
use focusfy_lib::{ControllerConfig, Database, FocusController, FocusEvent};

pub const USER_ID: &str = "user-1";

/// In-memory collector. Stores submitted samples per session and serves them back.
#[derive(Default)]
pub struct FakeCollector {
    pub offline: AtomicBool,
    /// Sample fetches never answer.
    pub stall_fetch: AtomicBool,
    pub created: Mutex<Vec<u32>>,
    pub submitted: Mutex<Vec<(String, MetricSample)>>,
    pub fetch_calls: AtomicUsize,
    next_id: AtomicU64,
}

impl FakeCollector {
    pub fn offline() -> Self {
        let collector = Self::default();
        collector.offline.store(true, Ordering::SeqCst);
        collector
    }

    pub fn stalled() -> Self {
        let collector = Self::default();
        collector.stall_fetch.store(true, Ordering::SeqCst);
        collector
    }

    pub fn submitted_count(&self) -> usize {
        self.submitted.lock().unwrap().len()
    }
}

#[async_trait]
impl RemoteSync for FakeCollector {
    async fn create_session(&self, duration_minutes: u32) -> Result<String> {
        if self.offline.load(Ordering::SeqCst) {
            bail!("collector offline");
        }
        self.created.lock().unwrap().push(duration_minutes);
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("remote-{id}"))
    }

    async fn submit_sample(&self, session_id: &str, sample: &MetricSample) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            bail!("collector offline");
        }
        self.submitted
            .lock()
            .unwrap()
            .push((session_id.to_string(), sample.clone()));
        Ok(())
    }

    async fn fetch_samples(&self, session_id: &str) -> Result<Vec<MetricSample>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if self.stall_fetch.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.offline.load(Ordering::SeqCst) {
            bail!("collector offline");
        }
        Ok(self
            .submitted
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == session_id)
            .map(|(_, sample)| sample.clone())
            .collect())
    }
}

/// Scorer that replays queued responses; `None` entries fail the request.
/// Once the queue is empty every frame scores as fully focused.
#[derive(Default)]
pub struct ScriptedScorer {
    responses: Mutex<VecDeque<Option<RawMetrics>>>,
    delays: Mutex<VecDeque<Duration>>,
    /// Every request hangs once set.
    pub stall: AtomicBool,
    pub frames_seen: AtomicUsize,
}

impl ScriptedScorer {
    pub fn push(&self, response: Option<RawMetrics>) {
        self.responses.lock().unwrap().push_back(response);
    }

    /// The next request answers only after `delay`.
    pub fn delay_next(&self, delay: Duration) {
        self.delays.lock().unwrap().push_back(delay);
    }
}

#[async_trait]
impl FrameScorer for ScriptedScorer {
    async fn analyze(&self, jpeg: Vec<u8>) -> Result<RawMetrics> {
        assert!(jpeg.starts_with(&[0xFF, 0xD8]), "frame is not a JPEG");
        self.frames_seen.fetch_add(1, Ordering::SeqCst);
        if self.stall.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let delay = self.delays.lock().unwrap().pop_front();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match self.responses.lock().unwrap().pop_front() {
            Some(Some(metrics)) => Ok(metrics),
            Some(None) => bail!("scorer unavailable"),
            None => Ok(focused()),
        }
    }
}

pub fn metrics(gaze: &str, blink_rate: f64, confidence: f64) -> RawMetrics {
    RawMetrics {
        gaze_direction: Some(gaze.to_string()),
        blink_rate: Some(blink_rate),
        confidence: Some(confidence),
        ..RawMetrics::default()
    }
}

pub fn focused() -> RawMetrics {
    metrics("center", 0.0, 1.0)
}

/// Camera double. `released` flips when the opened device is dropped.
#[derive(Default)]
pub struct FakeCamera {
    pub deny: bool,
    pub opened: AtomicUsize,
    pub released: Arc<AtomicBool>,
}

impl FakeCamera {
    pub fn denied() -> Self {
        Self {
            deny: true,
            ..Self::default()
        }
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

impl CaptureSource for FakeCamera {
    fn open(&self) -> Result<Box<dyn CaptureDevice>> {
        if self.deny {
            bail!("permission denied");
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        self.released.store(false, Ordering::SeqCst);
        Ok(Box::new(FakeDevice {
            released: Arc::clone(&self.released),
        }))
    }
}

struct FakeDevice {
    released: Arc<AtomicBool>,
}

impl CaptureDevice for FakeDevice {
    fn name(&self) -> &str {
        "fake-camera"
    }

    fn resolution(&self) -> (u32, u32) {
        (8, 6)
    }

    fn latest_frame(&mut self) -> Result<Option<RawFrame>> {
        Ok(Some(RawFrame {
            width: 8,
            height: 6,
            rgb: vec![128; 8 * 6 * 3],
        }))
    }
}

impl Drop for FakeDevice {
    fn drop(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

pub struct Harness {
    pub controller: FocusController,
    pub collector: Arc<FakeCollector>,
    pub scorer: Arc<ScriptedScorer>,
    pub camera: Arc<FakeCamera>,
    pub db: Database,
    _dir: TempDir,
}

/// Clock and sampler both driven by the test.
pub fn manual_config() -> ControllerConfig {
    ControllerConfig {
        heartbeat_every_ticks: 10,
        ..ControllerConfig::default().externally_driven()
    }
}

pub fn harness(config: ControllerConfig) -> Harness {
    harness_with(config, FakeCollector::default(), FakeCamera::default())
}

pub fn harness_with(
    config: ControllerConfig,
    collector: FakeCollector,
    camera: FakeCamera,
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::new(dir.path().join("focusfy.sqlite3")).unwrap();
    let collector = Arc::new(collector);
    let scorer = Arc::new(ScriptedScorer::default());
    let camera = Arc::new(camera);

    let controller = FocusController::new(
        db.clone(),
        UserContext::new(USER_ID, None),
        config,
        collector.clone(),
        scorer.clone(),
        camera.clone(),
    );

    Harness {
        controller,
        collector,
        scorer,
        camera,
        db,
        _dir: dir,
    }
}

/// Polls `condition` until it holds, failing the test after two seconds.
pub async fn eventually<F>(what: &str, mut condition: F)
where
    F: FnMut() -> bool,
{
    let waited = tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}

pub async fn wait_for_remote_id(controller: &FocusController) -> String {
    let waited = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let snapshot = controller.snapshot().await;
            if let Some(remote_id) = snapshot.session.and_then(|session| session.remote_id) {
                return remote_id;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    waited.expect("remote session id never arrived")
}

/// Waits for the first event `pick` accepts, failing the test after two seconds.
pub async fn next_event<T, F>(
    events: &mut tokio::sync::broadcast::Receiver<FocusEvent>,
    mut pick: F,
) -> T
where
    F: FnMut(FocusEvent) -> Option<T>,
{
    use tokio::sync::broadcast::error::RecvError;

    let waited = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Some(found) = pick(event) {
                        return found;
                    }
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await;
    waited.expect("expected event never arrived")
}

pub async fn next_summary(
    events: &mut tokio::sync::broadcast::Receiver<FocusEvent>,
) -> focusfy_lib::SessionSummary {
    next_event(events, |event| match event {
        FocusEvent::SummaryReady { summary } => Some(*summary),
        _ => None,
    })
    .await
}

/// Drains buffered events, skipping over any the receiver lagged behind on.
pub fn drain(events: &mut tokio::sync::broadcast::Receiver<FocusEvent>) -> Vec<FocusEvent> {
    use tokio::sync::broadcast::error::TryRecvError;

    let mut drained = Vec::new();
    loop {
        match events.try_recv() {
            Ok(event) => drained.push(event),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
        }
    }
    drained
}
