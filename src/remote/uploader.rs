use std::sync::Arc;

use log::debug;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::models::MetricSample;

use super::{send_best_effort, RemoteSync};

const QUEUE_CAPACITY: usize = 64;

struct QueuedSample {
    remote_id: String,
    sample: MetricSample,
}

/// Producer side of a session's upload queue. Cheap to clone into sampler cycles.
#[derive(Clone)]
pub struct SampleQueue {
    sender: mpsc::Sender<QueuedSample>,
}

impl SampleQueue {
    /// Queues a sample without waiting. A full or closed queue drops it and returns false.
    pub fn enqueue(&self, remote_id: String, sample: MetricSample) -> bool {
        match self.sender.try_send(QueuedSample { remote_id, sample }) {
            Ok(()) => true,
            Err(TrySendError::Full(queued)) => {
                debug!(
                    "upload queue full; dropping sample taken at {}",
                    queued.sample.timestamp
                );
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

/// Submits one session's samples one at a time, in the order they were queued.
pub struct SampleUploader {
    queue: SampleQueue,
    closed: CancellationToken,
    handle: JoinHandle<usize>,
}

impl SampleUploader {
    pub fn spawn(remote: Arc<dyn RemoteSync>) -> Self {
        let (sender, mut receiver) = mpsc::channel::<QueuedSample>(QUEUE_CAPACITY);
        let closed = CancellationToken::new();
        let closed_signal = closed.clone();

        let handle = tokio::spawn(async move {
            let mut delivered = 0;
            loop {
                tokio::select! {
                    biased;
                    queued = receiver.recv() => {
                        let Some(QueuedSample { remote_id, sample }) = queued else {
                            break;
                        };
                        let outcome = send_best_effort(
                            "submit sample",
                            remote.submit_sample(&remote_id, &sample),
                        )
                        .await;
                        if outcome.is_delivered() {
                            delivered += 1;
                        }
                    }
                    _ = closed_signal.cancelled() => break,
                }
            }
            delivered
        });

        Self {
            queue: SampleQueue { sender },
            closed,
            handle,
        }
    }

    pub fn queue(&self) -> SampleQueue {
        self.queue.clone()
    }

    /// Stops accepting work once the backlog is empty. The handle resolves to the
    /// number of samples the collector accepted.
    pub fn close(self) -> JoinHandle<usize> {
        self.closed.cancel();
        self.handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<i64>>,
    }

    #[async_trait]
    impl RemoteSync for Recorder {
        async fn create_session(&self, _duration_minutes: u32) -> Result<String> {
            Ok("r".into())
        }

        async fn submit_sample(&self, _session_id: &str, sample: &MetricSample) -> Result<()> {
            // Later samples answer faster; order must still hold.
            let wait = 30 - (self.seen.lock().unwrap().len() as u64 * 10).min(30);
            tokio::time::sleep(std::time::Duration::from_millis(wait)).await;
            if sample.score == 0 {
                bail!("rejected");
            }
            self.seen
                .lock()
                .unwrap()
                .push(sample.timestamp.timestamp_millis());
            Ok(())
        }

        async fn fetch_samples(&self, _session_id: &str) -> Result<Vec<MetricSample>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn backlog_is_submitted_in_queue_order_before_close_resolves() {
        let recorder = Arc::new(Recorder::default());
        let uploader = SampleUploader::spawn(recorder.clone());
        let queue = uploader.queue();

        let start = Utc::now();
        for (offset, score) in [(0, 90), (1, 0), (2, 80), (3, 70)] {
            let sample = MetricSample::new(
                start + Duration::seconds(offset),
                score,
                serde_json::Value::Null,
            );
            assert!(queue.enqueue("r".into(), sample));
        }

        let delivered = uploader.close().await.unwrap();
        assert_eq!(delivered, 3);

        let seen = recorder.seen.lock().unwrap().clone();
        let expected: Vec<i64> = [0, 2, 3]
            .iter()
            .map(|offset| (start + Duration::seconds(*offset)).timestamp_millis())
            .collect();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn closed_queue_rejects_new_samples() {
        let uploader = SampleUploader::spawn(Arc::new(Recorder::default()));
        let queue = uploader.queue();
        uploader.close().await.unwrap();

        let sample = MetricSample::new(Utc::now(), 50, serde_json::Value::Null);
        assert!(!queue.enqueue("r".into(), sample));
    }
}
