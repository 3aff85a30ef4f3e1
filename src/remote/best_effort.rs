//! Fire-and-forget plumbing for calls whose failure must never reach the caller.
//!
//! Every collector and scorer call goes through [`send_best_effort`]. Failures
//! are logged at debug level and turned into [`BestEffort::Dropped`]; there is
//! no retry.

use std::future::Future;

use anyhow::Result;
use log::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BestEffort<T> {
    Delivered(T),
    Dropped { reason: String },
}

impl<T> BestEffort<T> {
    pub fn delivered(self) -> Option<T> {
        match self {
            BestEffort::Delivered(value) => Some(value),
            BestEffort::Dropped { .. } => None,
        }
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self, BestEffort::Delivered(_))
    }

    pub fn unwrap_or_default(self) -> T
    where
        T: Default,
    {
        self.delivered().unwrap_or_default()
    }
}

/// Awaits `call` and folds any error into [`BestEffort::Dropped`].
pub async fn send_best_effort<T, F>(label: &str, call: F) -> BestEffort<T>
where
    F: Future<Output = Result<T>>,
{
    match call.await {
        Ok(value) => BestEffort::Delivered(value),
        Err(err) => {
            debug!("best-effort call '{label}' dropped: {err:#}");
            BestEffort::Dropped {
                reason: format!("{err:#}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[tokio::test]
    async fn failures_become_dropped() {
        let outcome: BestEffort<u32> =
            send_best_effort("always fails", async { Err(anyhow!("collector offline")) }).await;
        assert_eq!(
            outcome,
            BestEffort::Dropped {
                reason: "collector offline".into()
            }
        );
        assert_eq!(outcome.unwrap_or_default(), 0);
    }

    #[tokio::test]
    async fn successes_are_delivered() {
        let outcome = send_best_effort("echo", async { Ok::<_, anyhow::Error>(7) }).await;
        assert!(outcome.is_delivered());
        assert_eq!(outcome.delivered(), Some(7));
    }
}
