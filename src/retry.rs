//! Bounded retry with exponential backoff
//!
//! Persistence and dispatch calls are the pipeline's only suspension points.
//! Each attempt runs under a timeout and failures are retried on a fixed
//! backoff schedule before the operation is declared degraded.

use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;
use tracing::warn;

use crate::config::EngineConfig;
use crate::error::RiskError;

/// Timeout and backoff schedule applied to one logical IO operation
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Per-attempt timeout
    pub attempt_timeout: Duration,
    /// Sleep between attempts; its length bounds the number of retries
    pub backoff: Vec<Duration>,
}

impl RetryPolicy {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            attempt_timeout: Duration::from_millis(config.io_timeout_ms),
            backoff: config
                .retry_backoff_ms
                .iter()
                .map(|ms| Duration::from_millis(*ms))
                .collect(),
        }
    }

    /// Run `op` until it succeeds or the schedule is exhausted.
    /// Returns the final error after the last attempt.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, RiskError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RiskError>>,
    {
        let attempts = self.backoff.len() + 1;
        let mut last_error = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                tokio::time::sleep(self.backoff[attempt - 1]).await;
            }

            match timeout(self.attempt_timeout, op()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(error)) => {
                    warn!(label, attempt, %error, "attempt failed");
                    last_error = Some(error);
                }
                Err(_) => {
                    warn!(label, attempt, "attempt timed out");
                    last_error = Some(RiskError::PersistenceError(format!(
                        "{} timed out after {:?}",
                        label, self.attempt_timeout
                    )));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            RiskError::PersistenceError(format!("{} failed with no attempts", label))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            attempt_timeout: Duration::from_secs(5),
            backoff: vec![
                Duration::from_millis(200),
                Duration::from_millis(800),
                Duration::from_millis(3200),
            ],
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_first_attempt() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();

        let result = policy()
            .run("op", move || {
                let counted = counted.clone();
                async move {
                    counted.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, RiskError>(7)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failures() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();

        let result = policy()
            .run("op", move || {
                let counted = counted.clone();
                async move {
                    let n = counted.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err(RiskError::PersistenceError("transient".into()))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_schedule_then_errors() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();

        let result: Result<(), _> = policy()
            .run("op", move || {
                let counted = counted.clone();
                async move {
                    counted.fetch_add(1, Ordering::SeqCst);
                    Err(RiskError::PersistenceError("down".into()))
                }
            })
            .await;

        assert!(result.is_err());
        // Initial attempt plus three retries
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_failure() {
        let result: Result<(), _> = RetryPolicy {
            attempt_timeout: Duration::from_millis(50),
            backoff: vec![Duration::from_millis(200)],
        }
        .run("op", || async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await;

        assert!(result.is_err());
    }
}
