use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;
use crate::error::{Result, ReviewError};

/// Bounded retry with exponential backoff and jitter. Every attempt runs
/// under its own timeout.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub attempt_timeout: Duration,
    pub base_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, attempt_timeout: Duration, base_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            attempt_timeout,
            base_backoff,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_secs(config.attempt_timeout_secs),
            Duration::from_millis(config.base_backoff_ms),
        )
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_backoff.as_millis() as u64;
        if base == 0 {
            return Duration::ZERO;
        }
        let exponent = attempt.saturating_sub(1).min(16);
        let backoff = base.saturating_mul(1u64 << exponent);
        let jitter = rand::rng().random_range(0..=base / 2);
        Duration::from_millis(backoff + jitter)
    }

    /// Runs `attempt` until it succeeds, fails with a non-retryable error, or
    /// the attempts run out.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut attempt: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut tries = 0u32;
        loop {
            tries += 1;
            let outcome = match tokio::time::timeout(self.attempt_timeout, attempt()).await {
                Ok(result) => result,
                Err(_) => Err(ReviewError::UpstreamTimeout {
                    service: operation.to_string(),
                    elapsed: self.attempt_timeout,
                }),
            };

            let err = match outcome {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => e,
            };

            if tries >= self.max_attempts {
                tracing::error!("{} gave up after {} attempts: {}", operation, tries, err);
                return Err(ReviewError::RetriesExhausted {
                    operation: operation.to_string(),
                    attempts: tries,
                    source: Box::new(err),
                });
            }

            let delay = self.delay_for_attempt(tries);
            tracing::warn!(
                "{} attempt {}/{} failed ({}), retrying in {:?}",
                operation,
                tries,
                self.max_attempts,
                err,
                delay
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio_test::assert_ok;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(100), Duration::ZERO)
    }

    fn parse_error() -> ReviewError {
        ReviewError::StructuredOutputParse {
            schema: "topicos".into(),
            reason: "eof".into(),
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let value = assert_ok!(
            policy(5)
                .run("topicos", move || async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(parse_error())
                    } else {
                        Ok(42)
                    }
                })
                .await
        );
        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhaustion_is_typed() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let err = policy(3)
            .run::<(), _, _>("topicos", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(parse_error())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ReviewError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn validation_errors_are_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let err = policy(5)
            .run::<(), _, _>("resumo", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ReviewError::Validation("vazio".into()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ReviewError::Validation(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn slow_attempts_time_out() {
        let err = RetryPolicy::new(2, Duration::from_millis(10), Duration::ZERO)
            .run::<(), _, _>("sentimento", || async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(())
            })
            .await
            .unwrap_err();
        match err {
            ReviewError::RetriesExhausted { source, .. } => {
                assert!(matches!(*source, ReviewError::UpstreamTimeout { .. }))
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn backoff_grows() {
        let policy = RetryPolicy::new(5, Duration::from_secs(1), Duration::from_millis(100));
        assert!(policy.delay_for_attempt(1) >= Duration::from_millis(100));
        assert!(policy.delay_for_attempt(3) >= Duration::from_millis(400));
        assert!(policy.delay_for_attempt(3) <= Duration::from_millis(450));
    }
}
