//! Retry logic with bounded exponential backoff.
//!
//! Only errors for which [`RouterError::is_retryable`] holds are retried.
//! When attempts run out the last error is returned unchanged.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::error::{Result, RouterError};

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts including the first (default: 3).
    pub max_attempts: u32,
    /// Delay before the first retry (default: 1 second).
    pub base_delay: Duration,
    /// Lower bound for any delay (default: 1 second).
    pub min_delay: Duration,
    /// Upper bound for any delay (default: 10 seconds).
    pub max_delay: Duration,
    /// Multiplier for exponential backoff (default: 2.0).
    pub backoff_multiplier: f64,
    /// Whether to add up to 25% random jitter (default: false).
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }
}

impl RetryConfig {
    /// Config with `max_attempts` attempts starting at `base_delay`.
    /// The floor follows the base delay.
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self { max_attempts, base_delay, min_delay: base_delay, ..Self::default() }
    }

    /// Config that makes exactly one attempt.
    pub fn no_retry() -> Self {
        Self { max_attempts: 1, ..Self::default() }
    }
}

/// Executor for retry operations.
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    /// Create a new RetryExecutor with the given configuration.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// The executor's configuration.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Runs `operation` until it succeeds, fails fatally, or attempts run out.
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if !e.is_retryable() || attempt >= max_attempts => return Err(e),
                Err(e) => {
                    let backoff = self.compute_backoff(attempt - 1);
                    warn!(
                        attempt,
                        max_attempts,
                        error = %e,
                        backoff_ms = backoff.as_millis() as u64,
                        "Operation failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    /// Delay before retry number `retry + 1`.
    ///
    /// `base_delay * backoff_multiplier^retry`, clamped to
    /// `[min_delay, max_delay]`, plus optional jitter of up to 25%.
    pub fn compute_backoff(&self, retry: u32) -> Duration {
        let base_ms = self.config.base_delay.as_millis() as f64;
        let computed = base_ms * self.config.backoff_multiplier.powi(retry as i32);
        let floor = self.config.min_delay.as_millis() as f64;
        let ceiling = (self.config.max_delay.as_millis() as f64).max(floor);
        let clamped = computed.clamp(floor, ceiling) as u64;

        if self.config.jitter && clamped >= 4 {
            let jitter = rand::thread_rng().gen_range(0..=clamped / 4);
            Duration::from_millis(clamped + jitter)
        } else {
            Duration::from_millis(clamped)
        }
    }
}

/// Whether `error` qualifies for another attempt.
pub fn is_retryable(error: &RouterError) -> bool {
    error.is_retryable()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    fn fast(max_attempts: u32) -> RetryExecutor {
        RetryExecutor::new(RetryConfig::new(max_attempts, Duration::from_millis(100)))
    }

    #[test]
    fn test_retry_config_default() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.base_delay, Duration::from_secs(1));
        assert_eq!(config.max_delay, Duration::from_secs(10));
        assert_eq!(config.backoff_multiplier, 2.0);
        assert!(!config.jitter);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_success_first_attempt() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = Arc::clone(&counter);
        let result = fast(3)
            .execute(move || {
                let counter = Arc::clone(&counter_clone);
                async move {
                    counter.fetch_add(1, Ordering::Relaxed);
                    Ok::<_, RouterError>("success")
                }
            })
            .await;

        assert_eq!(result.unwrap(), "success");
        assert_eq!(counter.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_failures_then_success_sleeps_twice() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = Arc::clone(&counter);
        let start = Instant::now();
        let result = fast(3)
            .execute(move || {
                let counter = Arc::clone(&counter_clone);
                async move {
                    let count = counter.fetch_add(1, Ordering::Relaxed) + 1;
                    if count < 3 {
                        Err(RouterError::network("connection reset", None))
                    } else {
                        Ok("success")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "success");
        assert_eq!(counter.load(Ordering::Relaxed), 3);
        // 100ms then 200ms.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(300), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(310), "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhausted_returns_last_error() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = Arc::clone(&counter);
        let result: Result<&str> = fast(3)
            .execute(move || {
                let counter = Arc::clone(&counter_clone);
                async move {
                    let n = counter.fetch_add(1, Ordering::Relaxed) + 1;
                    Err(RouterError::timeout(format!("attempt {n}")))
                }
            })
            .await;

        match result {
            Err(RouterError::Timeout { message, .. }) => assert_eq!(message, "attempt 3"),
            other => panic!("unexpected result {other:?}"),
        }
        assert_eq!(counter.load(Ordering::Relaxed), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_retry_on_decoded_error() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = Arc::clone(&counter);
        let start = Instant::now();
        let result: Result<&str> = fast(3)
            .execute(move || {
                let counter = Arc::clone(&counter_clone);
                async move {
                    counter.fetch_add(1, Ordering::Relaxed);
                    Err(RouterError::from_status(404, "no such model", None))
                }
            })
            .await;

        assert!(matches!(result, Err(RouterError::ModelNotFound { .. })));
        assert_eq!(counter.load(Ordering::Relaxed), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_attempts_still_runs_once() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = Arc::clone(&counter);
        let _ = fast(0)
            .execute(move || {
                let counter = Arc::clone(&counter_clone);
                async move {
                    counter.fetch_add(1, Ordering::Relaxed);
                    Err::<(), _>(RouterError::network("down", None))
                }
            })
            .await;
        assert_eq!(counter.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_compute_backoff() {
        let executor = RetryExecutor::new(RetryConfig {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            min_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            backoff_multiplier: 2.0,
            jitter: false,
        });

        assert_eq!(executor.compute_backoff(0), Duration::from_millis(100));
        assert_eq!(executor.compute_backoff(1), Duration::from_millis(200));
        assert_eq!(executor.compute_backoff(2), Duration::from_millis(400));
        assert_eq!(executor.compute_backoff(10), Duration::from_millis(500));
    }

    #[test]
    fn test_compute_backoff_floor() {
        let executor = RetryExecutor::new(RetryConfig {
            base_delay: Duration::from_millis(10),
            min_delay: Duration::from_millis(250),
            ..RetryConfig::default()
        });
        assert_eq!(executor.compute_backoff(0), Duration::from_millis(250));
    }

    #[test]
    fn test_jitter_stays_within_quarter() {
        let executor = RetryExecutor::new(RetryConfig { jitter: true, ..RetryConfig::default() });
        for _ in 0..100 {
            let delay = executor.compute_backoff(0);
            assert!(delay >= Duration::from_millis(1000));
            assert!(delay <= Duration::from_millis(1250));
        }
    }

    #[test]
    fn test_is_retryable() {
        assert!(is_retryable(&RouterError::network("reset", None)));
        assert!(is_retryable(&RouterError::timeout("slow")));
        assert!(!is_retryable(&RouterError::from_status(503, "unavailable", None)));
        assert!(!is_retryable(&RouterError::validation("bad")));
    }
}
