//! Client-side request throttling.
//!
//! A token bucket per client instance, refilled continuously. Acquiring a
//! token waits until one is available; it never rejects.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

/// Configuration for rate limiting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Sustained requests allowed per minute.
    pub requests_per_minute: u32,
    /// Maximum tokens that can accumulate (burst allowance).
    pub burst_size: u32,
    /// When false, acquisition never waits.
    pub enabled: bool,
}

impl RateLimitConfig {
    /// Creates an enabled config with the given values.
    pub fn new(requests_per_minute: u32, burst_size: u32) -> Self {
        Self { requests_per_minute, burst_size, enabled: true }
    }

    /// A config that never throttles.
    pub fn disabled() -> Self {
        Self { enabled: false, ..Self::default() }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { requests_per_minute: 100, burst_size: 10, enabled: true }
    }
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket guarded by its own mutex.
pub struct RateLimiter {
    config: RateLimitConfig,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// Creates a limiter with a full bucket.
    pub fn new(config: RateLimitConfig) -> Self {
        let tokens = f64::from(config.burst_size.max(1));
        Self { config, bucket: Mutex::new(Bucket { tokens, last_refill: Instant::now() }) }
    }

    /// The limiter's configuration.
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    fn capacity(&self) -> f64 {
        f64::from(self.config.burst_size.max(1))
    }

    fn per_second(&self) -> f64 {
        f64::from(self.config.requests_per_minute.max(1)) / 60.0
    }

    fn refilled(&self) -> MutexGuard<'_, Bucket> {
        let mut bucket = self.bucket.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            bucket.tokens = (bucket.tokens + elapsed * self.per_second()).min(self.capacity());
            bucket.last_refill = now;
        }
        bucket
    }

    /// Takes one token, waiting for the bucket to refill if it is empty.
    pub async fn acquire(&self) {
        if !self.config.enabled {
            return;
        }
        loop {
            let wait = {
                let mut bucket = self.refilled();
                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return;
                }
                Duration::from_secs_f64((1.0 - bucket.tokens) / self.per_second())
            };
            debug!(wait_ms = wait.as_millis() as u64, "Rate limit reached, waiting for a token");
            tokio::time::sleep(wait).await;
        }
    }

    /// Takes one token if available. Returns false when the bucket is empty.
    pub fn try_acquire(&self) -> bool {
        if !self.config.enabled {
            return true;
        }
        let mut bucket = self.refilled();
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Whole tokens currently available.
    pub fn available_tokens(&self) -> u32 {
        self.refilled().tokens.floor() as u32
    }

    /// Refills the bucket to full burst capacity.
    pub fn reset(&self) {
        let mut bucket = self.bucket.lock().unwrap_or_else(PoisonError::into_inner);
        bucket.tokens = self.capacity();
        bucket.last_refill = Instant::now();
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_rate_limit_config_default() {
        let config = RateLimitConfig::default();
        assert_eq!(config.requests_per_minute, 100);
        assert_eq!(config.burst_size, 10);
        assert!(config.enabled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_try_acquire_exceeds_burst() {
        let limiter = RateLimiter::new(RateLimitConfig::new(60, 5));
        for _ in 0..5 {
            assert!(limiter.try_acquire());
        }
        assert!(!limiter.try_acquire());
        assert_eq!(limiter.available_tokens(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_over_time() {
        let limiter = RateLimiter::new(RateLimitConfig::new(60, 5));
        for _ in 0..5 {
            limiter.try_acquire();
        }
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(limiter.available_tokens(), 2);
        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(limiter.available_tokens(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_instead_of_failing() {
        let limiter = RateLimiter::new(RateLimitConfig::new(60, 2));
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(10));

        limiter.acquire().await;
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(990), "waited {waited:?}");
        assert!(waited <= Duration::from_millis(1100), "waited {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_never_waits() {
        let limiter = RateLimiter::new(RateLimitConfig::disabled());
        let start = Instant::now();
        for _ in 0..1000 {
            limiter.acquire().await;
        }
        assert!(limiter.try_acquire());
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset() {
        let limiter = RateLimiter::new(RateLimitConfig::new(60, 3));
        for _ in 0..3 {
            assert!(limiter.try_acquire());
        }
        limiter.reset();
        assert_eq!(limiter.available_tokens(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_acquire_all_complete() {
        let limiter = Arc::new(RateLimiter::new(RateLimitConfig::new(600, 5)));
        let acquired = Arc::new(AtomicU32::new(0));
        let start = Instant::now();
        let mut handles = Vec::new();

        for _ in 0..10 {
            let limiter = Arc::clone(&limiter);
            let acquired = Arc::clone(&acquired);
            handles.push(tokio::spawn(async move {
                limiter.acquire().await;
                acquired.fetch_add(1, Ordering::Relaxed);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(acquired.load(Ordering::Relaxed), 10);
        // Five beyond the burst at ten per second.
        assert!(start.elapsed() >= Duration::from_millis(490));
    }
}
