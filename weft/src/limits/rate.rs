//! Per-provider token buckets.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use project_config::RateLimitConfig;

/// Outcome of an acquisition attempt.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Acquire {
    Ok,
    /// Earliest time (ms) at which the bucket will hold enough tokens.
    Wait { ms: u64 },
}

struct Bucket {
    capacity: f64,
    refill_per_second: f64,
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_second).min(self.capacity);
        self.last_refill = now;
    }
}

/// Token-bucket rate limiter keyed by provider name. Providers without a
/// configured bucket are unlimited.
#[derive(Clone, Default)]
pub struct RateLimiter {
    buckets: Arc<Mutex<HashMap<String, Bucket>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(limits: &HashMap<String, RateLimitConfig>) -> Self {
        let limiter = Self::new();
        for (provider, cfg) in limits {
            limiter.configure(provider, cfg.capacity, cfg.refill_per_second);
        }
        limiter
    }

    pub fn configure(&self, provider: &str, capacity: f64, refill_per_second: f64) {
        let mut buckets = self.buckets.lock().unwrap();
        buckets.insert(
            provider.to_string(),
            Bucket {
                capacity,
                refill_per_second: refill_per_second.max(f64::EPSILON),
                tokens: capacity,
                last_refill: Instant::now(),
            },
        );
    }

    /// Deducts `cost` tokens if available, else reports the earliest refill.
    pub fn acquire(&self, provider: &str, cost: f64) -> Acquire {
        let mut buckets = self.buckets.lock().unwrap();
        let Some(bucket) = buckets.get_mut(provider) else {
            return Acquire::Ok;
        };
        bucket.refill(Instant::now());
        if bucket.tokens >= cost {
            bucket.tokens -= cost;
            return Acquire::Ok;
        }
        let missing = cost - bucket.tokens;
        let ms = (missing / bucket.refill_per_second * 1000.0).ceil() as u64;
        Acquire::Wait { ms: ms.max(1) }
    }

    /// Refills a provider's bucket to capacity (tests and per-team resets).
    pub fn reset(&self, provider: &str) {
        let mut buckets = self.buckets.lock().unwrap();
        if let Some(bucket) = buckets.get_mut(provider) {
            bucket.tokens = bucket.capacity;
            bucket.last_refill = Instant::now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconfigured_provider_is_unlimited() {
        let limiter = RateLimiter::new();
        assert_eq!(limiter.acquire("anthropic", 1e9), Acquire::Ok);
    }

    #[test]
    fn exhaustion_reports_wait_with_refill_estimate() {
        let limiter = RateLimiter::new();
        limiter.configure("zai", 10.0, 10.0);
        assert_eq!(limiter.acquire("zai", 10.0), Acquire::Ok);
        match limiter.acquire("zai", 5.0) {
            Acquire::Wait { ms } => {
                // 5 tokens at 10/s is about half a second.
                assert!((1..=600).contains(&ms), "unexpected wait: {ms}");
            }
            Acquire::Ok => panic!("bucket should be empty"),
        }
    }

    #[test]
    fn reset_refills_to_capacity() {
        let limiter = RateLimiter::new();
        limiter.configure("zai", 10.0, 0.001);
        assert_eq!(limiter.acquire("zai", 10.0), Acquire::Ok);
        limiter.reset("zai");
        assert_eq!(limiter.acquire("zai", 10.0), Acquire::Ok);
    }
}
