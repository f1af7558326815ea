//! Token-bucket rate limiting keyed by client identity. Refill and
//! consumption happen under one lock per check so concurrent callers can
//! never observe a stale token count and over-consume.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Sustained request rate; refill is `requests_per_minute / 60` tokens
    /// per second.
    pub requests_per_minute: f64,
    /// Bucket capacity, i.e. the largest allowed burst.
    pub burst: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 60.0,
            burst: 10.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RateLimitDecision {
    Allowed,
    Limited { retry_after_seconds: f64 },
}

impl RateLimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitDecision::Allowed)
    }
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

pub struct TokenBucketLimiter {
    config: RateLimitConfig,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl TokenBucketLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn try_acquire(&self, key: &str) -> RateLimitDecision {
        let now = Instant::now();
        let rate = self.config.requests_per_minute / 60.0;
        let mut buckets = match self.buckets.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let bucket = buckets.entry(key.to_string()).or_insert(Bucket {
            tokens: self.config.burst,
            last_refill: now,
        });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * rate).min(self.config.burst);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            RateLimitDecision::Allowed
        } else {
            let retry_after_seconds = (1.0 - bucket.tokens) / rate;
            debug!(key, retry_after_seconds, "Rate limit exceeded");
            RateLimitDecision::Limited {
                retry_after_seconds,
            }
        }
    }

    /// Drop buckets that have been idle long enough to be full again.
    pub fn cleanup(&self) {
        let rate = self.config.requests_per_minute / 60.0;
        let idle_secs = self.config.burst / rate;
        let now = Instant::now();
        let mut buckets = match self.buckets.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        buckets.retain(|_, bucket| now.duration_since(bucket.last_refill).as_secs_f64() < idle_secs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_then_limited() {
        let limiter = TokenBucketLimiter::new(RateLimitConfig {
            requests_per_minute: 60.0,
            burst: 3.0,
        });
        assert!(limiter.try_acquire("client").is_allowed());
        assert!(limiter.try_acquire("client").is_allowed());
        assert!(limiter.try_acquire("client").is_allowed());
        match limiter.try_acquire("client") {
            RateLimitDecision::Limited {
                retry_after_seconds,
            } => assert!(retry_after_seconds > 0.0),
            RateLimitDecision::Allowed => panic!("fourth request should be limited"),
        }
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = TokenBucketLimiter::new(RateLimitConfig {
            requests_per_minute: 60.0,
            burst: 1.0,
        });
        assert!(limiter.try_acquire("a").is_allowed());
        assert!(!limiter.try_acquire("a").is_allowed());
        assert!(limiter.try_acquire("b").is_allowed());
    }

    #[test]
    fn test_cleanup_drops_full_buckets() {
        let limiter = TokenBucketLimiter::new(RateLimitConfig {
            requests_per_minute: 60_000.0,
            burst: 1.0,
        });
        assert!(limiter.try_acquire("client").is_allowed());
        // At 1000 tokens/s the bucket is full again almost immediately.
        std::thread::sleep(std::time::Duration::from_millis(10));
        limiter.cleanup();
        assert!(limiter.buckets.lock().unwrap().is_empty());
    }

    #[test]
    fn test_refill_restores_tokens() {
        let limiter = TokenBucketLimiter::new(RateLimitConfig {
            requests_per_minute: 60_000.0,
            burst: 1.0,
        });
        assert!(limiter.try_acquire("client").is_allowed());
        assert!(!limiter.try_acquire("client").is_allowed());
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert!(limiter.try_acquire("client").is_allowed());
    }
}
