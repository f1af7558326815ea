use super::{LLMClient, SharedLLMClient};
use crate::domain::error::{AppError, Result};
use crate::domain::llm_config::LLMConfig;
use crate::shared::hashing::completion_cache_key;
use crate::shared::ttl_cache::TtlCache;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};

const CACHE_SIZE: usize = 256;
const CACHE_TTL: Duration = Duration::from_secs(3600);

/// Wraps any [`LLMClient`] with a completion cache keyed by
/// hash(system + prompt + model), plus bounded retry with doubling backoff
/// on rate-limit responses. Non-429 errors fail fast.
pub struct CachedLLMClient {
    inner: SharedLLMClient,
    cache: Mutex<TtlCache<String>>,
    max_attempts: u32,
    base_delay: Duration,
}

impl CachedLLMClient {
    pub fn new(inner: SharedLLMClient) -> Self {
        Self::with_backoff(inner, 3, Duration::from_secs(1))
    }

    pub fn with_backoff(inner: SharedLLMClient, max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            inner,
            cache: Mutex::new(TtlCache::new(CACHE_SIZE, CACHE_TTL)),
            max_attempts,
            base_delay,
        }
    }

    pub async fn generate(&self, config: &LLMConfig, system: &str, user: &str) -> Result<String> {
        let key = completion_cache_key(system, user, &config.model);
        if let Some(cached) = self.lock_cache().get(&key) {
            debug!(model = %config.model, "Completion cache hit");
            return Ok(cached);
        }

        let mut delay = self.base_delay;
        let mut last_error = AppError::LLMError("No attempts made".to_string());
        for attempt in 1..=self.max_attempts {
            match self.inner.generate(config, system, user).await {
                Ok(content) => {
                    self.lock_cache().put(key, content.clone());
                    return Ok(content);
                }
                Err(err) if is_rate_limited(&err) && attempt < self.max_attempts => {
                    warn!(attempt, delay_ms = delay.as_millis() as u64, "Rate limited, backing off");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    last_error = err;
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_error)
    }

    pub fn cache_stats(&self) -> (usize, usize) {
        self.lock_cache().stats()
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, TtlCache<String>> {
        match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn is_rate_limited(err: &AppError) -> bool {
    matches!(err, AppError::LLMError(msg) if msg.contains("429"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingClient {
        calls: AtomicUsize,
        fail_first: usize,
    }

    #[async_trait]
    impl LLMClient for CountingClient {
        async fn generate(&self, _: &LLMConfig, _: &str, user: &str) -> Result<String> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                return Err(AppError::LLMError("Rate limited (429)".to_string()));
            }
            Ok(format!("echo: {}", user))
        }
    }

    fn client(fail_first: usize) -> (Arc<CountingClient>, CachedLLMClient) {
        let inner = Arc::new(CountingClient {
            calls: AtomicUsize::new(0),
            fail_first,
        });
        let cached = CachedLLMClient::with_backoff(inner.clone(), 3, Duration::ZERO);
        (inner, cached)
    }

    #[tokio::test]
    async fn test_second_call_served_from_cache() {
        let (inner, cached) = client(0);
        let config = LLMConfig::default();
        let first = cached.generate(&config, "sys", "prompt").await.unwrap();
        let second = cached.generate(&config, "sys", "prompt").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_on_rate_limit() {
        let (inner, cached) = client(2);
        let config = LLMConfig::default();
        let result = cached.generate(&config, "sys", "prompt").await.unwrap();
        assert_eq!(result, "echo: prompt");
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let (inner, cached) = client(10);
        let config = LLMConfig::default();
        assert!(cached.generate(&config, "sys", "prompt").await.is_err());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_rate_limit_error_fails_fast() {
        struct FailingClient;

        #[async_trait]
        impl LLMClient for FailingClient {
            async fn generate(&self, _: &LLMConfig, _: &str, _: &str) -> Result<String> {
                Err(AppError::LLMError("API error (500): boom".to_string()))
            }
        }

        let cached = CachedLLMClient::with_backoff(Arc::new(FailingClient), 3, Duration::ZERO);
        let config = LLMConfig::default();
        assert!(cached.generate(&config, "sys", "prompt").await.is_err());
    }
}
