//! Semantic embeddings for near-duplicate detection. A remote
//! OpenAI-compatible provider is optional; every call degrades to a
//! deterministic hash-derived pseudo-vector on failure or timeout so the
//! pipeline never stalls on an embedding outage.

use crate::domain::error::{AppError, Result};
use crate::domain::llm_config::LLMConfig;
use crate::shared::hashing::hash_value;
use crate::shared::ttl_cache::TtlCache;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

pub const EMBEDDING_DIM: usize = 384;

const EMBED_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_CONCURRENT_EMBEDS: usize = 4;
const CACHE_TTL: Duration = Duration::from_secs(86400);

#[async_trait]
pub trait EmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

pub type SharedEmbeddingProvider = Arc<dyn EmbeddingProvider + Send + Sync>;

#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    model: String,
    input: String,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Remote provider against an OpenAI-compatible `/embeddings` endpoint.
pub struct RemoteEmbeddingProvider {
    client: reqwest::Client,
    config: LLMConfig,
}

impl RemoteEmbeddingProvider {
    pub fn new(config: LLMConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for RemoteEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = if self.config.base_url.ends_with('/') {
            format!("{}embeddings", self.config.base_url)
        } else {
            format!("{}/embeddings", self.config.base_url)
        };

        let request = EmbeddingRequest {
            model: self.config.model.clone(),
            input: text.to_string(),
        };

        let mut req = self.client.post(&url).json(&request);
        if let Some(api_key) = &self.config.api_key {
            req = req.bearer_auth(api_key);
        }

        let response = req
            .send()
            .await
            .map_err(|e| AppError::LLMError(format!("Embedding request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::LLMError(format!(
                "Embedding API error ({}): {}",
                status, text
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| AppError::LLMError(format!("Failed to parse embedding JSON: {}", e)))?;

        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AppError::LLMError("Empty embedding response".to_string()))
    }
}

/// Front of the embedding stack: per-text cache, per-call timeout, bounded
/// concurrency for batches, unit normalization of every returned vector.
pub struct EmbeddingService {
    provider: Option<SharedEmbeddingProvider>,
    cache: Mutex<TtlCache<Vec<f32>>>,
    timeout: Duration,
}

impl EmbeddingService {
    pub fn new(provider: SharedEmbeddingProvider) -> Self {
        Self {
            provider: Some(provider),
            cache: Mutex::new(TtlCache::new(1024, CACHE_TTL)),
            timeout: EMBED_TIMEOUT,
        }
    }

    /// Pure-local service: every embedding comes from the deterministic
    /// fallback. Used when no embedding endpoint is configured.
    pub fn local_only() -> Self {
        Self {
            provider: None,
            cache: Mutex::new(TtlCache::new(1024, CACHE_TTL)),
            timeout: EMBED_TIMEOUT,
        }
    }

    pub async fn embed(&self, text: &str) -> Vec<f32> {
        let key = hash_value(text);
        if let Some(cached) = self.lock_cache().get(&key) {
            debug!("Embedding cache hit");
            return cached;
        }

        let vector = match &self.provider {
            Some(provider) => {
                match tokio::time::timeout(self.timeout, provider.embed(text)).await {
                    Ok(Ok(vector)) => normalize(vector),
                    Ok(Err(err)) => {
                        warn!(error = %err, "Embedding call failed, using fallback");
                        fallback_embedding(text)
                    }
                    Err(_) => {
                        warn!("Embedding call timed out, using fallback");
                        fallback_embedding(text)
                    }
                }
            }
            None => fallback_embedding(text),
        };

        self.lock_cache().put(key, vector.clone());
        vector
    }

    /// Embed a batch with bounded concurrency, preserving input order.
    pub async fn embed_all(self: Arc<Self>, texts: &[String]) -> Vec<Vec<f32>> {
        let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_EMBEDS));
        let mut set = JoinSet::new();
        for (index, text) in texts.iter().enumerate() {
            let service = Arc::clone(&self);
            let semaphore = Arc::clone(&semaphore);
            let text = text.clone();
            set.spawn(async move {
                // Semaphore is never closed while the set is alive.
                let _permit = semaphore.acquire_owned().await;
                (index, service.embed(&text).await)
            });
        }

        let mut vectors = vec![Vec::new(); texts.len()];
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, vector)) => vectors[index] = vector,
                Err(err) => warn!(error = %err, "Embedding task panicked"),
            }
        }
        for (vector, text) in vectors.iter_mut().zip(texts) {
            if vector.is_empty() {
                *vector = fallback_embedding(text);
            }
        }
        vectors
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, TtlCache<Vec<f32>>> {
        match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Deterministic unit-norm pseudo-vector derived from the SHA-256 digest of
/// the text. No semantic meaning, but identical texts always map to the same
/// vector so dedup stays stable across runs.
pub fn fallback_embedding(text: &str) -> Vec<f32> {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    let bytes = digest.as_slice();

    let mut vector = Vec::with_capacity(EMBEDDING_DIM);
    for i in 0..EMBEDDING_DIM {
        let a = bytes[i % bytes.len()] as f32;
        let b = bytes[(i + 1) % bytes.len()] as f32;
        vector.push((a + b * 256.0) / 65535.0);
    }
    normalize(vector)
}

pub fn normalize(mut vector: Vec<f32>) -> Vec<f32> {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut vector {
            *value /= norm;
        }
    }
    vector
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for CountingProvider {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(fallback_embedding(&format!("remote:{}", text)))
        }
    }

    #[test]
    fn test_fallback_is_unit_norm() {
        let vector = fallback_embedding("def test_a(): pass");
        assert_eq!(vector.len(), EMBEDDING_DIM);
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_fallback_is_deterministic() {
        assert_eq!(fallback_embedding("same text"), fallback_embedding("same text"));
        assert_ne!(fallback_embedding("text a"), fallback_embedding("text b"));
    }

    #[test]
    fn test_cosine_similarity_bounds() {
        let a = fallback_embedding("alpha");
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-5);
        let b = fallback_embedding("beta");
        let sim = cosine_similarity(&a, &b);
        assert!((-1.0..=1.0).contains(&sim));
        assert_eq!(cosine_similarity(&a, &[]), 0.0);
    }

    #[tokio::test]
    async fn test_provider_vectors_are_unit_norm() {
        let service = Arc::new(EmbeddingService::new(Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
        })));
        let vector = service.embed("some test code").await;
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_cache_prevents_second_provider_call() {
        let provider = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
        });
        let service = Arc::new(EmbeddingService::new(provider.clone()));
        let first = service.embed("same input").await;
        let second = service.embed("same input").await;
        assert_eq!(first, second);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_embed_all_preserves_order() {
        let service = Arc::new(EmbeddingService::local_only());
        let texts = vec!["one".to_string(), "two".to_string(), "three".to_string()];
        let vectors = service.clone().embed_all(&texts).await;
        assert_eq!(vectors.len(), 3);
        for (vector, text) in vectors.iter().zip(&texts) {
            assert_eq!(vector, &fallback_embedding(text));
        }
    }
}
