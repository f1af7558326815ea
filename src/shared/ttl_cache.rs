use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Clone)]
struct CacheEntry<V> {
    value: V,
    created_at: Instant,
}

/// Small LRU cache with TTL, shared by the completion cache and both
/// LLM-adjudication caches. Callers wrap it in a mutex; the cache itself is
/// single-threaded state.
pub struct TtlCache<V> {
    cache: HashMap<String, CacheEntry<V>>,
    max_size: usize,
    ttl: Duration,
    access_order: Vec<String>,
    hits: usize,
    misses: usize,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self {
            cache: HashMap::new(),
            max_size,
            ttl,
            access_order: Vec::new(),
            hits: 0,
            misses: 0,
        }
    }

    pub fn get(&mut self, key: &str) -> Option<V> {
        let valid = self
            .cache
            .get(key)
            .map(|entry| entry.created_at.elapsed() < self.ttl)
            .unwrap_or(false);

        if valid {
            self.hits += 1;
            self.touch(key);
            self.cache.get(key).map(|entry| entry.value.clone())
        } else {
            self.misses += 1;
            if self.cache.remove(key).is_some() {
                self.access_order.retain(|k| k != key);
            }
            None
        }
    }

    pub fn put(&mut self, key: impl Into<String>, value: V) {
        let key = key.into();
        while self.cache.len() >= self.max_size && !self.access_order.is_empty() {
            let oldest = self.access_order.remove(0);
            self.cache.remove(&oldest);
        }
        self.cache.insert(
            key.clone(),
            CacheEntry {
                value,
                created_at: Instant::now(),
            },
        );
        self.access_order.retain(|k| k != &key);
        self.access_order.push(key);
    }

    pub fn stats(&self) -> (usize, usize) {
        (self.hits, self.misses)
    }

    fn touch(&mut self, key: &str) {
        self.access_order.retain(|k| k != key);
        self.access_order.push(key.to_string());
    }
}
