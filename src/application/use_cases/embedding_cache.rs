use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use tracing::debug;

/// In-memory cache mapping text to its embedding vector, keyed by a content
/// hash. Eviction is FIFO on insertion order (oldest inserted key goes
/// first, not least-recently-used); call sites depend on that policy.
pub struct EmbeddingCache {
    cache: HashMap<String, Vec<f32>>,
    insertion_order: VecDeque<String>,
    max_size: usize,
    hits: usize,
    misses: usize,
}

impl EmbeddingCache {
    pub fn new(max_size: usize) -> Self {
        Self {
            cache: HashMap::new(),
            insertion_order: VecDeque::new(),
            max_size,
            hits: 0,
            misses: 0,
        }
    }

    fn cache_key(text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn get(&mut self, text: &str) -> Option<Vec<f32>> {
        let key = Self::cache_key(text);
        match self.cache.get(&key) {
            Some(embedding) => {
                self.hits += 1;
                debug!(key = %key, "embedding cache hit");
                Some(embedding.clone())
            }
            None => {
                self.misses += 1;
                debug!(key = %key, "embedding cache miss");
                None
            }
        }
    }

    pub fn set(&mut self, text: &str, embedding: Vec<f32>) {
        let key = Self::cache_key(text);

        if self.cache.contains_key(&key) {
            // Update in place; insertion order is unchanged.
            self.cache.insert(key, embedding);
            return;
        }

        if self.cache.len() >= self.max_size {
            if let Some(oldest) = self.insertion_order.pop_front() {
                self.cache.remove(&oldest);
                debug!("embedding cache full, evicted oldest entry");
            }
        }

        self.cache.insert(key.clone(), embedding);
        self.insertion_order.push_back(key);
    }

    pub fn stats(&self) -> CacheStats {
        let total = self.hits + self.misses;
        let hit_rate = if total > 0 {
            self.hits as f32 / total as f32
        } else {
            0.0
        };
        CacheStats {
            size: self.cache.len(),
            max_size: self.max_size,
            hits: self.hits,
            misses: self.misses,
            hit_rate,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub hits: usize,
    pub misses: usize,
    pub hit_rate: f32,
}
