use crate::application::use_cases::embedding_cache::{CacheStats, EmbeddingCache};
use crate::domain::error::{AppError, Result};
use crate::infrastructure::embedders::EmbeddingBackend;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);
const RETRY_MAX_DELAY: Duration = Duration::from_secs(10);

/// Produces fixed-dimension vectors for arbitrary text. Fronts the backend
/// with a content-addressed cache, retries connection-class failures with
/// exponential backoff, and degrades to zero-vectors instead of failing a
/// whole batch.
pub struct EmbeddingService {
    backend: Arc<dyn EmbeddingBackend>,
    cache: Arc<Mutex<EmbeddingCache>>,
    dimensions: usize,
    batch_size: usize,
    retry_attempts: u32,
}

impl EmbeddingService {
    /// Smoke-tests the backend before accepting it: a failing call or a
    /// vector of the wrong dimension rejects construction.
    pub async fn new(
        backend: Arc<dyn EmbeddingBackend>,
        dimensions: usize,
        cache_size: usize,
        batch_size: usize,
        retry_attempts: u32,
    ) -> Result<Self> {
        let test_embedding = backend
            .embed("Test embedding model initialization")
            .await
            .map_err(|e| {
                error!(error = %e, "embedding backend smoke test failed");
                e
            })?;
        if test_embedding.len() != dimensions {
            error!(
                got = test_embedding.len(),
                expected = dimensions,
                "embedding dimension mismatch"
            );
            return Err(AppError::EmbeddingError(format!(
                "Embedding dimension mismatch: got {}, expected {}",
                test_embedding.len(),
                dimensions
            )));
        }
        info!(dimensions, "embedding service initialized");

        Ok(Self {
            backend,
            cache: Arc::new(Mutex::new(EmbeddingCache::new(cache_size))),
            dimensions,
            batch_size: batch_size.max(1),
            retry_attempts: retry_attempts.max(1),
        })
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn cache_get(&self, text: &str) -> Option<Vec<f32>> {
        self.cache.lock().ok().and_then(|mut cache| cache.get(text))
    }

    fn cache_set(&self, text: &str, embedding: Vec<f32>) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.set(text, embedding);
        }
    }

    async fn embed_with_retry(&self, text: &str) -> Result<Vec<f32>> {
        let mut delay = RETRY_BASE_DELAY;
        let mut attempt = 1;
        loop {
            match self.backend.embed(text).await {
                Ok(embedding) => return Ok(embedding),
                Err(err) if err.is_transient() && attempt < self.retry_attempts => {
                    warn!(attempt, error = %err, "transient embedding failure, retrying");
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(RETRY_MAX_DELAY);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Embed a single text, consulting the cache first.
    pub async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(cached) = self.cache_get(text) {
            return Ok(cached);
        }
        let embedding = self.embed_with_retry(text).await?;
        self.cache_set(text, embedding.clone());
        Ok(embedding)
    }

    /// Process one sub-batch: cache hits are filled in place, misses go to
    /// the backend's batch call, and a failing batch falls back to per-item
    /// calls. Items that still fail become zero-vectors.
    async fn embed_chunk(&self, texts: &[String]) -> Vec<Vec<f32>> {
        let mut results: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut miss_texts = Vec::new();
        let mut miss_indices = Vec::new();

        for (i, text) in texts.iter().enumerate() {
            match self.cache_get(text) {
                Some(cached) => results[i] = Some(cached),
                None => {
                    miss_texts.push(text.clone());
                    miss_indices.push(i);
                }
            }
        }

        if !miss_texts.is_empty() {
            match self.backend.embed_batch(&miss_texts).await {
                Ok(embeddings) => {
                    for (idx, embedding) in miss_indices.iter().zip(embeddings) {
                        self.cache_set(&texts[*idx], embedding.clone());
                        results[*idx] = Some(embedding);
                    }
                }
                Err(err) => {
                    warn!(error = %err, "batch embedding failed, falling back to per-item calls");
                    for idx in &miss_indices {
                        match self.embed_text(&texts[*idx]).await {
                            Ok(embedding) => results[*idx] = Some(embedding),
                            Err(inner) => {
                                error!(index = idx, error = %inner, "individual embedding failed, using zero vector");
                                results[*idx] = Some(vec![0.0; self.dimensions]);
                            }
                        }
                    }
                }
            }
        }

        results
            .into_iter()
            .map(|slot| slot.unwrap_or_else(|| vec![0.0; self.dimensions]))
            .collect()
    }

    /// Embed many texts, order-preserving. Sub-batches run as parallel
    /// tasks; no item failure fails the whole call (degrade-not-fail).
    pub async fn embed_texts(self: &Arc<Self>, texts: &[String]) -> Vec<Vec<f32>> {
        if texts.is_empty() {
            return Vec::new();
        }

        let mut handles: Vec<JoinHandle<Vec<Vec<f32>>>> = Vec::new();
        for chunk in texts.chunks(self.batch_size) {
            let service = Arc::clone(self);
            let chunk = chunk.to_vec();
            handles.push(tokio::spawn(
                async move { service.embed_chunk(&chunk).await },
            ));
        }

        let mut results = Vec::with_capacity(texts.len());
        for (chunk_no, handle) in handles.into_iter().enumerate() {
            match handle.await {
                Ok(chunk_results) => results.extend(chunk_results),
                Err(err) => {
                    error!(chunk = chunk_no, error = %err, "embedding worker panicked, filling zero vectors");
                    let start = chunk_no * self.batch_size;
                    let len = self.batch_size.min(texts.len() - start);
                    results.extend(std::iter::repeat(vec![0.0; self.dimensions]).take(len));
                }
            }
        }
        results
    }

    /// Canonical user-story template. Identical content always produces the
    /// same text and thus the same cache entry, regardless of caller.
    pub async fn embed_user_story(&self, title: &str, description: &str) -> Result<Vec<f32>> {
        let full_text = format!("Title: {}\nDescription: {}", title, description);
        self.embed_text(&full_text).await
    }

    /// Canonical test-case template, always in the same field order.
    pub async fn embed_test_case(
        &self,
        title: &str,
        description: &str,
        steps_text: &str,
        expected_result: &str,
    ) -> Result<Vec<f32>> {
        let full_text = format!(
            "Title: {}\nDescription: {}\nSteps: {}\nExpected Result: {}",
            title, description, steps_text, expected_result
        );
        self.embed_text(&full_text).await
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache
            .lock()
            .map(|cache| cache.stats())
            .unwrap_or(CacheStats {
                size: 0,
                max_size: 0,
                hits: 0,
                misses: 0,
                hit_rate: 0.0,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const DIM: usize = 4;

    /// Deterministic fake backend: vector derived from text length. Can be
    /// told to fail batch calls, or to fail everything for given texts.
    struct FakeBackend {
        fail_batch: bool,
        poison: HashSet<String>,
        single_calls: AtomicUsize,
        batch_calls: AtomicUsize,
    }

    impl FakeBackend {
        fn new() -> Self {
            Self {
                fail_batch: false,
                poison: HashSet::new(),
                single_calls: AtomicUsize::new(0),
                batch_calls: AtomicUsize::new(0),
            }
        }

        fn vector_for(text: &str) -> Vec<f32> {
            let n = text.len() as f32;
            vec![n, n + 1.0, n + 2.0, n + 3.0]
        }
    }

    #[async_trait]
    impl EmbeddingBackend for FakeBackend {
        async fn embed(&self, text: &str) -> crate::domain::error::Result<Vec<f32>> {
            self.single_calls.fetch_add(1, Ordering::SeqCst);
            if self.poison.contains(text) {
                return Err(AppError::EmbeddingError("poisoned".to_string()));
            }
            Ok(Self::vector_for(text))
        }

        async fn embed_batch(
            &self,
            texts: &[String],
        ) -> crate::domain::error::Result<Vec<Vec<f32>>> {
            self.batch_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_batch {
                return Err(AppError::EmbeddingError("batch down".to_string()));
            }
            Ok(texts.iter().map(|t| Self::vector_for(t)).collect())
        }
    }

    async fn service_with(backend: FakeBackend) -> Arc<EmbeddingService> {
        // "Test embedding model initialization" must not be poisoned for
        // construction to succeed.
        Arc::new(
            EmbeddingService::new(Arc::new(backend), DIM, 100, 2, 3)
                .await
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn construction_fails_on_dimension_mismatch() {
        let backend = Arc::new(FakeBackend::new());
        let result = EmbeddingService::new(backend, 999, 100, 2, 3).await;
        assert!(matches!(result, Err(AppError::EmbeddingError(_))));
    }

    #[tokio::test]
    async fn embed_text_hits_cache_on_second_call() {
        let service = service_with(FakeBackend::new()).await;
        let first = service.embed_text("hello").await.unwrap();
        let second = service.embed_text("hello").await.unwrap();
        assert_eq!(first, second);

        let stats = service.cache_stats();
        assert_eq!(stats.hits, 1);
    }

    #[tokio::test]
    async fn story_template_shares_cache_with_raw_text() {
        let service = service_with(FakeBackend::new()).await;
        service.embed_user_story("T", "D").await.unwrap();
        // Byte-identical canonical text must hit the same entry.
        service.embed_text("Title: T\nDescription: D").await.unwrap();

        let stats = service.cache_stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn embed_texts_preserves_input_order() {
        let service = service_with(FakeBackend::new()).await;
        // Seed the cache so the batch mixes hits and misses.
        service.embed_text("bb").await.unwrap();

        let texts: Vec<String> = vec!["a".into(), "bb".into(), "ccc".into(), "dddd".into()];
        let results = service.embed_texts(&texts).await;

        assert_eq!(results.len(), 4);
        for (text, result) in texts.iter().zip(&results) {
            assert_eq!(result, &FakeBackend::vector_for(text));
        }
    }

    #[tokio::test]
    async fn failed_items_degrade_to_zero_vectors() {
        let mut backend = FakeBackend::new();
        backend.fail_batch = true;
        backend.poison.insert("bad".to_string());
        let service = service_with(backend).await;

        let texts: Vec<String> = vec!["good".into(), "bad".into(), "fine".into()];
        let results = service.embed_texts(&texts).await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0], FakeBackend::vector_for("good"));
        assert_eq!(results[1], vec![0.0; DIM]);
        assert_eq!(results[2], FakeBackend::vector_for("fine"));
    }

    #[tokio::test]
    async fn non_transient_errors_are_not_retried() {
        let mut backend = FakeBackend::new();
        backend.poison.insert("bad".to_string());
        let backend = Arc::new(backend);
        let service = EmbeddingService::new(backend.clone(), DIM, 100, 2, 3)
            .await
            .unwrap();

        let err = service.embed_text("bad").await.unwrap_err();
        assert!(!err.is_transient());
        // One call for the construction smoke test, one single attempt for
        // the poisoned text.
        assert_eq!(backend.single_calls.load(Ordering::SeqCst), 2);
    }

    /// Fails a fixed number of calls with a connection-class error, then
    /// recovers. The construction smoke test always succeeds.
    struct FlakyBackend {
        remaining_failures: AtomicUsize,
        attempts: AtomicUsize,
    }

    impl FlakyBackend {
        fn new(failures: usize) -> Self {
            Self {
                remaining_failures: AtomicUsize::new(failures),
                attempts: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl EmbeddingBackend for FlakyBackend {
        async fn embed(&self, text: &str) -> crate::domain::error::Result<Vec<f32>> {
            if text == "Test embedding model initialization" {
                return Ok(FakeBackend::vector_for(text));
            }
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.remaining_failures.load(Ordering::SeqCst) > 0 {
                self.remaining_failures.fetch_sub(1, Ordering::SeqCst);
                return Err(AppError::Connection("connection reset".to_string()));
            }
            Ok(FakeBackend::vector_for(text))
        }

        async fn embed_batch(
            &self,
            texts: &[String],
        ) -> crate::domain::error::Result<Vec<Vec<f32>>> {
            let mut out = Vec::new();
            for t in texts {
                out.push(self.embed(t).await?);
            }
            Ok(out)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_retry_until_success() {
        let backend = Arc::new(FlakyBackend::new(2));
        let service = EmbeddingService::new(backend.clone(), DIM, 100, 2, 3)
            .await
            .unwrap();

        // Two connection failures burn two attempts, the third succeeds
        // (paused time makes the backoff sleeps instant).
        let result = service.embed_text("hello").await.unwrap();
        assert_eq!(result, FakeBackend::vector_for("hello"));
        assert_eq!(backend.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_budget_exhaustion_surfaces_the_error() {
        let backend = Arc::new(FlakyBackend::new(5));
        let service = EmbeddingService::new(backend.clone(), DIM, 100, 2, 3)
            .await
            .unwrap();

        let err = service.embed_text("hello").await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(backend.attempts.load(Ordering::SeqCst), 3);
    }
}
