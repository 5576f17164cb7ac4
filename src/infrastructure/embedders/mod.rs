pub mod local;
pub mod openai;

use crate::domain::error::Result;
use crate::domain::llm_config::{EmbeddingConfig, EmbeddingProvider};
use async_trait::async_trait;
use local::LocalEmbedder;
use openai::OpenAiEmbedder;
use std::sync::Arc;

/// A pluggable embedding backend. Implementations are hot-swappable by
/// configuration; callers never branch on the provider.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Batch call; result order matches input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

pub fn build_embedding_backend(config: &EmbeddingConfig) -> Arc<dyn EmbeddingBackend> {
    match config.provider {
        EmbeddingProvider::Remote => Arc::new(OpenAiEmbedder::new(config.clone())),
        EmbeddingProvider::Local => Arc::new(LocalEmbedder::new(config.clone())),
    }
}
