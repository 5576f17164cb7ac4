use super::EmbeddingBackend;
use crate::domain::error::{AppError, Result};
use crate::domain::llm_config::EmbeddingConfig;
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::sync::Mutex;
use tracing::info;

/// Local embedding backend. The model is loaded lazily on first use and
/// kept for the lifetime of the backend.
pub struct LocalEmbedder {
    config: EmbeddingConfig,
    embedder: Mutex<Option<TextEmbedding>>,
}

impl LocalEmbedder {
    pub fn new(config: EmbeddingConfig) -> Self {
        Self {
            config,
            embedder: Mutex::new(None),
        }
    }

    fn resolve_model(model: &str) -> EmbeddingModel {
        match model.trim().to_lowercase().as_str() {
            "all-minilm-l6-v2" => EmbeddingModel::AllMiniLML6V2,
            _ => EmbeddingModel::AllMiniLML6V2,
        }
    }

    fn embed_sync(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let mut guard = self
            .embedder
            .lock()
            .map_err(|_| AppError::Internal("Local embedder lock poisoned".to_string()))?;
        if guard.is_none() {
            info!(model = %self.config.model, "loading local embedding model");
            let mut options = InitOptions::default();
            options.model_name = Self::resolve_model(&self.config.model);
            let embedder = TextEmbedding::try_new(options).map_err(|e| {
                AppError::EmbeddingError(format!("Failed to init local embedder: {}", e))
            })?;
            *guard = Some(embedder);
        }
        let embedder = guard
            .as_mut()
            .ok_or_else(|| AppError::EmbeddingError("Local embedder unavailable".to_string()))?;
        let embeddings = embedder
            .embed(texts, None)
            .map_err(|e| AppError::EmbeddingError(format!("Failed to embed text: {}", e)))?;
        Ok(embeddings)
    }
}

#[async_trait]
impl EmbeddingBackend for LocalEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let embeddings = self.embed_sync(vec![text.to_string()])?;
        let embedding = embeddings
            .into_iter()
            .next()
            .ok_or_else(|| AppError::EmbeddingError("Empty embedding response".to_string()))?;
        if embedding.is_empty() {
            return Err(AppError::EmbeddingError(
                "Empty embedding response".to_string(),
            ));
        }
        Ok(embedding)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.embed_sync(texts.to_vec())
    }
}
