pub mod memory;
pub mod qdrant;
pub mod weaviate;

use crate::application::use_cases::embedding_service::EmbeddingService;
use crate::domain::error::Result;
use crate::domain::models::{ScoredStory, ScoredTestCase, TestCase, UserStory};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

pub const USER_STORIES_COLLECTION: &str = "user_stories";
pub const TEST_CASES_COLLECTION: &str = "test_cases";

/// Uniform store/retrieve interface over interchangeable vector engines.
/// Backends differ in performance and score scale, never in this contract:
/// lazy embedding of un-embedded entities, idempotent collection bootstrap,
/// score-descending results, and self-match suppression.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Upsert a story, embedding it first if needed. Returns the story ID.
    async fn store_user_story(&self, story: &mut UserStory) -> Result<String>;

    /// Upsert a test case, assigning a local UUID and embedding as needed.
    /// Returns the (possibly newly assigned) test case ID.
    async fn store_test_case(&self, test_case: &mut TestCase) -> Result<String>;

    /// Top-`limit` stories nearest the query story, most similar first.
    /// Never contains the query story itself.
    async fn find_similar_stories(
        &self,
        story: &UserStory,
        limit: usize,
    ) -> Result<Vec<ScoredStory>>;

    /// Top-`limit` test cases nearest the query story, most similar first.
    async fn find_similar_test_cases(
        &self,
        story: &UserStory,
        limit: usize,
    ) -> Result<Vec<ScoredTestCase>>;

    async fn health_check(&self) -> bool;
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VectorBackend {
    Qdrant,
    Weaviate,
    Memory,
}

/// Build the configured backend. Bootstrap (collection/schema creation) runs
/// here, so a returned store is ready for use.
pub async fn build_vector_store(
    backend: VectorBackend,
    url: &str,
    embedding: Arc<EmbeddingService>,
) -> Result<Arc<dyn VectorStore>> {
    match backend {
        VectorBackend::Qdrant => Ok(Arc::new(
            qdrant::QdrantStore::connect(url, embedding).await?,
        )),
        VectorBackend::Weaviate => Ok(Arc::new(
            weaviate::WeaviateStore::connect(url, embedding).await?,
        )),
        VectorBackend::Memory => Ok(Arc::new(memory::MemoryStore::new(embedding))),
    }
}

/// Deterministic point ID derived from entity identity, so repeated stores
/// of the same entity upsert rather than duplicate.
pub(crate) fn point_id(entity_id: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, entity_id.as_bytes())
}

/// Lazy embedding: the store computes a missing story embedding, never the
/// caller.
pub(crate) async fn ensure_story_embedding(
    embedding: &EmbeddingService,
    story: &mut UserStory,
) -> Result<Vec<f32>> {
    if let Some(vector) = &story.embedding {
        return Ok(vector.clone());
    }
    let vector = embedding
        .embed_user_story(&story.title, &story.description)
        .await?;
    story.embedding = Some(vector.clone());
    Ok(vector)
}

/// Lazy ID assignment plus embedding for a test case.
pub(crate) async fn ensure_test_case_ready(
    embedding: &EmbeddingService,
    test_case: &mut TestCase,
) -> Result<Vec<f32>> {
    if test_case.test_case_id.is_none() {
        test_case.test_case_id = Some(Uuid::new_v4().to_string());
    }
    if let Some(vector) = &test_case.embedding {
        return Ok(vector.clone());
    }
    let vector = embedding
        .embed_test_case(
            &test_case.title,
            &test_case.description,
            &test_case.steps_text(),
            test_case.expected_result(),
        )
        .await?;
    test_case.embedding = Some(vector.clone());
    Ok(vector)
}
