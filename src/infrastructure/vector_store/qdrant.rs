use super::{
    ensure_story_embedding, ensure_test_case_ready, point_id, VectorStore,
    TEST_CASES_COLLECTION, USER_STORIES_COLLECTION,
};
use crate::application::use_cases::embedding_service::EmbeddingService;
use crate::domain::error::{AppError, Result};
use crate::domain::models::{ScoredStory, ScoredTestCase, TestCase, UserStory};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info};

#[derive(Deserialize)]
struct CollectionsResponse {
    result: CollectionsResult,
}

#[derive(Deserialize)]
struct CollectionsResult {
    collections: Vec<CollectionInfo>,
}

#[derive(Deserialize)]
struct CollectionInfo {
    name: String,
}

#[derive(Deserialize)]
struct SearchResponse {
    result: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct SearchHit {
    score: f32,
    payload: Value,
}

/// Qdrant backend over its REST API. Reports cosine similarity scores.
pub struct QdrantStore {
    client: Client,
    base_url: String,
    embedding: Arc<EmbeddingService>,
}

impl QdrantStore {
    pub async fn connect(url: &str, embedding: Arc<EmbeddingService>) -> Result<Self> {
        let store = Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: url.trim_end_matches('/').to_string(),
            embedding,
        };
        store.ensure_collections().await?;
        Ok(store)
    }

    /// Create-if-absent for both collections; safe to repeat and safe under
    /// concurrent bootstrap (a conflicting create is treated as created).
    async fn ensure_collections(&self) -> Result<()> {
        let url = format!("{}/collections", self.base_url);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(AppError::VectorStoreError(format!(
                "Failed to list Qdrant collections: HTTP {}",
                response.status()
            )));
        }
        let body: CollectionsResponse = response
            .json()
            .await
            .map_err(|e| AppError::VectorStoreError(format!("Bad collections response: {}", e)))?;
        let existing: Vec<String> = body
            .result
            .collections
            .into_iter()
            .map(|c| c.name)
            .collect();

        for name in [USER_STORIES_COLLECTION, TEST_CASES_COLLECTION] {
            if existing.iter().any(|c| c == name) {
                continue;
            }
            info!(collection = name, "creating Qdrant collection");
            let create_url = format!("{}/collections/{}", self.base_url, name);
            let response = self
                .client
                .put(&create_url)
                .json(&json!({
                    "vectors": {
                        "size": self.embedding.dimensions(),
                        "distance": "Cosine"
                    }
                }))
                .send()
                .await?;
            // Another process may have created it between list and create.
            if !response.status().is_success() && response.status() != StatusCode::CONFLICT {
                return Err(AppError::VectorStoreError(format!(
                    "Failed to create Qdrant collection {}: HTTP {}",
                    name,
                    response.status()
                )));
            }
        }
        Ok(())
    }

    async fn upsert(&self, collection: &str, id: &str, vector: &[f32], payload: Value) -> Result<()> {
        let url = format!("{}/collections/{}/points", self.base_url, collection);
        let response = self
            .client
            .put(&url)
            .json(&json!({
                "points": [{
                    "id": point_id(id).to_string(),
                    "vector": vector,
                    "payload": payload
                }]
            }))
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::VectorStoreError(format!(
                "Qdrant upsert into {} failed: HTTP {} {}",
                collection, status, text
            )));
        }
        Ok(())
    }

    async fn search(&self, collection: &str, vector: &[f32], limit: usize) -> Result<Vec<SearchHit>> {
        let url = format!("{}/collections/{}/points/search", self.base_url, collection);
        let response = self
            .client
            .post(&url)
            .json(&json!({
                "vector": vector,
                "limit": limit,
                "with_payload": true
            }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AppError::VectorStoreError(format!(
                "Qdrant search in {} failed: HTTP {}",
                collection,
                response.status()
            )));
        }
        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| AppError::VectorStoreError(format!("Bad search response: {}", e)))?;
        Ok(body.result)
    }

    fn payload_without_embedding<T: serde::Serialize>(entity: &T) -> Result<Value> {
        let mut value = serde_json::to_value(entity)
            .map_err(|e| AppError::Internal(format!("Payload serialization failed: {}", e)))?;
        if let Some(map) = value.as_object_mut() {
            map.remove("embedding");
        }
        Ok(value)
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn store_user_story(&self, story: &mut UserStory) -> Result<String> {
        let vector = ensure_story_embedding(&self.embedding, story).await?;
        let payload = Self::payload_without_embedding(story)?;
        self.upsert(USER_STORIES_COLLECTION, &story.story_id, &vector, payload)
            .await?;
        Ok(story.story_id.clone())
    }

    async fn store_test_case(&self, test_case: &mut TestCase) -> Result<String> {
        let vector = ensure_test_case_ready(&self.embedding, test_case).await?;
        let id = test_case
            .test_case_id
            .clone()
            .ok_or_else(|| AppError::Internal("Test case ID missing after assignment".into()))?;
        let payload = Self::payload_without_embedding(test_case)?;
        self.upsert(TEST_CASES_COLLECTION, &id, &vector, payload)
            .await?;
        Ok(id)
    }

    async fn find_similar_stories(
        &self,
        story: &UserStory,
        limit: usize,
    ) -> Result<Vec<ScoredStory>> {
        let mut query = story.clone();
        let vector = ensure_story_embedding(&self.embedding, &mut query).await?;

        // Over-fetch one: the persisted query story may occupy a slot.
        let hits = self
            .search(USER_STORIES_COLLECTION, &vector, limit + 1)
            .await?;
        let mut results = Vec::new();
        for hit in hits {
            let candidate: UserStory = match serde_json::from_value(hit.payload) {
                Ok(candidate) => candidate,
                Err(e) => {
                    error!(error = %e, "skipping malformed story payload");
                    continue;
                }
            };
            if candidate.story_id == story.story_id {
                continue;
            }
            results.push(ScoredStory {
                story: candidate,
                similarity_score: hit.score,
            });
        }
        results.truncate(limit);
        Ok(results)
    }

    async fn find_similar_test_cases(
        &self,
        story: &UserStory,
        limit: usize,
    ) -> Result<Vec<ScoredTestCase>> {
        let mut query = story.clone();
        let vector = ensure_story_embedding(&self.embedding, &mut query).await?;

        let hits = self.search(TEST_CASES_COLLECTION, &vector, limit).await?;
        let mut results = Vec::new();
        for hit in hits {
            match serde_json::from_value::<TestCase>(hit.payload) {
                Ok(test_case) => results.push(ScoredTestCase {
                    test_case,
                    similarity_score: hit.score,
                }),
                Err(e) => error!(error = %e, "skipping malformed test case payload"),
            }
        }
        Ok(results)
    }

    async fn health_check(&self) -> bool {
        let url = format!("{}/collections", self.base_url);
        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                error!(error = %e, "Qdrant health check failed");
                false
            }
        }
    }
}
