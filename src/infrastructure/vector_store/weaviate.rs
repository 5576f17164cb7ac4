use super::{ensure_story_embedding, ensure_test_case_ready, point_id, VectorStore};
use crate::application::use_cases::embedding_service::EmbeddingService;
use crate::domain::error::{AppError, Result};
use crate::domain::models::{ScoredStory, ScoredTestCase, TestCase, TestStep, TestType, UserStory};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info, warn};

const STORY_CLASS: &str = "UserStory";
const TEST_CASE_CLASS: &str = "TestCase";

/// Weaviate backend over its REST and GraphQL APIs. Vectors are supplied by
/// us (`vectorizer: none`); similarity is reported as certainty in [0, 1],
/// a different scale than the cosine backends.
pub struct WeaviateStore {
    client: Client,
    base_url: String,
    embedding: Arc<EmbeddingService>,
}

impl WeaviateStore {
    pub async fn connect(url: &str, embedding: Arc<EmbeddingService>) -> Result<Self> {
        let store = Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: url.trim_end_matches('/').to_string(),
            embedding,
        };
        store.ensure_schema().await?;
        Ok(store)
    }

    fn story_class_definition() -> Value {
        json!({
            "class": STORY_CLASS,
            "description": "User story awaiting or providing test case context",
            "vectorizer": "none",
            "properties": [
                {"name": "story_id", "dataType": ["string"], "tokenization": "field"},
                {"name": "project_id", "dataType": ["string"], "tokenization": "field"},
                {"name": "title", "dataType": ["text"]},
                {"name": "description", "dataType": ["text"]},
                {"name": "created_at", "dataType": ["date"]}
            ]
        })
    }

    fn test_case_class_definition() -> Value {
        json!({
            "class": TEST_CASE_CLASS,
            "description": "Generated test case linked to a user story",
            "vectorizer": "none",
            "properties": [
                {"name": "test_case_id", "dataType": ["string"], "tokenization": "field"},
                {"name": "story_id", "dataType": ["string"], "tokenization": "field"},
                {"name": "title", "dataType": ["text"]},
                {"name": "description", "dataType": ["text"]},
                {"name": "steps", "dataType": ["string"]},
                {"name": "test_type", "dataType": ["string"], "tokenization": "field"},
                {"name": "test_case_text", "dataType": ["text"]},
                {"name": "test_case_csv", "dataType": ["text"]},
                {"name": "generated_at", "dataType": ["date"]}
            ]
        })
    }

    /// Create-if-absent for both classes; repeatable, and a concurrent
    /// create racing us is treated as created.
    async fn ensure_schema(&self) -> Result<()> {
        let url = format!("{}/v1/schema", self.base_url);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(AppError::VectorStoreError(format!(
                "Failed to read Weaviate schema: HTTP {}",
                response.status()
            )));
        }
        let schema: Value = response
            .json()
            .await
            .map_err(|e| AppError::VectorStoreError(format!("Bad schema response: {}", e)))?;
        let existing: Vec<String> = schema
            .get("classes")
            .and_then(|c| c.as_array())
            .map(|classes| {
                classes
                    .iter()
                    .filter_map(|c| c.get("class").and_then(|n| n.as_str()))
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        for definition in [Self::story_class_definition(), Self::test_case_class_definition()] {
            let name = definition["class"].as_str().unwrap_or_default();
            if existing.iter().any(|c| c == name) {
                continue;
            }
            info!(class = name, "creating Weaviate class");
            let response = self.client.post(&url).json(&definition).send().await?;
            if !response.status().is_success() {
                let status = response.status();
                let text = response.text().await.unwrap_or_default();
                if text.contains("already exists") {
                    continue;
                }
                return Err(AppError::VectorStoreError(format!(
                    "Failed to create Weaviate class {}: HTTP {} {}",
                    name, status, text
                )));
            }
        }
        Ok(())
    }

    /// Create the object, falling back to an update when it already exists
    /// so repeated stores stay idempotent.
    async fn put_object(&self, class: &str, id: &str, properties: Value, vector: &[f32]) -> Result<()> {
        let object_id = point_id(id).to_string();
        let url = format!("{}/v1/objects", self.base_url);
        let body = json!({
            "class": class,
            "id": object_id,
            "properties": properties,
            "vector": vector
        });
        let response = self.client.post(&url).json(&body).send().await?;
        if response.status().is_success() {
            return Ok(());
        }

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if text.contains("already exists") || status.as_u16() == 422 {
            let update_url = format!("{}/v1/objects/{}/{}", self.base_url, class, object_id);
            let response = self.client.put(&update_url).json(&body).send().await?;
            if response.status().is_success() {
                return Ok(());
            }
            return Err(AppError::VectorStoreError(format!(
                "Weaviate update of {} {} failed: HTTP {}",
                class,
                object_id,
                response.status()
            )));
        }
        Err(AppError::VectorStoreError(format!(
            "Weaviate create of {} failed: HTTP {} {}",
            class, status, text
        )))
    }

    async fn near_vector_query(
        &self,
        class: &str,
        fields: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<Value>> {
        let vector_json = serde_json::to_string(vector)
            .map_err(|e| AppError::Internal(format!("Vector serialization failed: {}", e)))?;
        let query = format!(
            "{{ Get {{ {}(nearVector: {{vector: {}}}, limit: {}) {{ {} _additional {{ certainty }} }} }} }}",
            class, vector_json, limit, fields
        );

        let url = format!("{}/v1/graphql", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&json!({ "query": query }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AppError::VectorStoreError(format!(
                "Weaviate query failed: HTTP {}",
                response.status()
            )));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| AppError::VectorStoreError(format!("Bad GraphQL response: {}", e)))?;

        if let Some(errors) = body.get("errors") {
            return Err(AppError::VectorStoreError(format!(
                "Weaviate query errors: {}",
                errors
            )));
        }

        Ok(body
            .pointer(&format!("/data/Get/{}", class))
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default())
    }

    fn certainty(hit: &Value) -> f32 {
        hit.pointer("/_additional/certainty")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0) as f32
    }

    fn text_field(hit: &Value, name: &str) -> String {
        hit.get(name)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    }

    fn date_field(hit: &Value, name: &str) -> DateTime<Utc> {
        hit.get(name)
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now)
    }
}

#[async_trait]
impl VectorStore for WeaviateStore {
    async fn store_user_story(&self, story: &mut UserStory) -> Result<String> {
        let vector = ensure_story_embedding(&self.embedding, story).await?;
        let properties = json!({
            "story_id": story.story_id,
            "project_id": story.project_id,
            "title": story.title,
            "description": story.description,
            "created_at": story.created_at.to_rfc3339(),
        });
        self.put_object(STORY_CLASS, &story.story_id, properties, &vector)
            .await?;
        Ok(story.story_id.clone())
    }

    async fn store_test_case(&self, test_case: &mut TestCase) -> Result<String> {
        let vector = ensure_test_case_ready(&self.embedding, test_case).await?;
        let id = test_case
            .test_case_id
            .clone()
            .ok_or_else(|| AppError::Internal("Test case ID missing after assignment".into()))?;
        // Weaviate has no nested-object property type; steps go in as a
        // JSON string.
        let steps_json = serde_json::to_string(&test_case.steps)
            .map_err(|e| AppError::Internal(format!("Steps serialization failed: {}", e)))?;
        let properties = json!({
            "test_case_id": id,
            "story_id": test_case.story_id,
            "title": test_case.title,
            "description": test_case.description,
            "steps": steps_json,
            "test_type": test_case.test_type.as_str(),
            "test_case_text": test_case.test_case_text,
            "test_case_csv": test_case.test_case_csv.clone().unwrap_or_default(),
            "generated_at": test_case.generated_at.to_rfc3339(),
        });
        self.put_object(TEST_CASE_CLASS, &id, properties, &vector)
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

        let hits = self
            .near_vector_query(
                STORY_CLASS,
                "story_id project_id title description created_at",
                &vector,
                limit + 1,
            )
            .await?;

        let mut results = Vec::new();
        for hit in hits {
            let story_id = Self::text_field(&hit, "story_id");
            // Explicit ID filtering keeps the query story out of its own
            // results.
            if story_id == story.story_id {
                continue;
            }
            results.push(ScoredStory {
                similarity_score: Self::certainty(&hit),
                story: UserStory {
                    story_id,
                    project_id: Self::text_field(&hit, "project_id"),
                    title: Self::text_field(&hit, "title"),
                    description: Self::text_field(&hit, "description"),
                    embedding: None,
                    created_at: Self::date_field(&hit, "created_at"),
                },
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

        let hits = self
            .near_vector_query(
                TEST_CASE_CLASS,
                "test_case_id story_id title description steps test_type test_case_text test_case_csv generated_at",
                &vector,
                limit,
            )
            .await?;

        let mut results = Vec::new();
        for hit in hits {
            let steps_raw = Self::text_field(&hit, "steps");
            let steps: Vec<TestStep> = match serde_json::from_str(&steps_raw) {
                Ok(steps) => steps,
                Err(e) => {
                    warn!(error = %e, "skipping test case with malformed steps payload");
                    continue;
                }
            };
            let test_type = match Self::text_field(&hit, "test_type").as_str() {
                "negative" => TestType::Negative,
                "edge" => TestType::Edge,
                _ => TestType::Positive,
            };
            let csv = Self::text_field(&hit, "test_case_csv");
            results.push(ScoredTestCase {
                similarity_score: Self::certainty(&hit),
                test_case: TestCase {
                    test_case_id: Some(Self::text_field(&hit, "test_case_id")),
                    story_id: Self::text_field(&hit, "story_id"),
                    title: Self::text_field(&hit, "title"),
                    description: Self::text_field(&hit, "description"),
                    steps,
                    test_type,
                    test_case_text: Self::text_field(&hit, "test_case_text"),
                    test_case_csv: if csv.is_empty() { None } else { Some(csv) },
                    embedding: None,
                    generated_at: Self::date_field(&hit, "generated_at"),
                },
            });
        }
        Ok(results)
    }

    async fn health_check(&self) -> bool {
        let url = format!("{}/v1/schema", self.base_url);
        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                error!(error = %e, "Weaviate health check failed");
                false
            }
        }
    }
}
