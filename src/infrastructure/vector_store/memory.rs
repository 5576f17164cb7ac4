use super::{ensure_story_embedding, ensure_test_case_ready, VectorStore};
use crate::application::use_cases::embedding_service::EmbeddingService;
use crate::domain::error::{AppError, Result};
use crate::domain::models::{ScoredStory, ScoredTestCase, TestCase, UserStory};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Flat in-memory index with exact cosine search. The no-infrastructure
/// backend for tests, demos and small installs; same contract as the
/// remote engines.
pub struct MemoryStore {
    embedding: Arc<EmbeddingService>,
    stories: Mutex<Vec<UserStory>>,
    test_cases: Mutex<Vec<TestCase>>,
}

impl MemoryStore {
    pub fn new(embedding: Arc<EmbeddingService>) -> Self {
        Self {
            embedding,
            stories: Mutex::new(Vec::new()),
            test_cases: Mutex::new(Vec::new()),
        }
    }

    fn lock_err() -> AppError {
        AppError::VectorStoreError("Memory store lock poisoned".to_string())
    }
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn store_user_story(&self, story: &mut UserStory) -> Result<String> {
        ensure_story_embedding(&self.embedding, story).await?;
        let mut stories = self.stories.lock().map_err(|_| Self::lock_err())?;
        stories.retain(|s| s.story_id != story.story_id);
        stories.push(story.clone());
        Ok(story.story_id.clone())
    }

    async fn store_test_case(&self, test_case: &mut TestCase) -> Result<String> {
        ensure_test_case_ready(&self.embedding, test_case).await?;
        let id = test_case
            .test_case_id
            .clone()
            .ok_or_else(|| AppError::Internal("Test case ID missing after assignment".into()))?;
        let mut test_cases = self.test_cases.lock().map_err(|_| Self::lock_err())?;
        test_cases.retain(|tc| tc.test_case_id.as_deref() != Some(id.as_str()));
        test_cases.push(test_case.clone());
        Ok(id)
    }

    async fn find_similar_stories(
        &self,
        story: &UserStory,
        limit: usize,
    ) -> Result<Vec<ScoredStory>> {
        let mut query = story.clone();
        let query_vector = ensure_story_embedding(&self.embedding, &mut query).await?;

        let stories = self.stories.lock().map_err(|_| Self::lock_err())?;
        let mut results: Vec<ScoredStory> = stories
            .iter()
            // Self-match suppression: the query story never appears in its
            // own results.
            .filter(|candidate| candidate.story_id != story.story_id)
            .filter_map(|candidate| {
                candidate.embedding.as_ref().map(|embedding| ScoredStory {
                    story: candidate.clone(),
                    similarity_score: cosine_similarity(&query_vector, embedding),
                })
            })
            .collect();

        results.sort_by(|a, b| {
            b.similarity_score
                .partial_cmp(&a.similarity_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(limit);
        Ok(results)
    }

    async fn find_similar_test_cases(
        &self,
        story: &UserStory,
        limit: usize,
    ) -> Result<Vec<ScoredTestCase>> {
        let mut query = story.clone();
        let query_vector = ensure_story_embedding(&self.embedding, &mut query).await?;

        let test_cases = self.test_cases.lock().map_err(|_| Self::lock_err())?;
        let mut results: Vec<ScoredTestCase> = test_cases
            .iter()
            .filter_map(|candidate| {
                candidate.embedding.as_ref().map(|embedding| ScoredTestCase {
                    test_case: candidate.clone(),
                    similarity_score: cosine_similarity(&query_vector, embedding),
                })
            })
            .collect();

        results.sort_by(|a, b| {
            b.similarity_score
                .partial_cmp(&a.similarity_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(limit);
        Ok(results)
    }

    async fn health_check(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::embedders::EmbeddingBackend;

    const DIM: usize = 3;

    /// Maps a handful of known texts to fixed vectors so similarity order
    /// is predictable.
    struct WordBackend;

    impl WordBackend {
        fn vector_for(text: &str) -> Vec<f32> {
            let lower = text.to_lowercase();
            if lower.contains("password") {
                vec![1.0, 0.0, 0.0]
            } else if lower.contains("login") {
                vec![0.9, 0.1, 0.0]
            } else if lower.contains("invoice") {
                vec![0.0, 1.0, 0.0]
            } else {
                vec![0.0, 0.0, 1.0]
            }
        }
    }

    #[async_trait]
    impl EmbeddingBackend for WordBackend {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            Ok(Self::vector_for(text))
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|t| Self::vector_for(t)).collect())
        }
    }

    async fn store() -> MemoryStore {
        let embedding = Arc::new(
            EmbeddingService::new(Arc::new(WordBackend), DIM, 100, 8, 1)
                .await
                .unwrap(),
        );
        MemoryStore::new(embedding)
    }

    #[tokio::test]
    async fn cosine_similarity_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 0.001);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 0.001);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn search_orders_by_descending_similarity() {
        let store = store().await;
        let mut near = UserStory::new("s-login", "p", "Login flow", "");
        let mut far = UserStory::new("s-invoice", "p", "Invoice export", "");
        store.store_user_story(&mut near).await.unwrap();
        store.store_user_story(&mut far).await.unwrap();

        let query = UserStory::new("s-query", "p", "Password reset", "");
        let results = store.find_similar_stories(&query, 5).await.unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].story.story_id, "s-login");
        assert!(results[0].similarity_score > results[1].similarity_score);
    }

    #[tokio::test]
    async fn persisted_query_story_is_suppressed() {
        let store = store().await;
        let mut story = UserStory::new("s-1", "p", "Password reset", "");
        store.store_user_story(&mut story).await.unwrap();
        let mut other = UserStory::new("s-2", "p", "Login flow", "");
        store.store_user_story(&mut other).await.unwrap();

        let results = store.find_similar_stories(&story, 5).await.unwrap();
        assert!(results.iter().all(|r| r.story.story_id != "s-1"));
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn store_assigns_test_case_id_and_embedding() {
        let store = store().await;
        let mut tc = TestCase {
            test_case_id: None,
            story_id: "s-1".into(),
            title: "Verify login".into(),
            description: "d".into(),
            steps: vec![crate::domain::models::TestStep {
                action: "log in".into(),
                expected: "dashboard shown".into(),
            }],
            test_type: crate::domain::models::TestType::Positive,
            test_case_text: String::new(),
            test_case_csv: None,
            embedding: None,
            generated_at: chrono::Utc::now(),
        };
        let id = store.store_test_case(&mut tc).await.unwrap();
        assert_eq!(tc.test_case_id.as_deref(), Some(id.as_str()));
        assert!(tc.embedding.is_some());

        let query = UserStory::new("s-q", "p", "Login page", "");
        let found = store.find_similar_test_cases(&query, 5).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].test_case.test_case_id.as_deref(), Some(id.as_str()));
    }

    #[tokio::test]
    async fn restore_replaces_instead_of_duplicating() {
        let store = store().await;
        let mut story = UserStory::new("s-1", "p", "Password reset", "");
        store.store_user_story(&mut story).await.unwrap();
        store.store_user_story(&mut story).await.unwrap();

        let query = UserStory::new("s-q", "p", "Password entry", "");
        let results = store.find_similar_stories(&query, 10).await.unwrap();
        assert_eq!(results.len(), 1);
    }
}
