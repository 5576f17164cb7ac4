use crate::application::use_cases::agent::TestCaseGenerator;
use crate::application::use_cases::embedding_service::EmbeddingService;
use crate::domain::error::{AppError, Result};
use crate::domain::models::{ProcessReport, UserStory, UserStoryEvent};
use crate::infrastructure::config::{RetrievalLimits, Settings};
use crate::infrastructure::embedders::build_embedding_backend;
use crate::infrastructure::llm_clients::openai::OpenAiChatClient;
use crate::infrastructure::llm_clients::LLMClient;
use crate::infrastructure::vector_store::{build_vector_store, VectorStore};
use crate::infrastructure::work_tracker::{AzureDevOpsClient, WorkTracker};
use std::sync::Arc;
use tracing::{error, info, warn};

/// End-to-end story processing: embed, retrieve context, generate, persist,
/// export. Every external dependency arrives through the constructor, so
/// substituting fakes is trivial and nothing hides in globals.
///
/// Failure policy: retrieval and persistence problems degrade (empty context,
/// skipped write, logged); generation problems are fatal and nothing is
/// exported from a failed revision cycle.
pub struct ProcessPipeline {
    embedding: Arc<EmbeddingService>,
    store: Arc<dyn VectorStore>,
    generator: TestCaseGenerator,
    tracker: Option<Arc<dyn WorkTracker>>,
    limits: RetrievalLimits,
}

impl ProcessPipeline {
    pub fn new(
        embedding: Arc<EmbeddingService>,
        store: Arc<dyn VectorStore>,
        generator: TestCaseGenerator,
        tracker: Option<Arc<dyn WorkTracker>>,
        limits: RetrievalLimits,
    ) -> Self {
        Self {
            embedding,
            store,
            generator,
            tracker,
            limits,
        }
    }

    /// Wire the full configured stack: embedding backend and service, vector
    /// store (bootstrapped), chat client, and the optional work tracker.
    pub async fn from_settings(settings: &Settings) -> Result<Self> {
        let backend = build_embedding_backend(&settings.embedding);
        let embedding = Arc::new(
            EmbeddingService::new(
                backend,
                settings.embedding.dimensions,
                settings.embedding.cache_size,
                settings.embedding.batch_size,
                settings.embedding.max_retry_attempts,
            )
            .await?,
        );
        let store = build_vector_store(
            settings.vector_backend,
            &settings.vector_db_url,
            embedding.clone(),
        )
        .await?;
        let llm: Arc<dyn LLMClient> = Arc::new(OpenAiChatClient::new());
        let generator = TestCaseGenerator::new(llm, settings.llm.clone());
        let tracker: Option<Arc<dyn WorkTracker>> = settings
            .azure_devops
            .clone()
            .map(|config| Arc::new(AzureDevOpsClient::new(config)) as Arc<dyn WorkTracker>);

        Ok(Self::new(
            embedding,
            store,
            generator,
            tracker,
            settings.limits.clone(),
        ))
    }

    pub async fn process_user_story(&self, event: UserStoryEvent) -> Result<ProcessReport> {
        let mut story: UserStory = event.into();
        info!(story_id = %story.story_id, title = %story.title, "processing user story");

        // Embed up front so retrieval and storage share the cached vector.
        // An unreachable embedding backend degrades to empty context.
        match self
            .embedding
            .embed_user_story(&story.title, &story.description)
            .await
        {
            Ok(vector) => story.embedding = Some(vector),
            Err(err) => {
                warn!(story_id = %story.story_id, error = %err, "failed to embed user story, continuing without context")
            }
        }

        if story.embedding.is_some() {
            if let Err(err) = self.store.store_user_story(&mut story).await {
                warn!(story_id = %story.story_id, error = %err, "failed to persist user story");
            }
        }

        let similar_stories = match self
            .store
            .find_similar_stories(&story, self.limits.similar_stories)
            .await
        {
            Ok(results) => results,
            Err(err) => {
                warn!(story_id = %story.story_id, error = %err, "similar story retrieval failed, using empty context");
                Vec::new()
            }
        };
        let similar_test_cases = match self
            .store
            .find_similar_test_cases(&story, self.limits.similar_test_cases)
            .await
        {
            Ok(results) => results,
            Err(err) => {
                warn!(story_id = %story.story_id, error = %err, "similar test case retrieval failed, using empty context");
                Vec::new()
            }
        };

        // Generation failures are fatal for the whole invocation; the
        // caller decides whether to retry the pipeline.
        let mut state = self
            .generator
            .run(
                story.clone(),
                similar_stories,
                similar_test_cases,
                self.limits.max_revisions,
            )
            .await?;

        if let Some(message) = state.error.take() {
            error!(
                story_id = %story.story_id,
                partial = state.generated_test_cases.len(),
                "generation halted with error, skipping export"
            );
            return Err(AppError::ParseError(message));
        }

        let output = state.into_output();
        let summary = output.summary;
        let mut test_cases = output.test_cases;

        for test_case in &mut test_cases {
            if let Err(err) = self.store.store_test_case(test_case).await {
                warn!(
                    story_id = %story.story_id,
                    title = %test_case.title,
                    error = %err,
                    "failed to persist test case"
                );
            }
        }

        let mut export_warning = None;
        if let Some(tracker) = &self.tracker {
            match tracker.create_test_cases(&story.story_id, &test_cases).await {
                Ok(external_ids) => {
                    // Attach externally-issued IDs; these replace the local
                    // UUID space.
                    for (test_case, external_id) in test_cases.iter_mut().zip(&external_ids) {
                        test_case.test_case_id = Some(external_id.clone());
                    }
                    info!(story_id = %story.story_id, exported = external_ids.len(), "exported test cases to work tracker");
                }
                Err(err) => {
                    warn!(story_id = %story.story_id, error = %err, "work tracker export failed");
                    export_warning = Some(format!("Export failed: {}", err));
                }
            }
        }

        let test_case_ids = test_cases
            .iter()
            .filter_map(|tc| tc.test_case_id.clone())
            .collect();

        Ok(ProcessReport {
            story_id: story.story_id,
            test_case_count: test_cases.len(),
            test_case_ids,
            summary,
            export_warning,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::AppError;
    use crate::domain::llm_config::LLMConfig;
    use crate::domain::models::TestCase;
    use crate::infrastructure::embedders::EmbeddingBackend;
    use crate::infrastructure::llm_clients::{ChatMessage, LLMClient};
    use crate::infrastructure::vector_store::memory::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const DIM: usize = 4;

    struct HashBackend;

    #[async_trait]
    impl EmbeddingBackend for HashBackend {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            let n = text.len() as f32;
            Ok(vec![1.0, n % 7.0, n % 5.0, n % 3.0])
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let mut out = Vec::new();
            for t in texts {
                out.push(self.embed(t).await?);
            }
            Ok(out)
        }
    }

    const REPLY: &str = "\
# Verify reset email is sent\nHappy path for the reset flow.\n## Steps\n1. Request a reset link\n2. Check the inbox\n## Expected Result\nA reset email arrives\n\n\
# Verify invalid email is rejected\nNegative path.\n## Steps\n1. Request a reset for an unknown address\n2. An error is displayed\n\n\
# Verify reset at token expiry boundary\nEdge timing.\n## Steps\n1. Wait until just before the token limit\n2. Use the token\n## Expected Result\nReset still succeeds\n";

    struct FixedLlm {
        calls: AtomicUsize,
        reply: String,
    }

    #[async_trait]
    impl LLMClient for FixedLlm {
        async fn generate(&self, _config: &LLMConfig, _messages: &[ChatMessage]) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.reply.clone())
        }
    }

    struct RecordingTracker {
        exported: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl WorkTracker for RecordingTracker {
        async fn create_test_cases(
            &self,
            _story_id: &str,
            test_cases: &[TestCase],
        ) -> Result<Vec<String>> {
            if self.fail {
                return Err(AppError::Internal("tracker down".to_string()));
            }
            let ids: Vec<String> = (0..test_cases.len())
                .map(|i| format!("ADO-{}", i + 100))
                .collect();
            self.exported.lock().unwrap().extend(ids.clone());
            Ok(ids)
        }
    }

    async fn build_pipeline(
        reply: &str,
        tracker: Option<Arc<dyn WorkTracker>>,
        max_revisions: u32,
    ) -> (ProcessPipeline, Arc<FixedLlm>, Arc<dyn VectorStore>) {
        let embedding = Arc::new(
            EmbeddingService::new(Arc::new(HashBackend), DIM, 100, 8, 1)
                .await
                .unwrap(),
        );
        let store: Arc<dyn VectorStore> = Arc::new(MemoryStore::new(embedding.clone()));
        let llm = Arc::new(FixedLlm {
            calls: AtomicUsize::new(0),
            reply: reply.to_string(),
        });
        let generator = TestCaseGenerator::new(llm.clone(), LLMConfig::default());
        let limits = RetrievalLimits {
            max_revisions,
            ..RetrievalLimits::default()
        };
        (
            ProcessPipeline::new(embedding, store.clone(), generator, tracker, limits),
            llm,
            store,
        )
    }

    fn reset_password_event() -> UserStoryEvent {
        UserStoryEvent {
            story_id: "story-42".into(),
            project_id: "proj".into(),
            title: "User can reset password".into(),
            description: "As a user, I want to reset my password...".into(),
            event_type: "workitem.created".into(),
            created_by: String::new(),
            work_item_type: "User Story".into(),
        }
    }

    #[tokio::test]
    async fn end_to_end_with_empty_store() {
        let (pipeline, llm, store) = build_pipeline(REPLY, None, 1).await;
        let report = pipeline
            .process_user_story(reset_password_event())
            .await
            .unwrap();

        // max_revisions = 1: one generation call, no feedback round.
        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
        assert_eq!(report.story_id, "story-42");
        assert_eq!(report.test_case_count, 3);
        assert_eq!(report.test_case_ids.len(), 3);
        assert!(report.export_warning.is_none());
        assert_eq!(
            report.summary,
            "Generated 3 test cases for user story: 'User can reset password'"
        );

        // Generated cases were persisted and are retrievable for the next
        // story.
        let query = UserStory::new("story-43", "proj", "Password reset link", "");
        let similar = store.find_similar_test_cases(&query, 5).await.unwrap();
        assert_eq!(similar.len(), 3);
        for scored in &similar {
            assert!(!scored.test_case.steps.is_empty());
        }
    }

    #[tokio::test]
    async fn export_attaches_external_ids() {
        let tracker = Arc::new(RecordingTracker {
            exported: Mutex::new(Vec::new()),
            fail: false,
        });
        let (pipeline, _llm, _store) =
            build_pipeline(REPLY, Some(tracker.clone() as Arc<dyn WorkTracker>), 1).await;

        let report = pipeline
            .process_user_story(reset_password_event())
            .await
            .unwrap();

        assert_eq!(report.test_case_ids, vec!["ADO-100", "ADO-101", "ADO-102"]);
        assert_eq!(tracker.exported.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn tracker_failure_keeps_local_ids() {
        let tracker = Arc::new(RecordingTracker {
            exported: Mutex::new(Vec::new()),
            fail: true,
        });
        let (pipeline, _llm, _store) =
            build_pipeline(REPLY, Some(tracker as Arc<dyn WorkTracker>), 1).await;

        let report = pipeline
            .process_user_story(reset_password_event())
            .await
            .unwrap();

        assert!(report.export_warning.is_some());
        assert_eq!(report.test_case_count, 3);
        // Local UUIDs assigned at persist time survive.
        assert_eq!(report.test_case_ids.len(), 3);
        assert!(report.test_case_ids.iter().all(|id| !id.starts_with("ADO-")));
    }

    #[tokio::test]
    async fn unparseable_generation_skips_export() {
        let tracker = Arc::new(RecordingTracker {
            exported: Mutex::new(Vec::new()),
            fail: false,
        });
        let (pipeline, _llm, _store) = build_pipeline(
            "no test cases here",
            Some(tracker.clone() as Arc<dyn WorkTracker>),
            1,
        )
        .await;

        let err = pipeline
            .process_user_story(reset_password_event())
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::ParseError(_)));
        assert!(tracker.exported.lock().unwrap().is_empty());
    }
}
