use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user story as delivered by the webhook/queue layer.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct UserStoryEvent {
    pub story_id: String,
    pub project_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub event_type: String,
    #[serde(default)]
    pub created_by: String,
    #[serde(default)]
    pub work_item_type: String,
}

impl From<UserStoryEvent> for UserStory {
    fn from(event: UserStoryEvent) -> Self {
        UserStory::new(
            event.story_id,
            event.project_id,
            event.title,
            event.description,
        )
    }
}

/// A user story persisted in the vector store.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct UserStory {
    pub story_id: String,
    pub project_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Computed lazily, cached once computed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
}

impl UserStory {
    pub fn new(
        story_id: impl Into<String>,
        project_id: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            story_id: story_id.into(),
            project_id: project_id.into(),
            title: title.into(),
            description: description.into(),
            embedding: None,
            created_at: Utc::now(),
        }
    }
}

/// One ordered test step. Intermediate steps may carry an empty `expected`;
/// the final step's `expected` is the test case's expected result.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct TestStep {
    pub action: String,
    #[serde(default)]
    pub expected: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TestType {
    Positive,
    Negative,
    Edge,
}

const NEGATIVE_TERMS: [&str; 5] = ["negative", "invalid", "error", "fail", "reject"];
const EDGE_TERMS: [&str; 5] = ["edge", "boundary", "limit", "max", "min"];

impl TestType {
    /// Keyword heuristic over title + description. The negative check runs
    /// before the edge check, so negative wins on overlap.
    pub fn classify(title: &str, description: &str) -> Self {
        let text = format!("{} {}", title, description).to_lowercase();
        if NEGATIVE_TERMS.iter().any(|term| text.contains(term)) {
            TestType::Negative
        } else if EDGE_TERMS.iter().any(|term| text.contains(term)) {
            TestType::Edge
        } else {
            TestType::Positive
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TestType::Positive => "positive",
            TestType::Negative => "negative",
            TestType::Edge => "edge",
        }
    }
}

/// A generated test case. The markdown and CSV renderings are caches over
/// the structured fields, never sources of truth.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TestCase {
    /// Locally a UUID; replaced by the work tracker's ID after export.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_case_id: Option<String>,
    pub story_id: String,
    pub title: String,
    pub description: String,
    pub steps: Vec<TestStep>,
    pub test_type: TestType,
    pub test_case_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_case_csv: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub generated_at: DateTime<Utc>,
}

impl TestCase {
    /// The expected result lives on the final step.
    pub fn expected_result(&self) -> &str {
        self.steps
            .last()
            .map(|step| step.expected.as_str())
            .unwrap_or("")
    }

    /// Canonical steps text used for embedding.
    pub fn steps_text(&self) -> String {
        self.steps
            .iter()
            .enumerate()
            .map(|(i, step)| format!("{}. {}", i + 1, step.action))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A search hit: an entity plus the backend-reported similarity score.
/// Score scale is backend-native (cosine vs certainty) and not comparable
/// across backends.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ScoredStory {
    pub story: UserStory,
    pub similarity_score: f32,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ScoredTestCase {
    pub test_case: TestCase,
    pub similarity_score: f32,
}

/// Final output of the agent loop.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AgentOutput {
    pub user_story_id: String,
    pub test_cases: Vec<TestCase>,
    pub summary: String,
}

/// What the pipeline hands back to the invoking layer.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProcessReport {
    pub story_id: String,
    pub test_case_count: usize,
    pub test_case_ids: Vec<String>,
    pub summary: String,
    /// Set when export to the work tracker was skipped or failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub export_warning: Option<String>,
}
