use crate::application::use_cases::prompts;
use crate::application::use_cases::test_case_parser;
use crate::domain::error::Result;
use crate::domain::llm_config::LLMConfig;
use crate::domain::models::{AgentOutput, ScoredStory, ScoredTestCase, TestCase, UserStory};
use crate::infrastructure::llm_clients::{ChatMessage, LLMClient};
use std::sync::Arc;
use tracing::{info, warn};

/// Per-invocation orchestrator state. The control flow over it is fully
/// deterministic given `max_revisions`; only the LLM replies vary.
#[derive(Debug, Clone)]
pub struct AgentState {
    pub user_story: UserStory,
    pub similar_stories: Vec<ScoredStory>,
    pub similar_test_cases: Vec<ScoredTestCase>,
    pub generated_test_cases: Vec<TestCase>,
    /// Latest reviewer feedback; overwritten each revision.
    pub feedback: Option<String>,
    pub revision_number: u32,
    pub max_revisions: u32,
    /// Set on unrecoverable parse failure; halts the loop.
    pub error: Option<String>,
}

impl AgentState {
    fn new(
        user_story: UserStory,
        similar_stories: Vec<ScoredStory>,
        similar_test_cases: Vec<ScoredTestCase>,
        max_revisions: u32,
    ) -> Self {
        Self {
            user_story,
            similar_stories,
            similar_test_cases,
            generated_test_cases: Vec::new(),
            feedback: None,
            revision_number: 1,
            max_revisions,
            error: None,
        }
    }

    /// Combined markdown of the current test case set, fed back into the
    /// reviewer and revision prompts.
    fn test_cases_markdown(&self) -> String {
        self.generated_test_cases
            .iter()
            .map(|tc| tc.test_case_text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn into_output(self) -> AgentOutput {
        let summary = format!(
            "Generated {} test cases for user story: '{}'",
            self.generated_test_cases.len(),
            self.user_story.title
        );
        AgentOutput {
            user_story_id: self.user_story.story_id,
            test_cases: self.generated_test_cases,
            summary,
        }
    }
}

/// Bounded generate -> feedback -> regenerate loop:
/// RetrieveContext -> Generate -> {Done | CollectFeedback -> ApplyFeedback -> Generate}.
pub struct TestCaseGenerator {
    llm: Arc<dyn LLMClient>,
    config: LLMConfig,
}

impl TestCaseGenerator {
    pub fn new(llm: Arc<dyn LLMClient>, config: LLMConfig) -> Self {
        Self { llm, config }
    }

    /// Run the revision loop. LLM transport failures propagate as `Err`
    /// (fatal for the whole invocation); parse failures are recorded on the
    /// returned state alongside whatever was produced before the failing
    /// step.
    pub async fn run(
        &self,
        user_story: UserStory,
        similar_stories: Vec<ScoredStory>,
        similar_test_cases: Vec<ScoredTestCase>,
        max_revisions: u32,
    ) -> Result<AgentState> {
        // RetrieveContext: caller-supplied lists are used as-is; empty
        // context is never an error.
        let mut state = AgentState::new(
            user_story,
            similar_stories,
            similar_test_cases,
            max_revisions,
        );
        info!(
            story_id = %state.user_story.story_id,
            similar_stories = state.similar_stories.len(),
            similar_test_cases = state.similar_test_cases.len(),
            max_revisions,
            "starting test case generation"
        );

        loop {
            // Generate (initial pass) or ApplyFeedback (revision pass).
            let prompt = match &state.feedback {
                None => {
                    let context = prompts::format_context_examples(
                        &state.similar_stories,
                        &state.similar_test_cases,
                    );
                    prompts::build_generation_prompt(&state.user_story, &context)
                }
                Some(feedback) => prompts::build_revision_prompt(
                    &state.user_story,
                    &state.test_cases_markdown(),
                    feedback,
                ),
            };

            let messages = [
                ChatMessage::system(prompts::GENERATION_SYSTEM_PROMPT),
                ChatMessage::user(prompt),
            ];
            let reply = self.llm.generate(&self.config, &messages).await?;

            match test_case_parser::parse_markdown(&reply, &state.user_story.story_id) {
                Ok(test_cases) => {
                    // The new set replaces the previous one, never merges.
                    state.generated_test_cases = test_cases;
                }
                Err(err) => {
                    warn!(
                        story_id = %state.user_story.story_id,
                        revision = state.revision_number,
                        error = %err,
                        "failed to parse generated test cases, halting"
                    );
                    state.error = Some(format!("Failed to parse generated test cases: {}", err));
                    return Ok(state);
                }
            }

            // should_continue
            state.revision_number += 1;
            if state.revision_number > state.max_revisions {
                break;
            }

            // CollectFeedback
            let feedback_messages = [
                ChatMessage::system(prompts::FEEDBACK_SYSTEM_PROMPT),
                ChatMessage::user(state.test_cases_markdown()),
            ];
            let feedback = self.llm.generate(&self.config, &feedback_messages).await?;
            state.feedback = Some(feedback);
        }

        info!(
            story_id = %state.user_story.story_id,
            test_cases = state.generated_test_cases.len(),
            revisions = state.revision_number,
            "test case generation complete"
        );
        Ok(state)
    }
}
