use crate::domain::models::{ScoredStory, ScoredTestCase, UserStory};

pub const GENERATION_SYSTEM_PROMPT: &str = "\
You are a QA automation expert tasked with designing comprehensive test cases \
for user stories in a software development project.";

pub const FEEDBACK_SYSTEM_PROMPT: &str = "\
You are a QA reviewer. Provide feedback on the generated test cases. Identify \
any missing scenarios, redundancy, or opportunities to improve clarity or coverage.";

const GENERATION_REQUIREMENTS: &str = "\
## REQUIREMENTS
1. Generate at least one test case for each of these types:
   - Positive test case: Verifies the functionality works as expected with valid inputs
   - Negative test case: Tests the system's response to invalid inputs or unauthorized actions
   - Edge case: Tests boundary conditions or unusual scenarios

2. For each test case, include:
   - A clear, descriptive title
   - A brief description of what the test is verifying
   - Numbered steps with detailed actions
   - Expected result after following all steps

3. Format each test case in Markdown with these sections:
   # Test Case Title
   Brief description of the test case

   ## Steps
   1. First step
   2. Second step

   ## Expected Result
   What should happen

## OUTPUT
Generate at least 3 test cases (1 of each type) and at most 5 total.
Do not include any explanations or additional comments, only output the test cases in the format specified.";

/// Format retrieved context into the examples block injected into the
/// generation prompt.
pub fn format_context_examples(
    similar_stories: &[ScoredStory],
    similar_test_cases: &[ScoredTestCase],
) -> String {
    let mut out = String::new();

    if !similar_stories.is_empty() {
        out.push_str("### SIMILAR USER STORIES:\n\n");
        for scored in similar_stories {
            out.push_str(&format!("**User Story**: {}\n", scored.story.title));
            out.push_str(&format!("**Description**: {}\n\n", scored.story.description));
        }
    }

    if !similar_test_cases.is_empty() {
        out.push_str("### SIMILAR TEST CASES:\n\n");
        for scored in similar_test_cases {
            out.push_str(&format!("**Test Case**: {}\n", scored.test_case.title));
            out.push_str(&format!("**Type**: {}\n", scored.test_case.test_type.as_str()));
            out.push_str(&format!("**Steps**: {}\n\n", scored.test_case.test_case_text));
        }
    }

    if out.is_empty() {
        out.push_str("No similar examples found.");
    }
    out
}

pub fn build_generation_prompt(story: &UserStory, context_examples: &str) -> String {
    format!(
        "# TEST CASE GENERATION TASK\n\
         Create a set of detailed test cases for the given user story. \
         Include positive, negative, and edge case scenarios.\n\n\
         ## USER STORY DETAILS\n\
         Title: {}\n\
         Description: {}\n\n\
         ## SIMILAR USER STORIES & TEST CASES\n\
         The following are similar user stories and their test cases from the \
         system that might provide context:\n\n\
         {}\n\n\
         {}",
        story.title, story.description, context_examples, GENERATION_REQUIREMENTS
    )
}

/// Revision prompt: the previous test cases plus reviewer feedback. The
/// reply replaces the previous set.
pub fn build_revision_prompt(
    story: &UserStory,
    previous_markdown: &str,
    feedback: &str,
) -> String {
    format!(
        "# TEST CASE REVISION TASK\n\
         Revise the test cases for the user story below based on the reviewer \
         feedback. Output the complete, revised set of test cases; it fully \
         replaces the previous set.\n\n\
         ## USER STORY DETAILS\n\
         Title: {}\n\
         Description: {}\n\n\
         ## PREVIOUS TEST CASES\n{}\n\n\
         ## FEEDBACK\n{}\n\n\
         {}",
        story.title, story.description, previous_markdown, feedback, GENERATION_REQUIREMENTS
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_context_gets_placeholder() {
        assert_eq!(format_context_examples(&[], &[]), "No similar examples found.");
    }

    #[test]
    fn generation_prompt_includes_story_and_context() {
        let story = UserStory::new("1", "p", "Reset password", "As a user...");
        let prompt = build_generation_prompt(&story, "No similar examples found.");
        assert!(prompt.contains("Title: Reset password"));
        assert!(prompt.contains("No similar examples found."));
        assert!(prompt.contains("## REQUIREMENTS"));
    }
}
