use crate::application::use_cases::csv_writer;
use crate::domain::error::{AppError, Result};
use crate::domain::models::{TestCase, TestStep, TestType};
use crate::infrastructure::llm_clients::strip_code_fence;
use chrono::Utc;
use serde::Deserialize;
use tracing::debug;

const STEPS_MARKERS: [&str; 4] = ["## steps", "## test steps", "# steps", "# test steps"];
const EXPECTED_MARKERS: [&str; 3] = ["## expected", "# expected", "expected result"];

/// Split LLM output into candidate test-case sections on top-level `# `
/// headings.
pub fn split_sections(text: &str) -> Vec<String> {
    let mut sections = Vec::new();
    let mut current = String::new();
    for line in text.lines() {
        if line.starts_with("# ") && !current.trim().is_empty() {
            sections.push(current.trim().to_string());
            current = line.to_string();
        } else {
            current.push('\n');
            current.push_str(line);
        }
    }
    if !current.trim().is_empty() {
        sections.push(current.trim().to_string());
    }
    sections
}

/// Parse one markdown section into a test case. Returns `None` when the
/// section has no usable steps.
pub fn parse_section(markdown: &str, story_id: &str) -> Option<TestCase> {
    let lines: Vec<&str> = markdown.trim().lines().collect();
    let first = lines.first()?;
    let title = first.trim_start_matches('#').trim().to_string();
    if title.is_empty() {
        return None;
    }

    // Description is the prose between the title and the steps marker.
    let mut description = String::new();
    let mut steps_start = None;
    for (i, line) in lines.iter().enumerate().skip(1) {
        let lower = line.trim().to_lowercase();
        if STEPS_MARKERS.iter().any(|m| lower.starts_with(m)) {
            steps_start = Some(i);
            break;
        }
        description.push_str(line.trim());
        description.push(' ');
    }
    let mut description = description.trim().to_string();

    // No steps heading: fall back to the first numbered line.
    if steps_start.is_none() {
        for (i, line) in lines.iter().enumerate().skip(1) {
            if line.trim().starts_with("1.") {
                steps_start = Some(i);
                break;
            }
        }
        if let Some(start) = steps_start {
            // The prose scan above swallowed the step lines; redo it.
            description = lines[1..start]
                .iter()
                .map(|l| l.trim())
                .collect::<Vec<_>>()
                .join(" ")
                .trim()
                .to_string();
        }
    }
    let steps_start = steps_start?;

    let mut actions: Vec<String> = Vec::new();
    let mut expected = String::new();
    let mut in_expected = false;

    for line in &lines[steps_start..] {
        let line = line.trim();
        let lower = line.to_lowercase();

        if EXPECTED_MARKERS.iter().any(|m| lower.starts_with(m)) {
            in_expected = true;
            continue;
        }
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if in_expected {
            expected.push_str(line);
            expected.push(' ');
        } else if let Some((number, action)) = line.split_once('.') {
            if number.trim().chars().all(|c| c.is_ascii_digit()) && !number.trim().is_empty() {
                actions.push(action.trim().to_string());
            }
        }
    }

    let mut expected = expected.trim().to_string();

    // No dedicated expected-result section: the last step IS the expected
    // result. This changes the step count on purpose.
    if expected.is_empty() {
        expected = actions.pop()?;
    }
    if actions.is_empty() {
        return None;
    }

    let last = actions.len() - 1;
    let steps: Vec<TestStep> = actions
        .into_iter()
        .enumerate()
        .map(|(i, action)| TestStep {
            action,
            expected: if i == last {
                expected.clone()
            } else {
                String::new()
            },
        })
        .collect();

    let test_type = TestType::classify(&title, &description);
    let mut test_case = TestCase {
        test_case_id: None,
        story_id: story_id.to_string(),
        title,
        description,
        steps,
        test_type,
        test_case_text: markdown.trim().to_string(),
        test_case_csv: None,
        embedding: None,
        generated_at: Utc::now(),
    };
    test_case.test_case_csv = csv_writer::test_case_to_csv(&test_case).ok();
    Some(test_case)
}

/// Parse a full markdown LLM reply into structured test cases. Sections
/// without usable steps are dropped; an entirely unusable reply is a parse
/// error, never a quietly-successful empty result.
pub fn parse_markdown(text: &str, story_id: &str) -> Result<Vec<TestCase>> {
    let sections = split_sections(text);
    let test_cases: Vec<TestCase> = sections
        .iter()
        .filter_map(|section| parse_section(section, story_id))
        .collect();

    if test_cases.is_empty() {
        return Err(AppError::ParseError(format!(
            "No test cases could be parsed from LLM output ({} chars, {} sections)",
            text.len(),
            sections.len()
        )));
    }
    debug!(count = test_cases.len(), "parsed test cases from markdown");
    Ok(test_cases)
}

#[derive(Debug, Deserialize)]
struct JsonTestCase {
    title: String,
    #[serde(default)]
    description: String,
    steps: Vec<TestStep>,
    #[serde(default)]
    test_type: Option<TestType>,
    #[serde(default)]
    test_case_text: Option<String>,
}

/// Alternate prompt contract: a JSON array of test case objects. A decode
/// failure yields an error and no partial parse.
pub fn parse_json(text: &str, story_id: &str) -> Result<Vec<TestCase>> {
    let payload = strip_code_fence(text);
    let raw: Vec<JsonTestCase> = serde_json::from_str(payload)
        .map_err(|e| AppError::ParseError(format!("Failed to decode test case JSON: {}", e)))?;

    let mut test_cases = Vec::with_capacity(raw.len());
    for item in raw {
        if item.steps.is_empty() {
            return Err(AppError::ParseError(format!(
                "Test case '{}' has no steps",
                item.title
            )));
        }
        let test_type = item
            .test_type
            .unwrap_or_else(|| TestType::classify(&item.title, &item.description));
        let mut test_case = TestCase {
            test_case_id: None,
            story_id: story_id.to_string(),
            title: item.title,
            description: item.description,
            steps: item.steps,
            test_type,
            test_case_text: String::new(),
            test_case_csv: None,
            embedding: None,
            generated_at: Utc::now(),
        };
        test_case.test_case_text = item
            .test_case_text
            .unwrap_or_else(|| csv_writer::test_case_to_markdown(&test_case));
        test_case.test_case_csv = csv_writer::test_case_to_csv(&test_case).ok();
        test_cases.push(test_case);
    }
    Ok(test_cases)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_CASES: &str = "\
# Verify successful password reset

Checks the happy path of the reset flow.

## Steps
1. Navigate to the login page
2. Click 'Forgot Password'
3. Enter a registered email

## Expected Result
A reset link is emailed to the user

# Verify reset with invalid email

Rejects unregistered addresses.

## Steps
1. Navigate to the login page
2. Click 'Forgot Password'
3. Enter an unregistered email
4. An error message is shown
";

    #[test]
    fn splits_on_top_level_headings() {
        let sections = split_sections(TWO_CASES);
        assert_eq!(sections.len(), 2);
        assert!(sections[0].starts_with("# Verify successful password reset"));
        assert!(sections[1].starts_with("# Verify reset with invalid email"));
    }

    #[test]
    fn parses_section_with_expected_heading() {
        let sections = split_sections(TWO_CASES);
        let tc = parse_section(&sections[0], "story-1").unwrap();
        assert_eq!(tc.title, "Verify successful password reset");
        assert_eq!(tc.description, "Checks the happy path of the reset flow.");
        assert_eq!(tc.steps.len(), 3);
        assert_eq!(tc.steps[0].action, "Navigate to the login page");
        assert_eq!(tc.expected_result(), "A reset link is emailed to the user");
        assert_eq!(tc.test_type, TestType::Positive);
    }

    #[test]
    fn missing_expected_heading_pops_last_step() {
        let sections = split_sections(TWO_CASES);
        let tc = parse_section(&sections[1], "story-1").unwrap();
        // Four numbered lines, the last reclassified as the expected result.
        assert_eq!(tc.steps.len(), 3);
        assert_eq!(tc.expected_result(), "An error message is shown");
        assert_eq!(tc.test_type, TestType::Negative);
    }

    #[test]
    fn numbered_steps_without_heading_are_found() {
        let md = "# Boundary upload\nUpload at the size limit.\n1. Open upload form\n2. Select a file at max size\n3. File uploads successfully";
        let tc = parse_section(md, "s").unwrap();
        assert_eq!(tc.steps.len(), 2);
        assert_eq!(tc.expected_result(), "File uploads successfully");
        assert_eq!(tc.test_type, TestType::Edge);
    }

    #[test]
    fn section_without_steps_is_skipped() {
        assert!(parse_section("# Title only\nsome prose", "s").is_none());
    }

    #[test]
    fn unusable_reply_is_a_parse_error() {
        let err = parse_markdown("Sorry, I cannot help with that.", "s").unwrap_err();
        assert!(matches!(err, AppError::ParseError(_)));
    }

    #[test]
    fn classification_precedence_negative_over_edge() {
        let md = "# Invalid value at boundary\nMixes both keyword sets.\n## Steps\n1. Enter an invalid value at the field limit\n2. Validation error is shown";
        let tc = parse_section(md, "s").unwrap();
        assert_eq!(tc.test_type, TestType::Negative);
    }

    #[test]
    fn json_contract_round_trip() {
        let json = r#"[
            {
                "title": "Verify login",
                "description": "Happy path",
                "steps": [
                    {"action": "Open login page", "expected": ""},
                    {"action": "Submit valid credentials", "expected": "Dashboard is shown"}
                ]
            }
        ]"#;
        let cases = parse_json(json, "story-9").unwrap();
        assert_eq!(cases.len(), 1);
        assert_eq!(cases[0].story_id, "story-9");
        assert_eq!(cases[0].steps.len(), 2);
        assert_eq!(cases[0].test_type, TestType::Positive);
        assert!(cases[0].test_case_csv.is_some());
    }

    #[test]
    fn json_decode_failure_is_total() {
        let err = parse_json("[{\"title\": \"broken\"", "s").unwrap_err();
        assert!(matches!(err, AppError::ParseError(_)));
    }

    #[test]
    fn fenced_json_is_accepted() {
        let json = "```json\n[{\"title\": \"T\", \"steps\": [{\"action\": \"a\", \"expected\": \"b\"}]}]\n```";
        let cases = parse_json(json, "s").unwrap();
        assert_eq!(cases.len(), 1);
    }
}
