use crate::domain::error::{AppError, Result};
use crate::domain::models::TestCase;

fn writer_to_string(writer: csv::Writer<Vec<u8>>) -> Result<String> {
    let bytes = writer
        .into_inner()
        .map_err(|e| AppError::Internal(format!("CSV writer flush failed: {}", e)))?;
    String::from_utf8(bytes).map_err(|e| AppError::Internal(format!("CSV not UTF-8: {}", e)))
}

/// Render one test case as CSV: one row per step, and only the final row
/// carries the expected result. Downstream import tooling depends on that
/// asymmetric layout.
pub fn test_case_to_csv(test_case: &TestCase) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(["Step", "Description", "Expected Result"])
        .map_err(|e| AppError::Internal(format!("CSV write failed: {}", e)))?;

    let last = test_case.steps.len().saturating_sub(1);
    for (i, step) in test_case.steps.iter().enumerate() {
        let expected = if i == last {
            test_case.expected_result()
        } else {
            ""
        };
        writer
            .write_record([&(i + 1).to_string(), &step.action, &expected.to_string()])
            .map_err(|e| AppError::Internal(format!("CSV write failed: {}", e)))?;
    }

    writer_to_string(writer)
}

/// Render several test cases into a single CSV export. Title, type and
/// description appear only on the first row of each case.
pub fn test_cases_to_csv(test_cases: &[TestCase]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record([
            "Test Case ID",
            "Title",
            "Type",
            "Description",
            "Step",
            "Step Description",
            "Expected Result",
        ])
        .map_err(|e| AppError::Internal(format!("CSV write failed: {}", e)))?;

    for (case_no, tc) in test_cases.iter().enumerate() {
        let test_id = tc
            .test_case_id
            .clone()
            .unwrap_or_else(|| format!("TC{}", case_no + 1));
        let last = tc.steps.len().saturating_sub(1);

        for (i, step) in tc.steps.iter().enumerate() {
            let (title, test_type, description) = if i == 0 {
                (tc.title.as_str(), tc.test_type.as_str(), tc.description.as_str())
            } else {
                ("", "", "")
            };
            let expected = if i == last { tc.expected_result() } else { "" };
            writer
                .write_record([
                    test_id.as_str(),
                    title,
                    test_type,
                    description,
                    &(i + 1).to_string(),
                    step.action.as_str(),
                    expected,
                ])
                .map_err(|e| AppError::Internal(format!("CSV write failed: {}", e)))?;
        }
    }

    writer_to_string(writer)
}

/// Regenerate the markdown rendering from the structured fields.
pub fn test_case_to_markdown(test_case: &TestCase) -> String {
    let mut out = format!("# {}\n\n{}\n\n## Steps\n", test_case.title, test_case.description);
    for (i, step) in test_case.steps.iter().enumerate() {
        out.push_str(&format!("{}. {}\n", i + 1, step.action));
    }
    out.push_str(&format!(
        "\n## Expected Result\n{}\n",
        test_case.expected_result()
    ));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{TestStep, TestType};
    use chrono::Utc;

    fn three_step_case() -> TestCase {
        TestCase {
            test_case_id: None,
            story_id: "story-1".into(),
            title: "Verify password reset".into(),
            description: "Happy path reset".into(),
            steps: vec![
                TestStep {
                    action: "Open reset page".into(),
                    expected: String::new(),
                },
                TestStep {
                    action: "Enter registered email".into(),
                    expected: String::new(),
                },
                TestStep {
                    action: "Submit the form".into(),
                    expected: "A reset link is emailed".into(),
                },
            ],
            test_type: TestType::Positive,
            test_case_text: String::new(),
            test_case_csv: None,
            embedding: None,
            generated_at: Utc::now(),
        }
    }

    #[test]
    fn csv_has_expected_only_in_last_row() {
        let csv_text = test_case_to_csv(&three_step_case()).unwrap();
        let lines: Vec<&str> = csv_text.trim().lines().collect();
        assert_eq!(lines.len(), 4); // header + 3 data rows
        assert_eq!(lines[0], "Step,Description,Expected Result");
        assert!(lines[1].ends_with(","));
        assert!(lines[2].ends_with(","));
        assert!(lines[3].ends_with("A reset link is emailed"));
    }

    #[test]
    fn combined_csv_repeats_title_only_on_first_row() {
        let mut second = three_step_case();
        second.test_case_id = Some("TC-77".into());
        let csv_text = test_cases_to_csv(&[three_step_case(), second]).unwrap();
        let lines: Vec<&str> = csv_text.trim().lines().collect();
        assert_eq!(lines.len(), 7); // header + 3 + 3
        assert!(lines[1].starts_with("TC1,Verify password reset,positive,"));
        assert!(lines[2].starts_with("TC1,,,,2,"));
        assert!(lines[4].starts_with("TC-77,Verify password reset,"));
    }

    #[test]
    fn markdown_round_trips_through_parser() {
        let case = three_step_case();
        let md = test_case_to_markdown(&case);
        let reparsed =
            crate::application::use_cases::test_case_parser::parse_section(&md, "story-1").unwrap();
        assert_eq!(reparsed.title, case.title);
        assert_eq!(reparsed.steps.len(), 3);
        assert_eq!(reparsed.expected_result(), "A reset link is emailed");
    }
}
