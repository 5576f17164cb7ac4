use crate::domain::error::{AppError, Result};
use crate::domain::models::TestCase;
use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

/// Outbound boundary to an external work-item system. Given generated test
/// cases, creates corresponding work items linked to the originating story
/// and returns the externally-assigned IDs in input order.
#[async_trait]
pub trait WorkTracker: Send + Sync {
    async fn create_test_cases(
        &self,
        story_id: &str,
        test_cases: &[TestCase],
    ) -> Result<Vec<String>>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct AzureDevOpsConfig {
    pub organization: String,
    pub project: String,
    pub personal_access_token: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
}

fn default_api_version() -> String {
    "7.0".to_string()
}

#[derive(Deserialize)]
struct WorkItemResponse {
    id: u64,
}

/// Thin Azure DevOps client: creates Test Case work items and links each
/// back to its user story. Field mapping beyond title/description is out of
/// scope.
pub struct AzureDevOpsClient {
    client: Client,
    config: AzureDevOpsConfig,
}

impl AzureDevOpsClient {
    pub fn new(config: AzureDevOpsConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| Client::new()),
            config,
        }
    }

    fn auth_header(&self) -> String {
        let token = base64::engine::general_purpose::STANDARD
            .encode(format!(":{}", self.config.personal_access_token));
        format!("Basic {}", token)
    }

    fn story_url(&self, story_id: &str) -> String {
        format!(
            "https://dev.azure.com/{}/{}/_apis/wit/workItems/{}",
            self.config.organization, self.config.project, story_id
        )
    }

    async fn create_one(&self, story_id: &str, test_case: &TestCase) -> Result<String> {
        let url = format!(
            "https://dev.azure.com/{}/{}/_apis/wit/workitems/$Test%20Case?api-version={}",
            self.config.organization, self.config.project, self.config.api_version
        );

        let patch = json!([
            {
                "op": "add",
                "path": "/fields/System.Title",
                "value": test_case.title
            },
            {
                "op": "add",
                "path": "/fields/System.Description",
                "value": test_case.test_case_text
            },
            {
                "op": "add",
                "path": "/relations/-",
                "value": {
                    "rel": "Microsoft.VSTS.Common.TestedBy-Reverse",
                    "url": self.story_url(story_id)
                }
            }
        ]);

        let response = self
            .client
            .post(&url)
            .header("Authorization", self.auth_header())
            .header("Content-Type", "application/json-patch+json")
            .json(&patch)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::Internal(format!(
                "Work item creation failed: HTTP {} {}",
                status, text
            )));
        }

        let created: WorkItemResponse = response
            .json()
            .await
            .map_err(|e| AppError::Internal(format!("Bad work item response: {}", e)))?;
        Ok(created.id.to_string())
    }
}

#[async_trait]
impl WorkTracker for AzureDevOpsClient {
    async fn create_test_cases(
        &self,
        story_id: &str,
        test_cases: &[TestCase],
    ) -> Result<Vec<String>> {
        let mut ids = Vec::with_capacity(test_cases.len());
        for test_case in test_cases {
            let id = self.create_one(story_id, test_case).await?;
            info!(story_id, work_item_id = %id, "created test case work item");
            ids.push(id);
        }
        Ok(ids)
    }
}
