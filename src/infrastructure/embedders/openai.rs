use super::EmbeddingBackend;
use crate::domain::error::{AppError, Result};
use crate::domain::llm_config::EmbeddingConfig;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

/// Rate limits and server-side failures are transient: they go to
/// `Connection` so the retry loop picks them up. Client errors (bad key,
/// bad model) never will.
fn status_error(status: StatusCode, url: &str, body: &str) -> AppError {
    let message = format!(
        "Embedding API returned error {} (URL: {}): {}",
        status, url, body
    );
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        AppError::Connection(message)
    } else {
        AppError::EmbeddingError(message)
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: EmbeddingInput<'a>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum EmbeddingInput<'a> {
    Single(&'a str),
    Batch(&'a [String]),
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

/// Remote embedding backend speaking the OpenAI `/embeddings` dialect.
pub struct OpenAiEmbedder {
    client: Client,
    config: EmbeddingConfig,
}

impl OpenAiEmbedder {
    pub fn new(config: EmbeddingConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(60))
                .build()
                .unwrap_or_else(|_| Client::new()),
            config,
        }
    }

    fn endpoint(&self) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        format!("{}/embeddings", base)
    }

    async fn request(&self, input: EmbeddingInput<'_>) -> Result<Vec<EmbeddingData>> {
        let url = self.endpoint();
        let request = EmbeddingRequest {
            model: &self.config.model,
            input,
        };

        let mut req = self.client.post(&url);
        if let Some(api_key) = &self.config.api_key {
            req = req.bearer_auth(api_key);
        }

        let response = req
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(status_error(status, &url, &error_text));
        }

        let body: EmbeddingResponse = response.json().await.map_err(|e| {
            AppError::EmbeddingError(format!("Failed to parse embedding response: {}", e))
        })?;

        if body.data.is_empty() {
            return Err(AppError::EmbeddingError(
                "Empty embedding response".to_string(),
            ));
        }

        Ok(body.data)
    }
}

#[async_trait]
impl EmbeddingBackend for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let data = self.request(EmbeddingInput::Single(text)).await?;
        let embedding = data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| AppError::EmbeddingError("No embedding data in response".to_string()))?;
        if embedding.is_empty() {
            return Err(AppError::EmbeddingError(
                "Empty embedding response".to_string(),
            ));
        }
        Ok(embedding)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let mut data = self.request(EmbeddingInput::Batch(texts)).await?;
        if data.len() != texts.len() {
            return Err(AppError::EmbeddingError(format!(
                "Embedding API returned {} vectors for {} inputs",
                data.len(),
                texts.len()
            )));
        }
        // The API reports an index per item; order by it rather than trusting
        // response order.
        data.sort_by_key(|d| d.index);
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_status_is_transient() {
        let err = status_error(StatusCode::TOO_MANY_REQUESTS, "http://x/embeddings", "slow down");
        assert!(err.is_transient());
        assert!(matches!(err, AppError::Connection(_)));
    }

    #[test]
    fn server_error_status_is_transient() {
        assert!(status_error(StatusCode::SERVICE_UNAVAILABLE, "http://x/embeddings", "").is_transient());
        assert!(status_error(StatusCode::BAD_GATEWAY, "http://x/embeddings", "").is_transient());
    }

    #[test]
    fn client_error_status_is_not_transient() {
        let err = status_error(StatusCode::UNAUTHORIZED, "http://x/embeddings", "bad key");
        assert!(!err.is_transient());
        assert!(matches!(err, AppError::EmbeddingError(_)));
    }
}
