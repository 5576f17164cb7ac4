use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Serialize, Deserialize)]
pub enum AppError {
    Internal(String),
    ParseError(String),
    LLMError(String),
    EmbeddingError(String),
    VectorStoreError(String),
    /// Connection-class failure (timeout, refused, reset, rate limited).
    /// The only retryable variant.
    Connection(String),
    ConfigError(String),
}

impl AppError {
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::Connection(_))
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::ParseError(msg) => write!(f, "Parse error: {}", msg),
            AppError::LLMError(msg) => write!(f, "LLM error: {}", msg),
            AppError::EmbeddingError(msg) => write!(f, "Embedding error: {}", msg),
            AppError::VectorStoreError(msg) => write!(f, "Vector store error: {}", msg),
            AppError::Connection(msg) => write!(f, "Connection error: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Config error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            AppError::Connection(err.to_string())
        } else {
            AppError::Internal(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
