use crate::domain::error::{AppError, Result};
use crate::domain::llm_config::{EmbeddingConfig, LLMConfig};
use crate::infrastructure::vector_store::VectorBackend;
use crate::infrastructure::work_tracker::AzureDevOpsConfig;
use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrievalLimits {
    pub similar_stories: usize,
    pub similar_test_cases: usize,
    pub max_revisions: u32,
}

impl Default for RetrievalLimits {
    fn default() -> Self {
        Self {
            similar_stories: 3,
            similar_test_cases: 5,
            max_revisions: 2,
        }
    }
}

fn default_vector_backend() -> VectorBackend {
    VectorBackend::Memory
}

fn default_vector_db_url() -> String {
    "http://localhost:6333".to_string()
}

/// Application settings, merged from an optional `testgen.toml` and
/// `TESTGEN_`-prefixed environment variables (env wins). Nested fields use
/// `__` in the environment, e.g. `TESTGEN_LLM__API_KEY`.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_vector_backend")]
    pub vector_backend: VectorBackend,
    #[serde(default = "default_vector_db_url")]
    pub vector_db_url: String,
    #[serde(default)]
    pub llm: LLMConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub limits: RetrievalLimits,
    /// Export is optional; absent credentials disable it.
    #[serde(default)]
    pub azure_devops: Option<AzureDevOpsConfig>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            vector_backend: default_vector_backend(),
            vector_db_url: default_vector_db_url(),
            llm: LLMConfig::default(),
            embedding: EmbeddingConfig::default(),
            limits: RetrievalLimits::default(),
            azure_devops: None,
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Figment::new()
            .merge(Toml::file("testgen.toml"))
            .merge(Env::prefixed("TESTGEN_").split("__"))
            .extract()
            .map_err(|e| AppError::ConfigError(e.to_string()))
    }
}
