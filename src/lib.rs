//! Test case generation agent: a retrieval-augmented pipeline that turns
//! software user stories into structured QA test cases.
//!
//! A [`pipeline::ProcessPipeline`](application::use_cases::pipeline::ProcessPipeline)
//! embeds an incoming story, retrieves similar stories and previously
//! generated test cases from a vector store, runs a bounded
//! generate/critique/revise loop against an LLM, persists the results, and
//! optionally exports them to a work tracker.

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::use_cases::agent::TestCaseGenerator;
pub use application::use_cases::embedding_service::EmbeddingService;
pub use application::use_cases::pipeline::ProcessPipeline;
pub use domain::error::{AppError, Result};
pub use domain::models::{ProcessReport, TestCase, UserStory, UserStoryEvent};
pub use infrastructure::config::Settings;
pub use infrastructure::vector_store::{build_vector_store, VectorStore};

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber. `RUST_LOG` overrides the default
/// `info` level. Safe to call once per process; later calls are ignored.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
