pub mod config;
pub mod embedders;
pub mod llm_clients;
pub mod vector_store;
pub mod work_tracker;
