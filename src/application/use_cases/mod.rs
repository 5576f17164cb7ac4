pub mod agent;
pub mod csv_writer;
pub mod embedding_cache;
pub mod embedding_service;
pub mod pipeline;
pub mod prompts;
pub mod test_case_parser;
