pub mod config;
pub mod http_client;
pub mod orchestrator;
pub mod slot_ranker;
pub mod suggestion_api;
pub mod workflow;
