pub mod api;
pub mod ranking;
pub mod suggestion;
pub mod transport;
pub mod workflow;
