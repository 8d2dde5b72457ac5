//! Suggestion workflow engine: request scheduling slots, rank and compare
//! them, and commit one, over a retrying HTTP transport.

pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use error::{ApiError, ApiErrorCode, AppError, AppResult};
pub use models::suggestion::{AiSuggestion, ConfidenceLevel, ManualInput, SuggestedSlot};
pub use models::workflow::{WorkflowError, WorkflowState, WorkflowStep};
pub use services::config::{ClientConfig, RetryPolicy, WorkflowConfig};
pub use services::http_client::{AuthProvider, MetricsSink, ResilientClient};
pub use services::orchestrator::{AnalyticsSink, AutoAdvanceHandle, SuggestionOrchestrator};
pub use services::suggestion_api::{HttpSuggestionTransport, SuggestionTransport};
pub use services::workflow::WorkflowStateMachine;
