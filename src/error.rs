use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::models::transport::RateLimitInfo;
use crate::models::workflow::WorkflowStep;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApiErrorCode {
    Validation,
    Auth,
    Network,
    Timeout,
    RateLimited,
    NotFound,
    Server,
    Unknown,
}

impl ApiErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ApiErrorCode::Validation => "VALIDATION_ERROR",
            ApiErrorCode::Auth => "AUTH_ERROR",
            ApiErrorCode::Network => "NETWORK_ERROR",
            ApiErrorCode::Timeout => "TIMEOUT",
            ApiErrorCode::RateLimited => "RATE_LIMITED",
            ApiErrorCode::NotFound => "NOT_FOUND",
            ApiErrorCode::Server => "SERVER_ERROR",
            ApiErrorCode::Unknown => "UNKNOWN_ERROR",
        }
    }
}

impl fmt::Display for ApiErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a single logical request, after the transport gave up.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ApiError {
    #[error("{message}")]
    Validation {
        message: String,
        field_errors: BTreeMap<String, Vec<String>>,
    },

    #[error("{message}")]
    Auth { status: u16, message: String },

    #[error("{message}")]
    Network { message: String },

    /// `status` is `Some(408)` when the server timed out, `None` when the
    /// attempt deadline fired locally.
    #[error("{message}")]
    Timeout { status: Option<u16>, message: String },

    #[error("{message}")]
    RateLimited {
        retry_after_secs: Option<u64>,
        limit: Option<RateLimitInfo>,
        message: String,
    },

    #[error("{message}")]
    NotFound { message: String },

    #[error("{message}")]
    Server { status: u16, message: String },

    #[error("{message}")]
    Unknown { status: u16, message: String },
}

impl ApiError {
    pub fn code(&self) -> ApiErrorCode {
        match self {
            ApiError::Validation { .. } => ApiErrorCode::Validation,
            ApiError::Auth { .. } => ApiErrorCode::Auth,
            ApiError::Network { .. } => ApiErrorCode::Network,
            ApiError::Timeout { .. } => ApiErrorCode::Timeout,
            ApiError::RateLimited { .. } => ApiErrorCode::RateLimited,
            ApiError::NotFound { .. } => ApiErrorCode::NotFound,
            ApiError::Server { .. } => ApiErrorCode::Server,
            ApiError::Unknown { .. } => ApiErrorCode::Unknown,
        }
    }

    /// HTTP status of the failed attempt, `0` when no response arrived.
    pub fn status(&self) -> u16 {
        match self {
            ApiError::Validation { .. } => 400,
            ApiError::Auth { status, .. } => *status,
            ApiError::Network { .. } => 0,
            ApiError::Timeout { status, .. } => status.unwrap_or(0),
            ApiError::RateLimited { .. } => 429,
            ApiError::NotFound { .. } => 404,
            ApiError::Server { status, .. } => *status,
            ApiError::Unknown { status, .. } => *status,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Network { .. } | ApiError::Timeout { .. } | ApiError::RateLimited { .. } => {
                true
            }
            ApiError::Server { status, .. } => matches!(status, 502 | 503 | 504),
            ApiError::Validation { .. }
            | ApiError::Auth { .. }
            | ApiError::NotFound { .. }
            | ApiError::Unknown { .. } => false,
        }
    }

    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            ApiError::RateLimited {
                retry_after_secs, ..
            } => *retry_after_secs,
            _ => None,
        }
    }

    pub fn field_errors(&self) -> Option<&BTreeMap<String, Vec<String>>> {
        match self {
            ApiError::Validation { field_errors, .. } => Some(field_errors),
            _ => None,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ApiError::Validation { message, .. }
            | ApiError::Auth { message, .. }
            | ApiError::Network { message }
            | ApiError::Timeout { message, .. }
            | ApiError::RateLimited { message, .. }
            | ApiError::NotFound { message }
            | ApiError::Server { message, .. }
            | ApiError::Unknown { message, .. } => message,
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
        details: Option<JsonValue>,
    },

    #[error("{error}")]
    Api {
        error: ApiError,
        correlation_id: Option<String>,
    },

    #[error("cannot {action} while in step '{from}'")]
    InvalidTransition {
        from: WorkflowStep,
        action: &'static str,
    },

    #[error("{operation} is already in progress")]
    Busy { operation: &'static str },

    #[error("no previous {operation} request to retry")]
    NothingToRetry { operation: &'static str },

    #[error("{operation} was superseded by a newer request")]
    Superseded { operation: &'static str },

    #[error("configuration error: {message}")]
    Config { message: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        let message = message.into();
        warn!(target: "app::validation", %message, "validation error");
        AppError::Validation {
            message,
            field: None,
            details: None,
        }
    }

    pub fn validation_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        let field = field.into();
        let message = message.into();
        warn!(target: "app::validation", %field, %message, "field validation error");
        AppError::Validation {
            message,
            field: Some(field),
            details: None,
        }
    }

    pub fn validation_with_details(message: impl Into<String>, details: JsonValue) -> Self {
        let message = message.into();
        warn!(target: "app::validation", %message, details = %details, "validation error with details");
        AppError::Validation {
            message,
            field: None,
            details: Some(details),
        }
    }

    pub fn api(error: ApiError, correlation_id: Option<&str>) -> Self {
        let correlation = correlation_id.map(|value| value.to_string());
        match &correlation {
            Some(id) => warn!(
                target: "app::error",
                code = %error.code(),
                status = error.status(),
                correlation_id = %id,
                message = %error
            ),
            None => warn!(
                target: "app::error",
                code = %error.code(),
                status = error.status(),
                message = %error
            ),
        }
        AppError::Api {
            error,
            correlation_id: correlation,
        }
    }

    pub fn invalid_transition(from: WorkflowStep, action: &'static str) -> Self {
        warn!(target: "app::workflow", from = %from, action, "rejected workflow transition");
        AppError::InvalidTransition { from, action }
    }

    pub fn busy(operation: &'static str) -> Self {
        warn!(target: "app::orchestrator", operation, "operation already in flight");
        AppError::Busy { operation }
    }

    pub fn nothing_to_retry(operation: &'static str) -> Self {
        debug!(target: "app::orchestrator", operation, "retry requested without a remembered request");
        AppError::NothingToRetry { operation }
    }

    pub fn superseded(operation: &'static str) -> Self {
        debug!(target: "app::orchestrator", operation, "dropping response of a superseded request");
        AppError::Superseded { operation }
    }

    pub fn config(message: impl Into<String>) -> Self {
        let message = message.into();
        error!(target: "app::config", %message, "configuration error");
        AppError::Config { message }
    }

    pub fn other(message: impl Into<String>) -> Self {
        let message = message.into();
        error!(target: "app::other", %message, "other error");
        AppError::Other(message)
    }

    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            AppError::Api { error, .. } => Some(error),
            _ => None,
        }
    }

    pub fn api_code(&self) -> Option<ApiErrorCode> {
        self.api_error().map(ApiError::code)
    }

    pub fn correlation_id(&self) -> Option<&str> {
        match self {
            AppError::Api { correlation_id, .. } => correlation_id.as_deref(),
            _ => None,
        }
    }

    /// Whether a business retry of the same request can reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        self.api_error().map(ApiError::is_retryable).unwrap_or(false)
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation { .. } => "VALIDATION_ERROR",
            AppError::Api { error, .. } => error.code().as_str(),
            AppError::InvalidTransition { .. } => "INVALID_TRANSITION",
            AppError::Busy { .. } => "BUSY",
            AppError::NothingToRetry { .. } => "NOTHING_TO_RETRY",
            AppError::Superseded { .. } => "SUPERSEDED",
            AppError::Config { .. } => "CONFIG_ERROR",
            AppError::Serialization(_) | AppError::Io(_) | AppError::Other(_) => "UNKNOWN",
        }
    }

    /// Short text shown to the user when the workflow lands in the error step.
    pub fn user_message(&self) -> String {
        match self {
            AppError::Validation { message, .. } => message.clone(),
            AppError::Api { error, .. } => api_user_message(error),
            AppError::InvalidTransition { .. } => "This action is not available right now.".into(),
            AppError::Busy { .. } => "A request is already in progress.".into(),
            AppError::NothingToRetry { .. } => "There is no previous request to retry.".into(),
            AppError::Superseded { .. } => "This request was replaced by a newer one.".into(),
            AppError::Config { .. }
            | AppError::Serialization(_)
            | AppError::Io(_)
            | AppError::Other(_) => "Something went wrong. Please try again.".into(),
        }
    }
}

fn api_user_message(error: &ApiError) -> String {
    match error {
        ApiError::Validation {
            message,
            field_errors,
        } => {
            if field_errors.is_empty() {
                message.clone()
            } else {
                let fields = field_errors.keys().cloned().collect::<Vec<_>>().join(", ");
                format!("Please check the following fields: {fields}.")
            }
        }
        ApiError::Auth { .. } => {
            "Your session has expired or you lack permission. Please sign in again.".into()
        }
        ApiError::Network { .. } => {
            "Unable to reach the scheduling service. Check your connection and try again.".into()
        }
        ApiError::Timeout { .. } => {
            "The scheduling service took too long to respond. Please try again.".into()
        }
        ApiError::RateLimited {
            retry_after_secs, ..
        } => match retry_after_secs {
            Some(secs) => format!(
                "Too many requests. Please wait {} before trying again.",
                humanize_wait(*secs)
            ),
            None => "Too many requests. Please wait a moment before trying again.".into(),
        },
        ApiError::NotFound { .. } => "This suggestion no longer exists.".into(),
        ApiError::Server { .. } => {
            "The scheduling service is temporarily unavailable. Please try again later.".into()
        }
        ApiError::Unknown { .. } => "Something went wrong. Please try again.".into(),
    }
}

fn humanize_wait(secs: u64) -> String {
    if secs < 120 {
        format!("{secs} seconds")
    } else {
        format!("{} minutes", secs.div_ceil(60))
    }
}

impl From<ApiError> for AppError {
    fn from(error: ApiError) -> Self {
        AppError::api(error, None)
    }
}
