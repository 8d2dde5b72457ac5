use std::time::Duration as StdDuration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{AppError, AppResult};

const ENV_BASE_URL: &str = "SLOTFLOW_API_BASE_URL";
const ENV_ENVIRONMENT: &str = "SLOTFLOW_ENV";
const ENV_TIMEOUT_MS: &str = "SLOTFLOW_HTTP_TIMEOUT_MS";
const ENV_RETRY_ATTEMPTS: &str = "SLOTFLOW_RETRY_ATTEMPTS";
const ENV_RETRY_BASE_DELAY_MS: &str = "SLOTFLOW_RETRY_BASE_DELAY_MS";

const DEFAULT_BASE_URL: &str = "http://localhost:8080/api";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentEnvironment {
    #[default]
    Development,
    Staging,
    Production,
}

impl DeploymentEnvironment {
    pub fn default_timeout(self) -> StdDuration {
        match self {
            DeploymentEnvironment::Development => StdDuration::from_secs(60),
            DeploymentEnvironment::Staging => StdDuration::from_secs(45),
            DeploymentEnvironment::Production => StdDuration::from_secs(30),
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Some(DeploymentEnvironment::Development),
            "staging" | "stage" => Some(DeploymentEnvironment::Staging),
            "production" | "prod" => Some(DeploymentEnvironment::Production),
            _ => None,
        }
    }
}

/// Capped exponential backoff between physical attempts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay_ms: 1_000,
            multiplier: 2.0,
            max_delay_ms: 10_000,
        }
    }
}

impl RetryPolicy {
    /// `min(base * multiplier^attempt, max)`, `attempt` counting from zero.
    pub fn delay_for(&self, attempt: u32) -> StdDuration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw = self.base_delay_ms as f64 * self.multiplier.powi(exponent);
        let capped = if raw.is_finite() {
            raw.min(self.max_delay_ms as f64)
        } else {
            self.max_delay_ms as f64
        };
        StdDuration::from_millis(capped.max(0.0) as u64)
    }

    pub fn max_delay(&self) -> StdDuration {
        StdDuration::from_millis(self.max_delay_ms)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.attempts == 0 {
            return Err(AppError::config("retry attempts must be at least 1"));
        }
        if self.multiplier.is_nan() || self.multiplier < 1.0 {
            return Err(AppError::config("retry multiplier must be >= 1.0"));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(AppError::config(
                "retry max delay must not be below the base delay",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AcceptStyle {
    /// `PATCH {status_path}` with `status = accepted`.
    #[default]
    Patch,
    /// `POST {accept_path}`, used by the alternate backend.
    Post,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct EndpointConfig {
    pub generate_path: String,
    pub status_path: String,
    pub accept_path: String,
    pub accept_style: AcceptStyle,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            generate_path: "/ai-suggestions/generate".to_string(),
            status_path: "/ai-suggestions/{id}/status".to_string(),
            accept_path: "/ai-suggestions/{id}/accept".to_string(),
            accept_style: AcceptStyle::Patch,
        }
    }
}

impl EndpointConfig {
    pub fn status_path_for(&self, suggestion_id: &str) -> String {
        self.status_path.replace("{id}", suggestion_id)
    }

    pub fn accept_path_for(&self, suggestion_id: &str) -> String {
        self.accept_path.replace("{id}", suggestion_id)
    }

    pub fn validate(&self) -> AppResult<()> {
        if !self.generate_path.starts_with('/') {
            return Err(AppError::config("generate path must start with '/'"));
        }
        if !self.status_path.contains("{id}") {
            return Err(AppError::config("status path must contain an {id} placeholder"));
        }
        if self.accept_style == AcceptStyle::Post && !self.accept_path.contains("{id}") {
            return Err(AppError::config("accept path must contain an {id} placeholder"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConfig {
    pub base_url: String,
    pub environment: DeploymentEnvironment,
    /// Overrides the environment's default attempt timeout.
    pub timeout_ms: Option<u64>,
    pub retry: RetryPolicy,
    pub endpoints: EndpointConfig,
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            environment: DeploymentEnvironment::default(),
            timeout_ms: None,
            retry: RetryPolicy::default(),
            endpoints: EndpointConfig::default(),
            user_agent: concat!("slotflow-core/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(value) = std::env::var(ENV_BASE_URL) {
            if !value.trim().is_empty() {
                config.base_url = value.trim().to_string();
            }
        }

        if let Ok(value) = std::env::var(ENV_ENVIRONMENT) {
            match DeploymentEnvironment::parse(&value) {
                Some(environment) => config.environment = environment,
                None => warn!(target: "app::config", %value, "unknown deployment environment, keeping default"),
            }
        }

        if let Some(timeout_ms) = env_number::<u64>(ENV_TIMEOUT_MS) {
            config.timeout_ms = Some(timeout_ms);
        }
        if let Some(attempts) = env_number::<u32>(ENV_RETRY_ATTEMPTS) {
            config.retry.attempts = attempts;
        }
        if let Some(base_delay_ms) = env_number::<u64>(ENV_RETRY_BASE_DELAY_MS) {
            config.retry.base_delay_ms = base_delay_ms;
            config.retry.max_delay_ms = config.retry.max_delay_ms.max(base_delay_ms);
        }

        config
    }

    pub fn timeout(&self) -> StdDuration {
        self.timeout_ms
            .map(StdDuration::from_millis)
            .unwrap_or_else(|| self.environment.default_timeout())
    }

    pub fn normalized_base_url(&self) -> String {
        self.base_url.trim_end_matches('/').to_string()
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.base_url.trim().is_empty() {
            return Err(AppError::config("base URL must not be empty"));
        }
        if self.timeout_ms == Some(0) {
            return Err(AppError::config("timeout must be greater than zero"));
        }
        self.retry.validate()?;
        self.endpoints.validate()
    }
}

fn env_number<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(target: "app::config", key, value = %raw, "ignoring malformed numeric setting");
            None
        }
    }
}

/// Knobs for the orchestrator, independent of transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkflowConfig {
    pub auto_advance_delay_ms: u64,
    pub timezone: String,
    pub suggestion_type: String,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            auto_advance_delay_ms: 3_000,
            timezone: "UTC".to_string(),
            suggestion_type: "manual".to_string(),
        }
    }
}

impl WorkflowConfig {
    pub fn auto_advance_delay(&self) -> StdDuration {
        StdDuration::from_millis(self.auto_advance_delay_ms)
    }
}
