use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration as StdDuration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, CONTENT_TYPE, RETRY_AFTER};
use reqwest::StatusCode;
use serde_json::Value as JsonValue;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{ApiError, AppError, AppResult};
use crate::models::transport::{
    ApiRequest, ApiResponse, RateLimitInfo, RequestAttemptMetric, ResponseBody,
};
use crate::services::config::{ClientConfig, RetryPolicy};
use crate::utils::redact::redact_sensitive_data;
use crate::utils::time::{parse_http_date, seconds_until};

const HEADER_REQUEST_ID: &str = "X-Request-Id";
const HEADER_RATE_LIMIT: &str = "x-ratelimit-limit";
const HEADER_RATE_REMAINING: &str = "x-ratelimit-remaining";
const HEADER_RATE_RESET: &str = "x-ratelimit-reset";

/// Supplies the bearer credential. Login and refresh live elsewhere.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn token(&self) -> Option<String>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoAuth;

#[async_trait]
impl AuthProvider for NoAuth {
    async fn token(&self) -> Option<String> {
        None
    }
}

#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl AuthProvider for StaticTokenProvider {
    async fn token(&self) -> Option<String> {
        let trimmed = self.token.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }
}

/// Receives one metric per physical attempt.
pub trait MetricsSink: Send + Sync {
    fn record(&self, metric: RequestAttemptMetric);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMetricsSink;

impl MetricsSink for TracingMetricsSink {
    fn record(&self, metric: RequestAttemptMetric) {
        debug!(
            target: "app::transport::metrics",
            endpoint = %metric.endpoint,
            method = %metric.method,
            status = metric.status,
            duration_ms = metric.duration_ms,
            attempt = metric.attempt,
            correlation_id = %metric.correlation_id,
            error = ?metric.error,
            "request attempt"
        );
    }
}

#[derive(Debug, Default)]
pub struct InMemoryMetricsSink {
    metrics: Mutex<Vec<RequestAttemptMetric>>,
}

impl InMemoryMetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<RequestAttemptMetric> {
        self.metrics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.metrics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MetricsSink for InMemoryMetricsSink {
    fn record(&self, metric: RequestAttemptMetric) {
        self.metrics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(metric);
    }
}

/// Runs one logical request as up to `retry.attempts` physical attempts.
#[derive(Clone)]
pub struct ResilientClient {
    client: reqwest::Client,
    base_url: String,
    attempt_timeout: StdDuration,
    retry: RetryPolicy,
    auth: Arc<dyn AuthProvider>,
    metrics: Arc<dyn MetricsSink>,
}

impl ResilientClient {
    pub fn new(
        config: &ClientConfig,
        auth: Arc<dyn AuthProvider>,
        metrics: Arc<dyn MetricsSink>,
    ) -> AppResult<Self> {
        config.validate()?;

        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .pool_max_idle_per_host(2)
            .pool_idle_timeout(Some(StdDuration::from_secs(90)))
            .build()
            .map_err(|err| AppError::config(format!("failed to build HTTP client: {err}")))?;

        Ok(Self {
            client,
            base_url: config.normalized_base_url(),
            attempt_timeout: config.timeout(),
            retry: config.retry.clone(),
            auth,
            metrics,
        })
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn attempt_timeout(&self) -> StdDuration {
        self.attempt_timeout
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn request(&self, request: ApiRequest) -> AppResult<ApiResponse> {
        let correlation_id = Uuid::new_v4().to_string();
        self.execute(&request, &correlation_id)
            .await
            .map_err(|error| AppError::api(error, Some(correlation_id.as_str())))
    }

    async fn execute(
        &self,
        request: &ApiRequest,
        correlation_id: &str,
    ) -> Result<ApiResponse, ApiError> {
        let url = format!("{}{}", self.base_url, request.path);
        let attempts = self.retry.attempts.max(1);
        let payload = request
            .body
            .as_ref()
            .map(|body| {
                redact_sensitive_data(body)
                    .ok()
                    .and_then(|redacted| serde_json::to_string(&redacted).ok())
                    .unwrap_or_else(|| "\"<redacted>\"".to_string())
            })
            .unwrap_or_default();

        let mut attempt: u32 = 0;
        loop {
            debug!(
                target: "app::transport",
                method = %request.method,
                endpoint = %request.path,
                attempt = attempt + 1,
                attempts,
                correlation_id = %correlation_id,
                payload = %payload,
                "sending request"
            );

            let started = Instant::now();
            let outcome = self.attempt_once(request, &url, correlation_id).await;
            let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            self.emit_metric(request, attempt, correlation_id, duration_ms, &outcome);

            let error = match outcome {
                Ok(response) => {
                    debug!(
                        target: "app::transport",
                        correlation_id = %correlation_id,
                        status = response.status,
                        duration_ms,
                        "request succeeded"
                    );
                    return Ok(response);
                }
                Err(error) => error,
            };

            let retryable = error.is_retryable();
            let exhausted = attempt + 1 >= attempts;
            warn!(
                target: "app::transport",
                correlation_id = %correlation_id,
                endpoint = %request.path,
                status = error.status(),
                code = %error.code(),
                retryable,
                attempt = attempt + 1,
                "request attempt failed"
            );

            if !retryable || exhausted {
                return Err(error);
            }

            let delay = self.backoff_delay(attempt, &error);
            debug!(
                target: "app::transport",
                correlation_id = %correlation_id,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "backing off before retry"
            );
            sleep(delay).await;
            attempt += 1;
        }
    }

    async fn attempt_once(
        &self,
        request: &ApiRequest,
        url: &str,
        correlation_id: &str,
    ) -> Result<ApiResponse, ApiError> {
        let mut builder = self
            .client
            .request(request.method.clone(), url)
            .header(HEADER_REQUEST_ID, correlation_id);

        if let Some(token) = self.auth.token().await {
            builder = builder.bearer_auth(token);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let exchange = async {
            let response = builder.send().await.map_err(error_from_reqwest)?;
            read_response(response).await
        };

        // The deadline covers headers and body; dropping the future cancels the exchange.
        match timeout(self.attempt_timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(ApiError::Timeout {
                status: None,
                message: format!(
                    "request timed out after {} ms",
                    self.attempt_timeout.as_millis()
                ),
            }),
        }
    }

    fn backoff_delay(&self, attempt: u32, error: &ApiError) -> StdDuration {
        let backoff = self.retry.delay_for(attempt);
        match error.retry_after_secs() {
            Some(secs) => backoff
                .max(StdDuration::from_secs(secs))
                .min(self.retry.max_delay()),
            None => backoff,
        }
    }

    fn emit_metric(
        &self,
        request: &ApiRequest,
        attempt: u32,
        correlation_id: &str,
        duration_ms: u64,
        outcome: &Result<ApiResponse, ApiError>,
    ) {
        let (status, error) = match outcome {
            Ok(response) => (response.status, None),
            Err(error) => (error.status(), Some(error.to_string())),
        };

        self.metrics.record(RequestAttemptMetric {
            endpoint: request.path.clone(),
            method: request.method.to_string(),
            status,
            duration_ms,
            timestamp: Utc::now(),
            attempt: attempt + 1,
            correlation_id: correlation_id.to_string(),
            error,
        });
    }
}

async fn read_response(response: reqwest::Response) -> Result<ApiResponse, ApiError> {
    let status = response.status();
    let headers = response.headers().clone();
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();

    let bytes = response.bytes().await.map_err(error_from_reqwest)?;
    let data = parse_body(&content_type, &bytes);

    if status.is_success() {
        Ok(ApiResponse {
            data,
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
        })
    } else {
        Err(map_http_error(status, &headers, &data, Utc::now()))
    }
}

/// Decodes a body according to its content type.
pub fn parse_body(content_type: &str, bytes: &[u8]) -> ResponseBody {
    if bytes.is_empty() {
        return ResponseBody::Empty;
    }

    let is_json = content_type.contains("json");
    let is_text = content_type.starts_with("text/")
        || content_type.contains("xml")
        || content_type.contains("x-www-form-urlencoded");

    if is_json || content_type.is_empty() {
        if let Ok(value) = serde_json::from_slice::<JsonValue>(bytes) {
            return ResponseBody::Json(value);
        }
    }

    if is_json || is_text {
        return ResponseBody::Text(String::from_utf8_lossy(bytes).into_owned());
    }

    if content_type.is_empty() {
        if let Ok(text) = std::str::from_utf8(bytes) {
            return ResponseBody::Text(text.to_string());
        }
    }

    ResponseBody::Binary(bytes.to_vec())
}

/// Classifies a non-success response.
pub fn map_http_error(
    status: StatusCode,
    headers: &HeaderMap,
    body: &ResponseBody,
    now: DateTime<Utc>,
) -> ApiError {
    let code = status.as_u16();
    let message = body.message().unwrap_or_else(|| default_message(status));

    match code {
        400 => ApiError::Validation {
            message,
            field_errors: extract_field_errors(body),
        },
        401 | 403 => ApiError::Auth {
            status: code,
            message,
        },
        404 => ApiError::NotFound { message },
        408 => ApiError::Timeout {
            status: Some(code),
            message,
        },
        429 => {
            let limit = parse_rate_limit(headers);
            ApiError::RateLimited {
                retry_after_secs: parse_retry_after(headers, now),
                limit: (!limit.is_empty()).then_some(limit),
                message,
            }
        }
        500..=599 => ApiError::Server {
            status: code,
            message,
        },
        _ => ApiError::Unknown {
            status: code,
            message,
        },
    }
}

fn default_message(status: StatusCode) -> String {
    match status.canonical_reason() {
        Some(reason) => format!("request failed with status {} ({reason})", status.as_u16()),
        None => format!("request failed with status {}", status.as_u16()),
    }
}

fn error_from_reqwest(err: reqwest::Error) -> ApiError {
    if err.is_timeout() {
        ApiError::Timeout {
            status: None,
            message: format!("request timed out: {err}"),
        }
    } else if err.is_builder() {
        ApiError::Unknown {
            status: 0,
            message: format!("invalid request: {err}"),
        }
    } else {
        ApiError::Network {
            message: format!("network failure: {err}"),
        }
    }
}

/// `{"errors": {"field": "msg" | ["msg", ...]}}`, kept verbatim per field.
fn extract_field_errors(body: &ResponseBody) -> BTreeMap<String, Vec<String>> {
    let Some(errors) = body
        .as_json()
        .and_then(|value| value.get("errors"))
        .and_then(|value| value.as_object())
    else {
        return BTreeMap::new();
    };

    errors
        .iter()
        .map(|(field, value)| {
            let messages = match value {
                JsonValue::String(text) => vec![text.clone()],
                JsonValue::Array(items) => items
                    .iter()
                    .map(|item| match item {
                        JsonValue::String(text) => text.clone(),
                        other => other.to_string(),
                    })
                    .collect(),
                other => vec![other.to_string()],
            };
            (field.clone(), messages)
        })
        .collect()
}

/// `Retry-After` as delta-seconds or an HTTP date.
pub fn parse_retry_after(headers: &HeaderMap, now: DateTime<Utc>) -> Option<u64> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(secs);
    }
    parse_http_date(raw).map(|at| seconds_until(at, now))
}

pub fn parse_rate_limit(headers: &HeaderMap) -> RateLimitInfo {
    let number = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok())
    };

    RateLimitInfo {
        limit: number(HEADER_RATE_LIMIT),
        remaining: number(HEADER_RATE_REMAINING),
        reset: number(HEADER_RATE_RESET),
    }
}
