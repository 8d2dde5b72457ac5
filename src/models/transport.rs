use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;

/// One logical request handed to the resilient client.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<JsonValue>,
    pub headers: Vec<(String, String)>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            headers: Vec::new(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn with_json(mut self, body: JsonValue) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Json(JsonValue),
    Text(String),
    Binary(Vec<u8>),
    Empty,
}

impl ResponseBody {
    pub fn as_json(&self) -> Option<&JsonValue> {
        match self {
            ResponseBody::Json(value) => Some(value),
            _ => None,
        }
    }

    /// Human-readable message carried by an error body, if any.
    pub fn message(&self) -> Option<String> {
        match self {
            ResponseBody::Json(value) => ["message", "error", "detail"]
                .iter()
                .find_map(|key| value.get(*key).and_then(|v| v.as_str()))
                .map(|text| text.to_string()),
            ResponseBody::Text(text) => {
                let trimmed = text.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            ResponseBody::Binary(_) | ResponseBody::Empty => None,
        }
    }
}

/// Normalized envelope for a successful response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub data: ResponseBody,
    pub status: u16,
    pub status_text: String,
    pub headers: HeaderMap,
}

impl ApiResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        match &self.data {
            ResponseBody::Json(value) => T::deserialize(value),
            ResponseBody::Text(text) => serde_json::from_str(text),
            ResponseBody::Binary(bytes) => serde_json::from_slice(bytes),
            ResponseBody::Empty => T::deserialize(&JsonValue::Null),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitInfo {
    pub limit: Option<u64>,
    pub remaining: Option<u64>,
    pub reset: Option<u64>,
}

impl RateLimitInfo {
    pub fn is_empty(&self) -> bool {
        self.limit.is_none() && self.remaining.is_none() && self.reset.is_none()
    }
}

/// Emitted once per physical attempt, retries included.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RequestAttemptMetric {
    pub endpoint: String,
    pub method: String,
    /// `0` when the attempt produced no response.
    pub status: u16,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
    pub attempt: u32,
    pub correlation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
