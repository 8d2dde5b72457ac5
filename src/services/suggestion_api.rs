use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::error::{AppError, AppResult};
use crate::models::api::{
    BackendSuggestion, GenerateSuggestionRequest, GenerateSuggestionResponse,
    StatusUpdateResponse, SuggestionStatusUpdate,
};
use crate::models::suggestion::SuggestionStatus;
use crate::models::transport::{ApiRequest, ApiResponse};
use crate::services::config::{AcceptStyle, ClientConfig, EndpointConfig};
use crate::services::http_client::{AuthProvider, MetricsSink, ResilientClient};

/// The two backend calls the workflow depends on.
#[async_trait]
pub trait SuggestionTransport: Send + Sync {
    async fn generate(&self, request: &GenerateSuggestionRequest) -> AppResult<BackendSuggestion>;

    async fn update_status(
        &self,
        suggestion_id: &str,
        update: &SuggestionStatusUpdate,
    ) -> AppResult<StatusUpdateResponse>;
}

pub struct HttpSuggestionTransport {
    client: ResilientClient,
    endpoints: EndpointConfig,
}

impl HttpSuggestionTransport {
    pub fn new(client: ResilientClient, endpoints: EndpointConfig) -> Self {
        Self { client, endpoints }
    }

    pub fn from_config(
        config: &ClientConfig,
        auth: Arc<dyn AuthProvider>,
        metrics: Arc<dyn MetricsSink>,
    ) -> AppResult<Self> {
        let client = ResilientClient::new(config, auth, metrics)?;
        Ok(Self::new(client, config.endpoints.clone()))
    }

    pub fn endpoints(&self) -> &EndpointConfig {
        &self.endpoints
    }

    fn status_request(&self, suggestion_id: &str, update: &SuggestionStatusUpdate) -> AppResult<ApiRequest> {
        let body = serde_json::to_value(update)?;
        let request = match (update.status, self.endpoints.accept_style) {
            (SuggestionStatus::Accepted, AcceptStyle::Post) => {
                ApiRequest::post(self.endpoints.accept_path_for(suggestion_id))
            }
            _ => ApiRequest::patch(self.endpoints.status_path_for(suggestion_id)),
        };
        Ok(request.with_json(body))
    }
}

#[async_trait]
impl SuggestionTransport for HttpSuggestionTransport {
    async fn generate(&self, request: &GenerateSuggestionRequest) -> AppResult<BackendSuggestion> {
        let body = serde_json::to_value(request)?;
        let response = self
            .client
            .request(ApiRequest::post(self.endpoints.generate_path.clone()).with_json(body))
            .await?;

        let suggestion = parse_generate_response(&response)?;
        debug!(
            target: "app::transport",
            suggestion_id = %suggestion.id,
            items = suggestion.items.len(),
            "generate response decoded"
        );
        Ok(suggestion)
    }

    async fn update_status(
        &self,
        suggestion_id: &str,
        update: &SuggestionStatusUpdate,
    ) -> AppResult<StatusUpdateResponse> {
        let request = self.status_request(suggestion_id, update)?;
        let response = self.client.request(request).await?;

        if response.data.as_json().is_none() {
            return Ok(StatusUpdateResponse::default());
        }
        response.json::<StatusUpdateResponse>().map_err(|err| {
            AppError::validation_with_details(
                "Malformed status update response",
                json!({ "suggestionId": suggestion_id, "error": err.to_string() }),
            )
        })
    }
}

/// Accepts both the `{ "suggestion": ... }` envelope and a bare suggestion.
fn parse_generate_response(response: &ApiResponse) -> AppResult<BackendSuggestion> {
    if let Ok(envelope) = response.json::<GenerateSuggestionResponse>() {
        return Ok(envelope.suggestion);
    }
    response.json::<BackendSuggestion>().map_err(|err| {
        AppError::validation_with_details(
            "Malformed suggestion response",
            json!({ "status": response.status, "error": err.to_string() }),
        )
    })
}
