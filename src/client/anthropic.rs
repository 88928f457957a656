use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use crate::client::http::HttpBackend;
use crate::config::ProviderConfig;
use crate::error::{GatewayError, Result};
use crate::models::{MessageRequest, MessageResponse};
use crate::provider::{Provider, ProviderState};

/// Client for upstreams that speak the Anthropic Messages API directly
/// (Anthropic itself, Kimi's coding endpoint, self-hosted compatible servers).
pub struct AnthropicClient {
    state: ProviderState,
    http: HttpBackend,
}

impl AnthropicClient {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        Ok(Self {
            state: ProviderState::from_config(config),
            http: HttpBackend::new(config)?,
        })
    }
}

#[async_trait]
impl Provider for AnthropicClient {
    fn state(&self) -> &ProviderState {
        &self.state
    }

    async fn probe(&self) -> Result<()> {
        self.http
            .get_json(&self.state, "models")
            .await
            .map(|_| ())
            .map_err(|e| GatewayError::HealthCheckError {
                provider: self.state.name().to_string(),
                message: e.to_string(),
            })
    }

    async fn get_models(&self) -> Result<Value> {
        let mut listing = self.http.get_json(&self.state, "models").await?;
        match listing.as_object_mut() {
            Some(object) => {
                object.insert("provider".to_string(), json!(self.state.name()));
            }
            None => {
                listing = json!({
                    "object": "list",
                    "data": listing,
                    "provider": self.state.name(),
                });
            }
        }
        Ok(listing)
    }

    async fn create_message(&self, request: &MessageRequest) -> Result<MessageResponse> {
        self.http.send_message(&self.state, request, &[]).await
    }

    async fn close(&self) -> Result<()> {
        if self.http.close() {
            debug!(provider = %self.state.name(), "Closed HTTP client");
        }
        Ok(())
    }
}
