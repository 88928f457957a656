use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use crate::client::http::HttpBackend;
use crate::config::ProviderConfig;
use crate::error::Result;
use crate::models::{MessageRequest, MessageResponse};
use crate::provider::{Provider, ProviderState};

/// Passthrough parameters MiniMax rejects with HTTP 400
const UNSUPPORTED_PARAMS: [&str; 4] = ["metadata", "stop_sequences", "top_p", "top_k"];

/// Aliases advertised next to the configured model so Anthropic clients find a familiar id
const MODEL_ALIASES: [&str; 3] = [
    "claude-3-opus-20240229",
    "claude-3-sonnet-20240229",
    "claude-3-haiku-20240307",
];

const MODEL_CREATED: u64 = 1_700_000_000;

/// MiniMax Anthropic-compatible endpoint, subscription or pay-per-use.
///
/// The upstream has neither a health nor a models endpoint, so the probe
/// keeps the default (healthy) and the listing is synthesized.
pub struct MiniMaxClient {
    state: ProviderState,
    http: HttpBackend,
}

impl MiniMaxClient {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        Ok(Self {
            state: ProviderState::from_config(config),
            http: HttpBackend::new(config)?,
        })
    }
}

#[async_trait]
impl Provider for MiniMaxClient {
    fn state(&self) -> &ProviderState {
        &self.state
    }

    async fn get_models(&self) -> Result<Value> {
        let mut data = vec![json!({
            "id": self.http.model_name(),
            "object": "model",
            "created": MODEL_CREATED,
            "owned_by": "minimax",
        })];
        data.extend(MODEL_ALIASES.iter().map(|alias| {
            json!({
                "id": alias,
                "object": "model",
                "created": MODEL_CREATED,
                "owned_by": "anthropic",
            })
        }));

        Ok(json!({
            "object": "list",
            "data": data,
            "provider": self.state.name(),
        }))
    }

    async fn create_message(&self, request: &MessageRequest) -> Result<MessageResponse> {
        self.http
            .send_message(&self.state, request, &UNSUPPORTED_PARAMS)
            .await
    }

    async fn close(&self) -> Result<()> {
        if self.http.close() {
            debug!(provider = %self.state.name(), "Closed HTTP client");
        }
        Ok(())
    }
}
