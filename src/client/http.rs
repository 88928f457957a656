use futures::StreamExt;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, Response};
use serde_json::{Map, Value, json};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{AuthScheme, ProviderConfig};
use crate::error::{GatewayError, Result};
use crate::models::{ChunkStream, MessageRequest, MessageResponse};
use crate::provider::ProviderState;
use crate::streaming::SseLineDecoder;
use crate::usage::lock;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Connection and request settings shared by the HTTP provider clients
pub struct HttpBackend {
    /// Taken on close; later calls fail instead of reopening connections
    client: Mutex<Option<Client>>,
    base_url: String,
    auth_token: String,
    auth_scheme: AuthScheme,
    model_name: String,
    default_max_tokens: u32,
    default_temperature: Option<f32>,
    timeout: Duration,
}

impl HttpBackend {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.timeout())
            .build()
            .map_err(|e| {
                GatewayError::InternalError(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client: Mutex::new(Some(client)),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth_token: config.auth_token.clone(),
            auth_scheme: config.auth_scheme(),
            model_name: config.model_name.clone(),
            default_max_tokens: config.default_max_tokens,
            default_temperature: config.default_temperature,
            timeout: config.timeout(),
        })
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn client(&self, provider: &str) -> Result<Client> {
        lock(&self.client)
            .clone()
            .ok_or_else(|| GatewayError::provider(provider, None, "provider is closed"))
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        let builder = builder.header("anthropic-version", ANTHROPIC_VERSION);
        match self.auth_scheme {
            AuthScheme::Bearer => {
                builder.header(AUTHORIZATION, format!("Bearer {}", self.auth_token))
            }
            AuthScheme::ApiKey => builder.header("x-api-key", &self.auth_token),
        }
    }

    /// Upstream body: passthrough parameters minus `skip`, then the routing fields.
    /// The configured model always replaces the client's hint.
    pub fn build_payload(&self, request: &MessageRequest, skip: &[&str]) -> Value {
        let mut payload: Map<String, Value> = request
            .extra
            .iter()
            .filter(|(key, _)| !skip.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        payload.insert("model".to_string(), json!(self.model_name));
        payload.insert("messages".to_string(), json!(request.messages));
        payload.insert(
            "max_tokens".to_string(),
            json!(request.max_tokens.unwrap_or(self.default_max_tokens)),
        );
        if let Some(temperature) = request.temperature.or(self.default_temperature) {
            payload.insert("temperature".to_string(), json!(temperature));
        }
        payload.insert("stream".to_string(), json!(request.stream));

        Value::Object(payload)
    }

    /// POST `/messages`, classify failures and count accepted calls
    pub async fn send_message(
        &self,
        state: &ProviderState,
        request: &MessageRequest,
        skip: &[&str],
    ) -> Result<MessageResponse> {
        let provider = state.name();
        let client = self.client(provider)?;
        let payload = self.build_payload(request, skip);
        let url = self.url("messages");

        let mut builder = self
            .authorize(client.post(&url))
            .header(CONTENT_TYPE, "application/json")
            .json(&payload);
        if request.stream {
            builder = builder.header(ACCEPT, "text/event-stream");
        } else {
            builder = builder.timeout(self.timeout);
        }

        debug!(
            provider = %provider,
            url = %url,
            model = %self.model_name,
            stream = request.stream,
            "Sending request upstream"
        );

        let response = self.send(provider, builder).await?;
        let status = response.status();

        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(state.classify_failure(Some(status.as_u16()), &body));
        }

        let total = state.record_usage();

        if request.stream && is_event_stream(&response) {
            info!(provider = %provider, usage_count = total, "Streaming response from provider");
            return Ok(MessageResponse::Stream(sse_stream(
                provider.to_string(),
                response,
                self.timeout,
            )));
        }

        let body = self.read_json(provider, response).await?;
        info!(provider = %provider, usage_count = total, "Created message with provider");
        Ok(MessageResponse::Complete(body))
    }

    /// GET a JSON document relative to the base URL
    pub async fn get_json(&self, state: &ProviderState, path: &str) -> Result<Value> {
        let provider = state.name();
        let client = self.client(provider)?;
        let builder = self.authorize(client.get(self.url(path))).timeout(self.timeout);

        let response = self.send(provider, builder).await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(state.classify_failure(Some(status.as_u16()), &body));
        }

        self.read_json(provider, response).await
    }

    /// Bounds the wait for response headers. Stream bodies are bounded per read.
    async fn send(&self, provider: &str, builder: RequestBuilder) -> Result<Response> {
        match tokio::time::timeout(self.timeout, builder.send()).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(GatewayError::provider(
                provider,
                None,
                format!("Request failed: {}", e),
            )),
            Err(_) => Err(GatewayError::provider(
                provider,
                None,
                format!("Request timed out after {}ms", self.timeout.as_millis()),
            )),
        }
    }

    async fn read_json(&self, provider: &str, response: Response) -> Result<Value> {
        match tokio::time::timeout(self.timeout, response.json::<Value>()).await {
            Ok(Ok(body)) => Ok(body),
            Ok(Err(e)) => Err(GatewayError::provider(
                provider,
                None,
                format!("Invalid response body: {}", e),
            )),
            Err(_) => Err(GatewayError::provider(
                provider,
                None,
                "Timed out reading response body",
            )),
        }
    }

    /// Drop the HTTP client. Returns true on the first call only.
    pub fn close(&self) -> bool {
        lock(&self.client).take().is_some()
    }
}

fn is_event_stream(response: &Response) -> bool {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("text/event-stream"))
        .unwrap_or(false)
}

/// Decode an upstream SSE body lazily. Dropping the stream drops the connection.
///
/// Each read is bounded by `idle_timeout`; a stalled upstream ends the stream
/// with an error instead of holding the client open.
fn sse_stream(provider: String, response: Response, idle_timeout: Duration) -> ChunkStream {
    let mut body = response.bytes_stream();

    Box::pin(async_stream::stream! {
        let mut decoder = SseLineDecoder::new();
        loop {
            let chunk = match tokio::time::timeout(idle_timeout, body.next()).await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(_) => {
                    warn!(provider = %provider, "Upstream stream went idle");
                    yield Err(GatewayError::provider(
                        &provider,
                        None,
                        format!("Stream idle timeout after {}ms", idle_timeout.as_millis()),
                    ));
                    return;
                }
            };

            match chunk {
                Ok(chunk) => match decoder.feed(&chunk) {
                    Ok(items) => {
                        for item in items {
                            yield Ok(item);
                        }
                        if decoder.is_done() {
                            return;
                        }
                    }
                    Err(e) => {
                        yield Err(GatewayError::provider(&provider, None, e.to_string()));
                        return;
                    }
                },
                Err(e) => {
                    yield Err(GatewayError::provider(
                        &provider,
                        None,
                        format!("Stream interrupted: {}", e),
                    ));
                    return;
                }
            }
        }
        for item in decoder.finish() {
            yield Ok(item);
        }
    })
}
