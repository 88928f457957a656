use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::error::{GatewayError, Result};

/// Body keys lifted into typed fields; everything else is passed through
const ROUTING_KEYS: [&str; 5] = ["messages", "model", "max_tokens", "temperature", "stream"];

/// One conversation turn. Content stays opaque: either a string or a list of blocks.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Message {
    pub role: String,
    pub content: Value,
}

impl Message {
    pub fn new(role: impl Into<String>, content: impl Into<Value>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new("user", Value::String(text.into()))
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new("assistant", Value::String(text.into()))
    }
}

/// Everything a provider needs to serve one client request
#[derive(Debug, Clone, Default)]
pub struct MessageRequest {
    pub messages: Vec<Message>,

    /// Model the client asked for. Informational: providers always send their configured model.
    pub model: Option<String>,

    pub max_tokens: Option<u32>,

    pub temperature: Option<f32>,

    pub stream: bool,

    pub headers: HashMap<String, String>,

    /// The body as received, after query parameter merging
    pub raw_body: Map<String, Value>,

    /// Passthrough parameters such as `system`, `tools`, `metadata`
    pub extra: Map<String, Value>,
}

impl MessageRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Build a request from a client JSON body
    pub fn from_body(body: Value, headers: HashMap<String, String>) -> Result<Self> {
        let Value::Object(raw_body) = body else {
            return Err(GatewayError::InvalidRequest(
                "Request body must be a JSON object".to_string(),
            ));
        };

        let messages: Vec<Message> = match raw_body.get("messages") {
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|e| GatewayError::InvalidRequest(format!("Invalid messages: {}", e)))?,
            None => Vec::new(),
        };

        if messages.is_empty() {
            return Err(GatewayError::InvalidRequest(
                "No messages provided".to_string(),
            ));
        }

        let model = raw_body
            .get("model")
            .and_then(Value::as_str)
            .map(str::to_string);

        let max_tokens = match raw_body.get("max_tokens") {
            None | Some(Value::Null) => None,
            Some(value) => Some(parse_u32(value).ok_or_else(|| {
                GatewayError::InvalidRequest("max_tokens must be a positive integer".to_string())
            })?),
        };

        let temperature = match raw_body.get("temperature") {
            None | Some(Value::Null) => None,
            Some(value) => Some(parse_f32(value).ok_or_else(|| {
                GatewayError::InvalidRequest("temperature must be a number".to_string())
            })?),
        };

        let stream = raw_body.get("stream").map(parse_bool).unwrap_or(false);

        let extra = raw_body
            .iter()
            .filter(|(key, _)| !ROUTING_KEYS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        Ok(Self {
            messages,
            model,
            max_tokens,
            temperature,
            stream,
            headers,
            raw_body,
            extra,
        })
    }
}

/// Merge query parameters into a request body. Query values take precedence;
/// `beta` is a regular Anthropic query flag and is left out.
pub fn merge_query_params(body: &mut Value, query: HashMap<String, String>) {
    let Value::Object(map) = body else {
        return;
    };

    for (key, value) in query {
        if key == "beta" {
            continue;
        }
        map.insert(key, Value::String(value));
    }
}

// Query-merged values arrive as strings, so numeric fields accept both forms.
fn parse_u32(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn parse_f32(value: &Value) -> Option<f32> {
    match value {
        Value::Number(n) => n.as_f64().map(|n| n as f32),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn parse_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}
