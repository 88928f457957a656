#![allow(dead_code)]

use anthropic_lb::config::ProviderType;
use anthropic_lb::error::{GatewayError, Result};
use anthropic_lb::models::{Message, MessageRequest, MessageResponse, StreamChunk};
use anthropic_lb::provider::{Provider, ProviderState};
use async_trait::async_trait;
use futures::stream;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What a scripted provider does when asked for a completion
#[derive(Debug, Clone)]
pub enum Behavior {
    Succeed,
    UsageLimit,
    Fail,
    Stream(Vec<StreamChunk>),
    /// Yields the chunks, then a mid-stream error
    StreamThenFail(Vec<StreamChunk>),
}

/// What a scripted provider does when probed
#[derive(Debug, Clone)]
pub enum Probe {
    Healthy,
    Unhealthy,
    Slow(Duration),
    Panic,
}

pub struct MockProvider {
    state: ProviderState,
    behavior: Mutex<Behavior>,
    probe: Mutex<Probe>,
    calls: AtomicUsize,
    probes: AtomicUsize,
    closes: AtomicUsize,
    fail_close: AtomicBool,
}

impl MockProvider {
    pub fn new(name: &str, priority: i32) -> Arc<Self> {
        Self::with_behavior(name, priority, Behavior::Succeed)
    }

    pub fn with_behavior(name: &str, priority: i32, behavior: Behavior) -> Arc<Self> {
        Self::from_state(
            ProviderState::new(name, priority, ProviderType::Subscription),
            behavior,
        )
    }

    pub fn from_state(state: ProviderState, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            state,
            behavior: Mutex::new(behavior),
            probe: Mutex::new(Probe::Healthy),
            calls: AtomicUsize::new(0),
            probes: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            fail_close: AtomicBool::new(false),
        })
    }

    pub fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn set_probe(&self, probe: Probe) {
        *self.probe.lock().unwrap() = probe;
    }

    pub fn fail_on_close(&self) {
        self.fail_close.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    fn failure(&self) -> GatewayError {
        GatewayError::provider(self.state.name(), Some(500), "internal error")
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn state(&self) -> &ProviderState {
        &self.state
    }

    async fn probe(&self) -> Result<()> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        let probe = self.probe.lock().unwrap().clone();

        match probe {
            Probe::Healthy => Ok(()),
            Probe::Unhealthy => Err(GatewayError::HealthCheckError {
                provider: self.state.name().to_string(),
                message: "connection refused".to_string(),
            }),
            Probe::Slow(delay) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
            Probe::Panic => panic!("probe exploded"),
        }
    }

    async fn get_models(&self) -> Result<Value> {
        let behavior = self.behavior.lock().unwrap().clone();
        match behavior {
            Behavior::Fail => Err(self.failure()),
            _ => Ok(json!({
                "object": "list",
                "data": [{"id": format!("{}-model", self.state.name()), "object": "model"}],
                "provider": self.state.name(),
            })),
        }
    }

    async fn create_message(&self, _request: &MessageRequest) -> Result<MessageResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let behavior = self.behavior.lock().unwrap().clone();

        match behavior {
            Behavior::Succeed => {
                self.state.record_usage();
                Ok(MessageResponse::Complete(response_body(self.state.name())))
            }
            Behavior::UsageLimit => Err(GatewayError::UsageLimitExceeded {
                provider: self.state.name().to_string(),
                message: "2056 usage limit exceeded".to_string(),
            }),
            Behavior::Fail => Err(self.failure()),
            Behavior::Stream(chunks) => {
                self.state.record_usage();
                Ok(MessageResponse::Stream(Box::pin(stream::iter(
                    chunks.into_iter().map(Ok::<_, GatewayError>),
                ))))
            }
            Behavior::StreamThenFail(chunks) => {
                self.state.record_usage();
                let items: Vec<Result<StreamChunk>> = chunks
                    .into_iter()
                    .map(Ok)
                    .chain(std::iter::once(Err(GatewayError::provider(
                        self.state.name(),
                        None,
                        "connection reset",
                    ))))
                    .collect();
                Ok(MessageResponse::Stream(Box::pin(stream::iter(items))))
            }
        }
    }

    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(GatewayError::InternalError("close failed".to_string()));
        }
        Ok(())
    }
}

pub fn response_body(provider: &str) -> Value {
    json!({
        "id": format!("msg_{}", provider),
        "model": "test-model",
        "content": [{"type": "text", "text": format!("hello from {}", provider)}],
        "stop_reason": "end_turn",
        "usage": {"input_tokens": 3, "output_tokens": 4},
    })
}

pub fn request() -> MessageRequest {
    MessageRequest::new(vec![Message::user("Hello")])
}
