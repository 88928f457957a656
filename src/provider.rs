use async_trait::async_trait;
use serde_json::Value;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::{ProviderConfig, ProviderType};
use crate::error::{GatewayError, Result};
use crate::models::{MessageRequest, MessageResponse};
use crate::usage::{UsageTracker, lock};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of the most recent health probe
#[derive(Debug, Clone, PartialEq)]
pub enum HealthStatus {
    Healthy,
    Unhealthy(String),
}

#[derive(Debug, Clone)]
struct HealthRecord {
    healthy: bool,
    last_check: Option<Instant>,
    last_status: Option<HealthStatus>,
}

/// Bookkeeping shared by every provider implementation: identity, health,
/// usage and exhaustion.
///
/// All fields are safe to mutate concurrently from request tasks and the
/// health monitor.
#[derive(Debug)]
pub struct ProviderState {
    name: String,
    priority: i32,
    provider_type: ProviderType,
    enabled: bool,
    timeout: Duration,
    /// Lowercased for case-insensitive matching
    usage_limit_codes: Vec<String>,
    usage: UsageTracker,
    health: Mutex<HealthRecord>,
    exhausted_until: Mutex<Option<Instant>>,
}

impl ProviderState {
    pub fn new(name: impl Into<String>, priority: i32, provider_type: ProviderType) -> Self {
        Self {
            name: name.into(),
            priority,
            provider_type,
            enabled: true,
            timeout: DEFAULT_TIMEOUT,
            usage_limit_codes: Vec::new(),
            usage: UsageTracker::new(None),
            health: Mutex::new(HealthRecord {
                healthy: true,
                last_check: None,
                last_status: None,
            }),
            exhausted_until: Mutex::new(None),
        }
    }

    pub fn from_config(config: &ProviderConfig) -> Self {
        Self::new(&config.name, config.priority, config.provider_type())
            .with_enabled(config.enabled)
            .with_timeout(config.timeout())
            .with_usage_limit(config.usage_limit)
            .with_usage_limit_codes(config.usage_limit_codes())
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_usage_limit(mut self, limit: Option<u64>) -> Self {
        self.usage = UsageTracker::new(limit);
        self
    }

    pub fn with_usage_limit_codes<I, S>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.usage_limit_codes = codes
            .into_iter()
            .map(|c| c.as_ref().to_lowercase())
            .filter(|c| !c.is_empty())
            .collect();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn provider_type(&self) -> ProviderType {
        self.provider_type
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn usage(&self) -> &UsageTracker {
        &self.usage
    }

    /// Count one accepted upstream call
    pub fn record_usage(&self) -> u64 {
        self.usage.record()
    }

    pub fn is_healthy(&self) -> bool {
        lock(&self.health).healthy
    }

    pub fn record_health(&self, status: HealthStatus) {
        let mut health = lock(&self.health);
        let healthy = status == HealthStatus::Healthy;

        if healthy && !health.healthy {
            info!(provider = %self.name, "Provider recovered");
        } else if let HealthStatus::Unhealthy(reason) = &status {
            warn!(provider = %self.name, reason = %reason, "Provider marked unhealthy");
        }

        health.healthy = healthy;
        health.last_check = Some(Instant::now());
        health.last_status = Some(status);
    }

    pub fn last_health_check(&self) -> Option<Instant> {
        lock(&self.health).last_check
    }

    pub fn last_health_status(&self) -> Option<HealthStatus> {
        lock(&self.health).last_status.clone()
    }

    /// Start a cooldown. An existing later deadline is kept.
    pub fn mark_exhausted(&self, cooldown: Duration) {
        let deadline = Instant::now() + cooldown;
        let mut until = lock(&self.exhausted_until);
        let deadline = match *until {
            Some(current) if current > deadline => current,
            _ => deadline,
        };
        *until = Some(deadline);

        warn!(
            provider = %self.name,
            cooldown_secs = cooldown.as_secs(),
            "Provider exhausted, cooling down"
        );
    }

    /// Remaining cooldown; clears an elapsed deadline
    fn cooldown_remaining(&self) -> Option<Duration> {
        let mut until = lock(&self.exhausted_until);
        match *until {
            Some(deadline) => {
                let now = Instant::now();
                if deadline > now {
                    Some(deadline - now)
                } else {
                    *until = None;
                    info!(provider = %self.name, "Provider cooldown elapsed");
                    None
                }
            }
            None => None,
        }
    }

    /// True while the rolling usage limit is reached or a cooldown is running
    pub fn is_exhausted(&self) -> bool {
        self.cooldown_remaining().is_some() || self.usage.limit_reached()
    }

    /// Time until the provider becomes available again; zero when it is not exhausted
    pub fn exhaustion_remaining(&self) -> Duration {
        let cooldown = self.cooldown_remaining().unwrap_or_default();
        let window = self.usage.time_until_headroom().unwrap_or_default();
        cooldown.max(window)
    }

    /// Healthy, enabled and not exhausted
    pub fn is_available(&self) -> bool {
        self.enabled && self.is_healthy() && !self.is_exhausted()
    }

    /// Whether an upstream error body carries one of the configured usage-limit codes
    pub fn is_usage_limit_error(&self, body: &str) -> bool {
        let body = body.to_lowercase();
        self.usage_limit_codes
            .iter()
            .any(|code| body.contains(code.as_str()))
    }

    /// Turn a non-success upstream response into the matching error kind
    pub fn classify_failure(&self, status: Option<u16>, body: &str) -> GatewayError {
        if self.is_usage_limit_error(body) {
            warn!(provider = %self.name, status = ?status, "Usage limit reported by upstream");
            return GatewayError::UsageLimitExceeded {
                provider: self.name.clone(),
                message: body.to_string(),
            };
        }

        let message = match status {
            Some(code) if code >= 500 => format!("Upstream server error (HTTP {}): {}", code, body),
            Some(code) if code >= 400 => format!("Client request error (HTTP {}): {}", code, body),
            Some(code) => format!("API request failed: HTTP {} - {}", code, body),
            None => body.to_string(),
        };
        GatewayError::provider(&self.name, status, message)
    }
}

/// One upstream completion backend.
///
/// Implementations provide the wire calls; the default methods layer health
/// bookkeeping on top of them via [`ProviderState`].
#[async_trait]
pub trait Provider: Send + Sync {
    fn state(&self) -> &ProviderState;

    /// Liveness probe. Backends without a health endpoint keep the default.
    async fn probe(&self) -> Result<()> {
        Ok(())
    }

    /// Model listing, tagged with the provider name
    async fn get_models(&self) -> Result<Value>;

    /// Run a completion. Successful calls must call [`ProviderState::record_usage`] exactly once.
    async fn create_message(&self, request: &MessageRequest) -> Result<MessageResponse>;

    /// Release connection resources. Must be idempotent.
    async fn close(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        self.state().name()
    }

    fn priority(&self) -> i32 {
        self.state().priority()
    }

    /// Bounded probe that never fails: errors and timeouts mark the provider unhealthy
    async fn health_check(&self) -> bool {
        let state = self.state();
        let status = match tokio::time::timeout(state.timeout(), self.probe()).await {
            Ok(Ok(())) => HealthStatus::Healthy,
            Ok(Err(e)) => HealthStatus::Unhealthy(e.to_string()),
            Err(_) => HealthStatus::Unhealthy(format!(
                "health check timed out after {}ms",
                state.timeout().as_millis()
            )),
        };

        let healthy = status == HealthStatus::Healthy;
        state.record_health(status);
        healthy
    }
}
