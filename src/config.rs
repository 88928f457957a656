use crate::error::{GatewayError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub load_balancing: LoadBalancingConfig,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoadBalancingConfig {
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval_secs: u64,

    /// Upper bound on probes running at the same time within one cycle
    #[serde(default = "default_max_concurrent_health_checks")]
    pub max_concurrent_health_checks: usize,

    /// Cooldown applied when a provider reports a usage limit
    #[serde(default = "default_exhaustion_cooldown")]
    pub exhaustion_cooldown_secs: u64,

    /// Break priority ties by remaining usage headroom
    #[serde(default)]
    pub quota_aware: bool,
}

impl Default for LoadBalancingConfig {
    fn default() -> Self {
        Self {
            health_check_interval_secs: default_health_check_interval(),
            max_concurrent_health_checks: default_max_concurrent_health_checks(),
            exhaustion_cooldown_secs: default_exhaustion_cooldown(),
            quota_aware: false,
        }
    }
}

impl LoadBalancingConfig {
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn exhaustion_cooldown(&self) -> Duration {
        Duration::from_secs(self.exhaustion_cooldown_secs)
    }
}

/// Which client implementation serves a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Anthropic,
    Minimax,
    Kimi,
}

impl ProviderKind {
    pub fn default_auth_scheme(&self) -> AuthScheme {
        match self {
            ProviderKind::Minimax => AuthScheme::Bearer,
            ProviderKind::Anthropic | ProviderKind::Kimi => AuthScheme::ApiKey,
        }
    }

    pub fn default_provider_type(&self) -> ProviderType {
        match self {
            ProviderKind::Minimax => ProviderType::Subscription,
            ProviderKind::Anthropic => ProviderType::PayPerUse,
            ProviderKind::Kimi => ProviderType::Specialist,
        }
    }

    pub fn default_usage_limit_codes(&self) -> Vec<String> {
        let codes: &[&str] = match self {
            ProviderKind::Minimax => &[
                "2056",
                "usage_limit_exceeded",
                "quota_exceeded",
                "rate_limit_exceeded",
            ],
            ProviderKind::Anthropic | ProviderKind::Kimi => &[
                "rate_limit_error",
                "usage_limit_exceeded",
                "quota_exceeded",
                "rate_limit_exceeded",
            ],
        };
        codes.iter().map(|c| c.to_string()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    Subscription,
    PayPerUse,
    Specialist,
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProviderType::Subscription => "subscription",
            ProviderType::PayPerUse => "pay_per_use",
            ProviderType::Specialist => "specialist",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthScheme {
    /// `Authorization: Bearer <token>`
    Bearer,
    /// `x-api-key: <token>`
    ApiKey,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub kind: ProviderKind,
    #[serde(default)]
    pub provider_type: Option<ProviderType>,
    pub priority: i32,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub base_url: String,
    #[serde(default)]
    pub auth_token: String,
    /// Environment variable holding the token; wins over `auth_token`
    #[serde(default)]
    pub auth_token_env: Option<String>,
    #[serde(default)]
    pub auth_scheme: Option<AuthScheme>,
    pub model_name: String,
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,
    #[serde(default)]
    pub default_temperature: Option<f32>,
    /// Requests allowed per rolling hour
    #[serde(default)]
    pub usage_limit: Option<u64>,
    #[serde(default)]
    pub usage_limit_codes: Option<Vec<String>>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl ProviderConfig {
    pub fn auth_scheme(&self) -> AuthScheme {
        self.auth_scheme
            .unwrap_or_else(|| self.kind.default_auth_scheme())
    }

    pub fn provider_type(&self) -> ProviderType {
        self.provider_type
            .unwrap_or_else(|| self.kind.default_provider_type())
    }

    pub fn usage_limit_codes(&self) -> Vec<String> {
        self.usage_limit_codes
            .clone()
            .unwrap_or_else(|| self.kind.default_usage_limit_codes())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl GatewayConfig {
    /// Load configuration from a TOML file, then apply environment overrides
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| {
            GatewayError::ConfigError(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let mut config = Self::from_toml(&contents)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| GatewayError::ConfigError(format!("Failed to parse config file: {}", e)))
    }

    /// Resolve `auth_token_env` references and `GATEWAY_LISTEN_ADDR`
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(addr) = env::var("GATEWAY_LISTEN_ADDR") {
            self.server.listen_addr = addr;
        }

        for provider in self.providers.iter_mut().filter(|p| p.enabled) {
            if let Some(var) = &provider.auth_token_env {
                provider.auth_token = env::var(var).map_err(|_| {
                    GatewayError::ConfigError(format!(
                        "{} not set (auth token for provider '{}')",
                        var, provider.name
                    ))
                })?;
            }
        }

        Ok(())
    }

    /// Providers that should be registered with the manager
    pub fn enabled_providers(&self) -> impl Iterator<Item = &ProviderConfig> {
        self.providers.iter().filter(|p| p.enabled)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.load_balancing.health_check_interval_secs == 0 {
            return Err(GatewayError::ConfigError(
                "health_check_interval_secs must be greater than 0".to_string(),
            ));
        }

        if self.load_balancing.max_concurrent_health_checks == 0 {
            return Err(GatewayError::ConfigError(
                "max_concurrent_health_checks must be greater than 0".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for provider in &self.providers {
            if provider.name.is_empty() {
                return Err(GatewayError::ConfigError(
                    "Provider name is empty".to_string(),
                ));
            }
            if !names.insert(provider.name.as_str()) {
                return Err(GatewayError::ConfigError(format!(
                    "Duplicate provider name '{}'",
                    provider.name
                )));
            }
            if provider.base_url.is_empty() {
                return Err(GatewayError::ConfigError(format!(
                    "Provider '{}' has an empty base_url",
                    provider.name
                )));
            }
            if provider.enabled && provider.auth_token.is_empty() {
                return Err(GatewayError::ConfigError(format!(
                    "Provider '{}' has an empty auth token",
                    provider.name
                )));
            }
            if provider.timeout_ms == 0 {
                return Err(GatewayError::ConfigError(format!(
                    "Provider '{}' timeout_ms must be greater than 0",
                    provider.name
                )));
            }
        }

        Ok(())
    }
}

fn default_listen_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_health_check_interval() -> u64 {
    60
}

fn default_max_concurrent_health_checks() -> usize {
    8
}

fn default_exhaustion_cooldown() -> u64 {
    300
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_true() -> bool {
    true
}
