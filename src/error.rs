use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Generic upstream failure. Routing treats 4xx-like and 5xx-like failures alike.
    #[error("Provider '{provider}' failed: {message}")]
    ProviderError {
        provider: String,
        status: Option<u16>,
        message: String,
    },

    #[error("Usage limit exceeded for provider '{provider}': {message}")]
    UsageLimitExceeded { provider: String, message: String },

    #[error("No healthy providers available")]
    NoHealthyProviders,

    #[error("Health check failed for provider '{provider}': {message}")]
    HealthCheckError { provider: String, message: String },

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl GatewayError {
    pub fn provider(provider: impl Into<String>, status: Option<u16>, message: impl Into<String>) -> Self {
        Self::ProviderError {
            provider: provider.into(),
            status,
            message: message.into(),
        }
    }

    pub fn is_usage_limit(&self) -> bool {
        matches!(self, Self::UsageLimitExceeded { .. })
    }

    /// Anthropic error `type` string reported to clients for this error.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::NoHealthyProviders => "overloaded_error",
            Self::UsageLimitExceeded { .. } => "rate_limit_error",
            Self::InvalidRequest(_) => "invalid_request_error",
            _ => "api_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
