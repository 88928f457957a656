pub mod anthropic;
pub mod http;
pub mod minimax;

use std::sync::Arc;

pub use anthropic::AnthropicClient;
pub use minimax::MiniMaxClient;

use crate::config::{ProviderConfig, ProviderKind};
use crate::error::Result;
use crate::provider::Provider;

/// Construct the client matching the provider's declared kind
pub fn build_provider(config: &ProviderConfig) -> Result<Arc<dyn Provider>> {
    let provider: Arc<dyn Provider> = match config.kind {
        ProviderKind::Anthropic | ProviderKind::Kimi => Arc::new(AnthropicClient::new(config)?),
        ProviderKind::Minimax => Arc::new(MiniMaxClient::new(config)?),
    };
    Ok(provider)
}
