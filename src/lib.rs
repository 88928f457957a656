//! # Anthropic Load Balancer
//!
//! An Anthropic Messages API compatible gateway that spreads requests across
//! several LLM providers.
//!
//! ## Overview
//!
//! Providers are tried in ascending priority order. The gateway handles:
//! - Background health checks with bounded concurrency
//! - Usage-limit detection with a per-provider cooldown
//! - Failover to the next eligible provider
//! - Normalizing provider output into one SSE event stream
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use anthropic_lb::{client::build_provider, config::GatewayConfig, manager::ProviderManager};
//!
//! # async fn run() -> anthropic_lb::Result<()> {
//! let config = GatewayConfig::from_file("gateway.toml")?;
//! config.validate()?;
//!
//! let manager = ProviderManager::from_config(&config.load_balancing);
//! for provider in &config.providers {
//!     manager.add_provider(build_provider(provider)?)?;
//! }
//! manager.start_health_monitoring();
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`config`] - Configuration loading and validation
//! - [`error`] - Error types and handling
//! - [`provider`] - Provider contract and shared health/usage state
//! - [`client`] - HTTP provider clients
//! - [`manager`] - Registration, routing and failover
//! - [`health`] - Background health checks
//! - [`streaming`] - SSE decoding and normalization
//! - [`handler`] - axum routes

pub mod client;
pub mod config;
pub mod error;
pub mod handler;
pub mod health;
pub mod manager;
pub mod models;
pub mod provider;
pub mod stats;
pub mod streaming;
pub mod usage;

pub use config::GatewayConfig;
pub use error::{GatewayError, Result};
pub use manager::ProviderManager;
pub use provider::{Provider, ProviderState};
