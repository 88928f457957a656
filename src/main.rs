use anthropic_lb::{
    client::build_provider,
    config::GatewayConfig,
    handler::{AppState, router},
    manager::ProviderManager,
};
use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(version, about = "Anthropic-compatible load balancer for LLM providers")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "gateway.toml")]
    config: PathBuf,

    /// Listen address, overriding the configuration
    #[arg(short, long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut config = GatewayConfig::from_file(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }
    config.validate()?;

    let manager = Arc::new(ProviderManager::from_config(&config.load_balancing));
    for provider_config in &config.providers {
        let provider = build_provider(provider_config)
            .with_context(|| format!("building provider '{}'", provider_config.name))?;
        manager.add_provider(provider)?;
    }

    if config.enabled_providers().next().is_none() {
        warn!("No enabled providers configured, every request will fail");
    }

    manager.start_health_monitoring();

    let state = Arc::new(AppState::new(
        Arc::clone(&manager),
        config.load_balancing.clone(),
    ));
    let app = router(state);

    let listener = TcpListener::bind(&config.server.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.server.listen_addr))?;

    info!(
        listen = %config.server.listen_addr,
        providers = manager.len(),
        health_check_interval_secs = config.load_balancing.health_check_interval_secs,
        "Gateway ready"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down");
    manager.close().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
