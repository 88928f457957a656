use arc_swap::ArcSwap;
use futures::future::join_all;
use serde_json::{Value, json};
use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::LoadBalancingConfig;
use crate::error::{GatewayError, Result};
use crate::health::{HealthCycleReport, HealthMonitor, ProviderList, run_health_cycle};
use crate::models::{MessageRequest, MessageResponse};
use crate::provider::Provider;
use crate::stats::{GatewayStats, ProviderStats};
use crate::usage::lock;

const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_MAX_CONCURRENT_HEALTH_CHECKS: usize = 8;
const DEFAULT_EXHAUSTION_COOLDOWN: Duration = Duration::from_secs(300);

/// Owns the registered providers, their health loop and the routing policy.
///
/// Shared across request tasks behind an `Arc`. The provider list is swapped
/// atomically on registration and read lock-free while routing.
pub struct ProviderManager {
    providers: ProviderList,
    health_check_interval: Duration,
    max_concurrent_health_checks: usize,
    exhaustion_cooldown: Duration,
    quota_aware: bool,
    monitor: Mutex<Option<HealthMonitor>>,
    closed: AtomicBool,
}

impl ProviderManager {
    pub fn new(health_check_interval: Duration) -> Self {
        Self {
            providers: Arc::new(ArcSwap::from_pointee(Vec::new())),
            health_check_interval: health_check_interval.max(Duration::from_millis(1)),
            max_concurrent_health_checks: DEFAULT_MAX_CONCURRENT_HEALTH_CHECKS,
            exhaustion_cooldown: DEFAULT_EXHAUSTION_COOLDOWN,
            quota_aware: false,
            monitor: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub fn from_config(config: &LoadBalancingConfig) -> Self {
        Self::new(config.health_check_interval())
            .with_max_concurrent_health_checks(config.max_concurrent_health_checks)
            .with_exhaustion_cooldown(config.exhaustion_cooldown())
            .with_quota_aware(config.quota_aware)
    }

    pub fn with_max_concurrent_health_checks(mut self, max: usize) -> Self {
        self.max_concurrent_health_checks = max.max(1);
        self
    }

    pub fn with_exhaustion_cooldown(mut self, cooldown: Duration) -> Self {
        self.exhaustion_cooldown = cooldown;
        self
    }

    pub fn with_quota_aware(mut self, quota_aware: bool) -> Self {
        self.quota_aware = quota_aware;
        self
    }

    pub fn exhaustion_cooldown(&self) -> Duration {
        self.exhaustion_cooldown
    }

    /// Register a provider. Names must be unique.
    pub fn add_provider(&self, provider: Arc<dyn Provider>) -> Result<()> {
        let name = provider.name().to_string();
        let mut duplicate = false;

        self.providers.rcu(|current| {
            duplicate = current.iter().any(|p| p.name() == name);
            let mut next = Vec::clone(current);
            if !duplicate {
                next.push(Arc::clone(&provider));
            }
            next
        });

        if duplicate {
            return Err(GatewayError::ConfigError(format!(
                "Provider '{}' is already registered",
                name
            )));
        }

        info!(
            provider = %name,
            priority = provider.priority(),
            provider_type = %provider.state().provider_type(),
            "Added provider"
        );
        Ok(())
    }

    /// Snapshot of all providers in registration order
    pub fn providers(&self) -> Vec<Arc<dyn Provider>> {
        Vec::clone(&self.providers.load_full())
    }

    pub fn get_provider(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers
            .load()
            .iter()
            .find(|p| p.name() == name)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.providers.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.load().is_empty()
    }

    /// Spawn the recurring health loop. Calling it while the loop runs is a no-op.
    pub fn start_health_monitoring(&self) {
        if self.closed.load(Ordering::SeqCst) {
            warn!("Manager is closed, not starting health monitoring");
            return;
        }

        let mut monitor = lock(&self.monitor);
        // Re-checked under the lock: close() sets the flag before taking the slot
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        if monitor.as_ref().is_some_and(HealthMonitor::is_running) {
            debug!("Health monitoring already running");
            return;
        }

        *monitor = Some(HealthMonitor::spawn(
            Arc::clone(&self.providers),
            self.health_check_interval,
            self.max_concurrent_health_checks,
        ));
    }

    pub async fn stop_health_monitoring(&self) {
        let monitor = lock(&self.monitor).take();
        if let Some(monitor) = monitor {
            monitor.stop().await;
        }
    }

    pub fn is_monitoring(&self) -> bool {
        lock(&self.monitor)
            .as_ref()
            .is_some_and(HealthMonitor::is_running)
    }

    /// Run a single health cycle outside the background loop
    pub async fn check_all_providers(&self) -> HealthCycleReport {
        let snapshot = self.providers.load_full();
        run_health_cycle(&snapshot, self.max_concurrent_health_checks).await
    }

    /// Enabled providers that passed their last health check, exhausted or not
    pub fn get_healthy_providers(&self) -> Vec<Arc<dyn Provider>> {
        self.providers
            .load()
            .iter()
            .filter(|p| p.state().is_enabled() && p.state().is_healthy())
            .cloned()
            .collect()
    }

    /// Routable providers in the order they will be tried
    pub fn get_available_providers(&self) -> Vec<Arc<dyn Provider>> {
        let mut candidates: Vec<Arc<dyn Provider>> = self
            .providers
            .load()
            .iter()
            .filter(|p| p.state().is_available())
            .cloned()
            .collect();

        // sort_by_key is stable, so equal keys keep registration order
        if self.quota_aware {
            candidates.sort_by_key(|p| {
                let headroom = p.state().usage().headroom().unwrap_or(u64::MAX);
                (p.priority(), Reverse(headroom))
            });
        } else {
            candidates.sort_by_key(|p| p.priority());
        }

        candidates
    }

    /// Send a request to the best available provider, failing over in
    /// priority order.
    ///
    /// A usage-limit failure puts that provider into cooldown before moving
    /// on; any other failure just moves on. The winning response is returned
    /// untouched.
    pub async fn route_create_message(&self, request: &MessageRequest) -> Result<MessageResponse> {
        let candidates = self.get_available_providers();

        if candidates.is_empty() {
            warn!("No healthy providers available");
            return Err(GatewayError::NoHealthyProviders);
        }

        for provider in &candidates {
            debug!(
                provider = provider.name(),
                priority = provider.priority(),
                "Trying provider"
            );

            match provider.create_message(request).await {
                Ok(response) => {
                    info!(
                        provider = provider.name(),
                        priority = provider.priority(),
                        stream = response.is_stream(),
                        "Request routed"
                    );
                    return Ok(response);
                }
                Err(e) if e.is_usage_limit() => {
                    provider.state().mark_exhausted(self.exhaustion_cooldown);
                    warn!(
                        provider = provider.name(),
                        error = %e,
                        "Usage limit exceeded, trying next provider"
                    );
                }
                Err(e) => {
                    warn!(
                        provider = provider.name(),
                        error = %e,
                        "Provider failed, trying next provider"
                    );
                }
            }
        }

        error!(attempted = candidates.len(), "All providers failed");
        Err(GatewayError::NoHealthyProviders)
    }

    /// Listing from every provider, keyed by name. Failures are reported per provider.
    pub async fn get_models_from_all_providers(&self) -> HashMap<String, Value> {
        let providers = self.providers.load_full();

        let listings = join_all(providers.iter().map(|provider| async move {
            let listing = match provider.get_models().await {
                Ok(listing) => listing,
                Err(e) => {
                    warn!(provider = provider.name(), error = %e, "Failed to list models");
                    json!({ "error": e.to_string() })
                }
            };
            (provider.name().to_string(), listing)
        }))
        .await;

        listings.into_iter().collect()
    }

    /// Listing of the highest-priority healthy provider, tagged with its identity
    pub async fn get_models(&self) -> Result<Value> {
        let best = self
            .get_healthy_providers()
            .into_iter()
            .min_by_key(|p| p.priority())
            .ok_or(GatewayError::NoHealthyProviders)?;

        let mut listing = best.get_models().await?;
        if let Some(object) = listing.as_object_mut() {
            object.insert(
                "_provider_info".to_string(),
                json!({
                    "name": best.name(),
                    "type": best.state().provider_type(),
                    "priority": best.priority(),
                }),
            );
        }
        Ok(listing)
    }

    pub fn get_provider_stats(&self) -> GatewayStats {
        let providers = self
            .providers
            .load()
            .iter()
            .map(|p| ProviderStats::from_state(p.state()))
            .collect();
        GatewayStats::from_providers(providers)
    }

    /// Stop the health loop and close every provider. Safe to call repeatedly.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            debug!("Provider manager already closed");
            return;
        }

        self.stop_health_monitoring().await;

        for provider in self.providers() {
            if let Err(e) = provider.close().await {
                warn!(provider = provider.name(), error = %e, "Failed to close provider");
            }
        }

        info!("Provider manager closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Default for ProviderManager {
    fn default() -> Self {
        Self::new(DEFAULT_HEALTH_CHECK_INTERVAL)
    }
}
