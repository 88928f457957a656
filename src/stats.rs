use serde::Serialize;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;

use crate::config::ProviderType;
use crate::provider::{HealthStatus, ProviderState};

/// Point-in-time view of one provider
#[derive(Debug, Clone, Serialize)]
pub struct ProviderStats {
    pub name: String,
    #[serde(rename = "type")]
    pub provider_type: ProviderType,
    pub priority: i32,
    pub enabled: bool,
    pub healthy: bool,
    /// Healthy and not exhausted
    pub available: bool,
    pub usage_count_total: u64,
    pub usage_count_last_hour: u64,
    pub usage_limit: Option<u64>,
    pub exhausted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exhaustion_remaining_seconds: Option<u64>,
    pub last_health_check_seconds_ago: Option<u64>,
    pub last_health_status: Option<String>,
}

impl ProviderStats {
    pub fn from_state(state: &ProviderState) -> Self {
        let healthy = state.is_enabled() && state.is_healthy();
        let exhausted = state.is_exhausted();
        let exhaustion_remaining_seconds =
            exhausted.then(|| ceil_secs(state.exhaustion_remaining()));

        let last_health_check_seconds_ago = state
            .last_health_check()
            .map(|at| Instant::now().saturating_duration_since(at).as_secs());

        let last_health_status = state.last_health_status().map(|status| match status {
            HealthStatus::Healthy => "healthy".to_string(),
            HealthStatus::Unhealthy(reason) => format!("unhealthy: {}", reason),
        });

        Self {
            name: state.name().to_string(),
            provider_type: state.provider_type(),
            priority: state.priority(),
            enabled: state.is_enabled(),
            healthy,
            available: healthy && !exhausted,
            usage_count_total: state.usage().total(),
            usage_count_last_hour: state.usage().last_hour(),
            usage_limit: state.usage().limit(),
            exhausted,
            exhaustion_remaining_seconds,
            last_health_check_seconds_ago,
            last_health_status,
        }
    }
}

/// Aggregate view over every registered provider
#[derive(Debug, Clone, Serialize)]
pub struct GatewayStats {
    pub total_providers: usize,
    pub healthy_providers: usize,
    pub available_providers: usize,
    pub exhausted_providers: usize,
    pub total_usage: u64,
    pub usage_last_hour: u64,
    /// Unix seconds
    pub timestamp: u64,
    pub providers: Vec<ProviderStats>,
}

impl GatewayStats {
    pub fn from_providers(providers: Vec<ProviderStats>) -> Self {
        Self {
            total_providers: providers.len(),
            healthy_providers: providers.iter().filter(|p| p.healthy).count(),
            available_providers: providers.iter().filter(|p| p.available).count(),
            exhausted_providers: providers.iter().filter(|p| p.exhausted).count(),
            total_usage: providers.iter().map(|p| p.usage_count_total).sum(),
            usage_last_hour: providers.iter().map(|p| p.usage_count_last_hour).sum(),
            timestamp: unix_now(),
            providers,
        }
    }
}

impl std::fmt::Display for GatewayStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Providers: {} total, {} healthy, {} available, {} exhausted; {} requests ({} in the last hour)",
            self.total_providers,
            self.healthy_providers,
            self.available_providers,
            self.exhausted_providers,
            self.total_usage,
            self.usage_last_hour
        )
    }
}

fn ceil_secs(duration: Duration) -> u64 {
    duration.as_secs() + u64::from(duration.subsec_nanos() > 0)
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ceil_secs() {
        assert_eq!(ceil_secs(Duration::ZERO), 0);
        assert_eq!(ceil_secs(Duration::from_millis(1)), 1);
        assert_eq!(ceil_secs(Duration::from_secs(3)), 3);
        assert_eq!(ceil_secs(Duration::from_millis(3001)), 4);
    }

    #[test]
    fn test_provider_stats_snapshot() {
        let state = ProviderState::new("kimi", 2, ProviderType::Specialist).with_usage_limit(Some(10));
        state.record_usage();
        state.mark_exhausted(Duration::from_secs(30));

        let stats = ProviderStats::from_state(&state);
        assert_eq!(stats.name, "kimi");
        assert!(stats.healthy);
        assert!(stats.exhausted);
        assert!(!stats.available);
        assert_eq!(stats.usage_count_total, 1);
        assert_eq!(stats.usage_limit, Some(10));
        assert!(stats.exhaustion_remaining_seconds.unwrap() > 0);
        assert!(stats.last_health_check_seconds_ago.is_none());

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["type"], "specialist");
    }

    #[test]
    fn test_display_format() {
        let a = ProviderStats::from_state(&ProviderState::new("a", 1, ProviderType::Subscription));
        let output = GatewayStats::from_providers(vec![a]).to_string();
        assert!(output.contains("1 total"));
        assert!(output.contains("1 available"));
    }
}
