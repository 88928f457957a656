mod common;

use anthropic_lb::config::ProviderType;
use anthropic_lb::health::run_health_cycle;
use anthropic_lb::manager::ProviderManager;
use anthropic_lb::provider::{HealthStatus, Provider, ProviderState};
use common::{Behavior, MockProvider, Probe, request};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_cycle_marks_failing_probe_unhealthy() {
    let up = MockProvider::new("up", 1);
    let down = MockProvider::new("down", 2);
    down.set_probe(Probe::Unhealthy);
    let providers: Vec<Arc<dyn Provider>> = vec![up.clone(), down.clone()];

    let report = run_health_cycle(&providers, 4).await;

    assert_eq!(report.checked, 2);
    assert_eq!(report.healthy, 1);
    assert_eq!(report.unhealthy, 1);
    assert!(up.state().is_healthy());
    assert!(!down.state().is_healthy());
    assert!(matches!(
        down.state().last_health_status(),
        Some(HealthStatus::Unhealthy(reason)) if reason.contains("connection refused")
    ));
}

#[tokio::test]
async fn test_panicking_probe_does_not_abort_cycle() {
    let a = MockProvider::new("a", 1);
    let boom = MockProvider::new("boom", 2);
    boom.set_probe(Probe::Panic);
    let c = MockProvider::new("c", 3);
    let providers: Vec<Arc<dyn Provider>> = vec![a.clone(), boom.clone(), c.clone()];

    let report = run_health_cycle(&providers, 1).await;

    assert_eq!(report.checked, 3);
    assert_eq!(report.unhealthy, 1);
    assert!(a.state().is_healthy());
    assert!(c.state().is_healthy());
    assert!(!boom.state().is_healthy());
}

#[tokio::test(start_paused = true)]
async fn test_slow_probe_times_out_without_blocking_others() {
    let slow = MockProvider::from_state(
        ProviderState::new("slow", 1, ProviderType::Subscription).with_timeout(Duration::from_secs(5)),
        Behavior::Succeed,
    );
    slow.set_probe(Probe::Slow(Duration::from_secs(3600)));
    let fast = MockProvider::new("fast", 2);
    let providers: Vec<Arc<dyn Provider>> = vec![slow.clone(), fast.clone()];

    let started = tokio::time::Instant::now();
    let report = run_health_cycle(&providers, 2).await;

    assert!(started.elapsed() < Duration::from_secs(3600));
    assert_eq!(report.healthy, 1);
    assert!(!slow.state().is_healthy());
    assert!(fast.state().is_healthy());
    assert!(matches!(
        slow.state().last_health_status(),
        Some(HealthStatus::Unhealthy(reason)) if reason.contains("timed out")
    ));
}

#[tokio::test(start_paused = true)]
async fn test_monitor_runs_immediately_then_on_interval() {
    let manager = ProviderManager::new(Duration::from_secs(60));
    let provider = MockProvider::new("p", 1);
    provider.set_probe(Probe::Unhealthy);
    manager.add_provider(provider.clone()).unwrap();

    manager.start_health_monitoring();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(provider.probes(), 1);
    assert!(!provider.state().is_healthy());
    assert!(manager.route_create_message(&request()).await.is_err());

    provider.set_probe(Probe::Healthy);
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(provider.probes(), 2);
    assert!(provider.state().is_healthy());
    assert!(manager.route_create_message(&request()).await.is_ok());

    manager.stop_health_monitoring().await;
}

#[tokio::test(start_paused = true)]
async fn test_start_twice_runs_one_loop() {
    let manager = ProviderManager::new(Duration::from_secs(60));
    let provider = MockProvider::new("p", 1);
    manager.add_provider(provider.clone()).unwrap();

    manager.start_health_monitoring();
    manager.start_health_monitoring();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(provider.probes(), 1);
    manager.stop_health_monitoring().await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_ends_probing() {
    let manager = ProviderManager::new(Duration::from_secs(30));
    let provider = MockProvider::new("p", 1);
    manager.add_provider(provider.clone()).unwrap();

    manager.start_health_monitoring();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(manager.is_monitoring());

    manager.stop_health_monitoring().await;
    assert!(!manager.is_monitoring());

    let probes = provider.probes();
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(provider.probes(), probes);

    // Stopping again is harmless
    manager.stop_health_monitoring().await;
}

#[tokio::test]
async fn test_one_off_check_recovers_provider() {
    let manager = ProviderManager::default();
    let provider = MockProvider::new("p", 1);
    manager.add_provider(provider.clone()).unwrap();
    provider
        .state()
        .record_health(HealthStatus::Unhealthy("stale".to_string()));

    let report = manager.check_all_providers().await;

    assert_eq!(report.checked, 1);
    assert_eq!(report.healthy, 1);
    assert_eq!(manager.get_healthy_providers().len(), 1);
}
