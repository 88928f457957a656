//! Recurring health probing.
//!
//! Every cycle spawns one task per provider, bounded by a semaphore, so a
//! slow or hanging probe only holds its own permit. The loop runs until its
//! cancellation token fires; in-flight probes are aborted on shutdown.

use arc_swap::ArcSwap;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::provider::{HealthStatus, Provider};

/// Registration-ordered provider list shared between the manager and the monitor
pub type ProviderList = Arc<ArcSwap<Vec<Arc<dyn Provider>>>>;

/// Summary of one health cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthCycleReport {
    pub checked: usize,
    pub healthy: usize,
    pub unhealthy: usize,
}

/// Probe every provider concurrently, at most `max_concurrent` at a time.
///
/// Never fails: a probe that errors, times out or panics counts as unhealthy.
pub async fn run_health_cycle(
    providers: &[Arc<dyn Provider>],
    max_concurrent: usize,
) -> HealthCycleReport {
    let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));
    let mut tasks = JoinSet::new();

    for provider in providers {
        let provider = Arc::clone(provider);
        let semaphore = Arc::clone(&semaphore);

        tasks.spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return false;
            };

            match AssertUnwindSafe(provider.health_check()).catch_unwind().await {
                Ok(healthy) => healthy,
                Err(_) => {
                    provider
                        .state()
                        .record_health(HealthStatus::Unhealthy("health check panicked".to_string()));
                    false
                }
            }
        });
    }

    let mut report = HealthCycleReport::default();
    while let Some(result) = tasks.join_next().await {
        report.checked += 1;
        match result {
            Ok(true) => report.healthy += 1,
            Ok(false) => report.unhealthy += 1,
            Err(e) => {
                warn!(error = %e, "Health check task failed");
                report.unhealthy += 1;
            }
        }
    }

    debug!(
        checked = report.checked,
        healthy = report.healthy,
        unhealthy = report.unhealthy,
        "Health check cycle complete"
    );

    report
}

/// Handle to the background health-check loop
pub struct HealthMonitor {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl HealthMonitor {
    /// Start the loop. The first cycle runs immediately.
    pub fn spawn(providers: ProviderList, interval: Duration, max_concurrent: usize) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!(
                interval_secs = interval.as_secs(),
                max_concurrent, "Health monitoring started"
            );

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let snapshot = providers.load_full();
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = run_health_cycle(&snapshot, max_concurrent) => {}
                }
            }

            info!("Health monitoring stopped");
        });

        Self { cancel, handle }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Cancel the loop and wait for it to exit
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            if !e.is_cancelled() {
                warn!(error = %e, "Health monitoring task ended abnormally");
            }
        }
    }
}
