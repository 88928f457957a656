use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Length of the rolling usage window
pub const USAGE_WINDOW: Duration = Duration::from_secs(3600);

/// Per-provider request accounting: a lifetime total plus a rolling one-hour window.
///
/// Thread-safe; `record` may be called from any number of concurrent requests.
#[derive(Debug)]
pub struct UsageTracker {
    total: AtomicU64,
    recent: Mutex<VecDeque<Instant>>,
    limit: Option<u64>,
}

impl UsageTracker {
    pub fn new(limit: Option<u64>) -> Self {
        Self {
            total: AtomicU64::new(0),
            recent: Mutex::new(VecDeque::new()),
            limit,
        }
    }

    /// Record one accepted request. Returns the new lifetime total.
    pub fn record(&self) -> u64 {
        let now = Instant::now();
        let mut recent = lock(&self.recent);
        prune(&mut recent, now);
        recent.push_back(now);
        self.total.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::SeqCst)
    }

    /// Requests recorded within the last hour
    pub fn last_hour(&self) -> u64 {
        let mut recent = lock(&self.recent);
        prune(&mut recent, Instant::now());
        recent.len() as u64
    }

    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    pub fn limit_reached(&self) -> bool {
        match self.limit {
            Some(limit) => self.last_hour() >= limit,
            None => false,
        }
    }

    /// Requests left in the current window; `None` when unlimited
    pub fn headroom(&self) -> Option<u64> {
        self.limit
            .map(|limit| limit.saturating_sub(self.last_hour()))
    }

    /// How long until the window frees a slot, if the limit is currently reached
    pub fn time_until_headroom(&self) -> Option<Duration> {
        let limit = self.limit?;
        let now = Instant::now();
        let mut recent = lock(&self.recent);
        prune(&mut recent, now);

        if (recent.len() as u64) < limit {
            return None;
        }

        // The slot frees when the entry that keeps us at the limit ages out
        let index = recent.len() - limit as usize;
        recent
            .get(index)
            .map(|oldest| (*oldest + USAGE_WINDOW).saturating_duration_since(now))
    }
}

fn prune(recent: &mut VecDeque<Instant>, now: Instant) {
    while let Some(front) = recent.front() {
        if now.saturating_duration_since(*front) >= USAGE_WINDOW {
            recent.pop_front();
        } else {
            break;
        }
    }
}

/// Lock a mutex, recovering the data if a previous holder panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
