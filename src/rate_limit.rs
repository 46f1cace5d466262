//! Per-resource-class call spacing.
//!
//! [`RateLimiter::acquire`] enforces a minimum interval between grants for the
//! same resource class. Each class has its own async mutex, so the
//! read-sleep-update sequence is atomic per class while unrelated classes
//! never wait on each other.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::{Instant, sleep_until};
use tracing::trace;

use crate::config::EngineConfig;

/// Resource class used when a handler does not name one.
pub const DEFAULT_RESOURCE_CLASS: &str = "default";

#[derive(Debug)]
pub struct RateLimiter {
    default_interval: Duration,
    intervals: HashMap<String, Duration>,
    // Last grant per class. The outer lock only guards the map itself.
    classes: Mutex<HashMap<String, Arc<tokio::sync::Mutex<Option<Instant>>>>>,
}

impl RateLimiter {
    pub fn new(default_interval: Duration) -> Self {
        Self {
            default_interval,
            intervals: HashMap::new(),
            classes: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        let mut limiter = Self::new(config.rate_limit_interval());
        for (class, ms) in &config.rate_limits {
            limiter = limiter.with_interval(class.clone(), Duration::from_millis(*ms));
        }
        limiter
    }

    /// Overrides the interval for one resource class.
    pub fn with_interval(mut self, class: impl Into<String>, interval: Duration) -> Self {
        self.intervals.insert(class.into(), interval);
        self
    }

    pub fn interval_for(&self, class: &str) -> Duration {
        self.intervals
            .get(class)
            .copied()
            .unwrap_or(self.default_interval)
    }

    /// Waits until a call on `class` is permitted and records the grant.
    ///
    /// Dropping the returned future before it completes releases the class
    /// without recording a grant.
    pub async fn acquire(&self, class: &str) {
        let interval = self.interval_for(class);
        if interval.is_zero() {
            return;
        }

        let slot = self.slot(class);
        let mut last = slot.lock().await;
        if let Some(previous) = *last {
            let ready_at = previous + interval;
            let now = Instant::now();
            if ready_at > now {
                trace!(class, wait_ms = (ready_at - now).as_millis() as u64, "rate limited");
                sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
    }

    fn slot(&self, class: &str) -> Arc<tokio::sync::Mutex<Option<Instant>>> {
        let mut classes = self.classes.lock();
        Arc::clone(classes.entry(class.to_string()).or_default())
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn consecutive_acquires_are_spaced() {
        let limiter = RateLimiter::new(Duration::from_millis(100));

        limiter.acquire("catalog").await;
        let first = Instant::now();
        limiter.acquire("catalog").await;
        let second = Instant::now();

        assert!(second - first >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn first_acquire_is_immediate() {
        let limiter = RateLimiter::new(Duration::from_secs(5));
        let start = Instant::now();
        limiter.acquire("search").await;
        assert_eq!(Instant::now(), start);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_respect_interval() {
        let limiter = Arc::new(RateLimiter::new(Duration::from_millis(50)));
        let grants = Arc::new(Mutex::new(Vec::new()));

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..4 {
            let limiter = Arc::clone(&limiter);
            let grants = Arc::clone(&grants);
            tasks.spawn(async move {
                limiter.acquire("scrape").await;
                grants.lock().push(Instant::now());
            });
        }
        while tasks.join_next().await.is_some() {}

        let mut grants = grants.lock().clone();
        grants.sort();
        assert_eq!(grants.len(), 4);
        for pair in grants.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(50));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn classes_do_not_contend() {
        let limiter = RateLimiter::new(Duration::from_secs(10));
        limiter.acquire("a").await;

        let start = Instant::now();
        limiter.acquire("b").await;
        assert_eq!(Instant::now(), start);
    }

    #[tokio::test(start_paused = true)]
    async fn per_class_interval_overrides_default() {
        let limiter = RateLimiter::new(Duration::from_secs(10))
            .with_interval("fast", Duration::from_millis(10));
        assert_eq!(limiter.interval_for("fast"), Duration::from_millis(10));
        assert_eq!(limiter.interval_for("other"), Duration::from_secs(10));

        limiter.acquire("fast").await;
        let start = Instant::now();
        limiter.acquire("fast").await;
        let waited = Instant::now() - start;
        assert!(waited >= Duration::from_millis(10));
        assert!(waited < Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_never_waits() {
        let limiter = RateLimiter::new(Duration::ZERO);
        let start = Instant::now();
        for _ in 0..10 {
            limiter.acquire(DEFAULT_RESOURCE_CLASS).await;
        }
        assert_eq!(Instant::now(), start);
    }

    #[test]
    fn from_config_reads_class_table() {
        let mut config = EngineConfig::default();
        config.rate_limits.insert("ai".into(), 1500);
        let limiter = RateLimiter::from_config(&config);
        assert_eq!(limiter.interval_for("ai"), Duration::from_millis(1500));
        assert_eq!(limiter.interval_for(DEFAULT_RESOURCE_CLASS), Duration::from_millis(100));
    }
}
