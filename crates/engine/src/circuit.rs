//! Per-executor circuit breaker.
//!
//! `CircuitBreakerStore` isolates the failure counters from their storage so
//! the default in-process map can later be swapped for a shared backend
//! (e.g. `db::repository::circuit_breaker`) without changing the task
//! runner. The in-process implementation uses `tokio::time::Instant` rather
//! than wall-clock time so tests can exercise the reset window with
//! `tokio::time::pause`/`advance` instead of sleeping for real.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::time::{Duration, Instant};

/// Consecutive failures, per executor name, before the breaker opens.
pub const CIRCUIT_BREAKER_THRESHOLD: u32 = 5;
/// Seconds the breaker stays open once tripped.
pub const CIRCUIT_BREAKER_RESET_SECS: u64 = 300;

#[async_trait]
pub trait CircuitBreakerStore: Send + Sync {
    /// Whether the breaker for `executor` is currently open (attempts
    /// should be rejected without invoking the executor).
    async fn is_open(&self, executor: &str) -> bool;

    /// Record a failed attempt, possibly tripping the breaker.
    async fn record_failure(&self, executor: &str);

    /// Record a successful attempt, resetting the counter.
    async fn record_success(&self, executor: &str);
}

#[derive(Default, Clone)]
struct BreakerEntry {
    failures: u32,
    opened_at: Option<Instant>,
}

/// Single-process breaker state shared by every task runner in the worker.
pub struct InMemoryBreakerStore {
    threshold: u32,
    reset_window: Duration,
    state: Mutex<HashMap<String, BreakerEntry>>,
}

impl InMemoryBreakerStore {
    pub fn new(threshold: u32, reset_window: Duration) -> Self {
        Self {
            threshold,
            reset_window,
            state: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryBreakerStore {
    fn default() -> Self {
        Self::new(CIRCUIT_BREAKER_THRESHOLD, Duration::from_secs(CIRCUIT_BREAKER_RESET_SECS))
    }
}

#[async_trait]
impl CircuitBreakerStore for InMemoryBreakerStore {
    async fn is_open(&self, executor: &str) -> bool {
        let mut state = self.state.lock().unwrap();
        let entry = state.entry(executor.to_string()).or_default();
        match entry.opened_at {
            Some(opened) if opened.elapsed() < self.reset_window => true,
            Some(_) => {
                // Reset window elapsed — admit the next attempt.
                entry.failures = 0;
                entry.opened_at = None;
                false
            }
            None => false,
        }
    }

    async fn record_failure(&self, executor: &str) {
        let mut state = self.state.lock().unwrap();
        let entry = state.entry(executor.to_string()).or_default();
        entry.failures += 1;
        if entry.failures >= self.threshold && entry.opened_at.is_none() {
            entry.opened_at = Some(Instant::now());
        }
    }

    async fn record_success(&self, executor: &str) {
        let mut state = self.state.lock().unwrap();
        state.insert(executor.to_string(), BreakerEntry::default());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn opens_after_threshold_failures() {
        let store = InMemoryBreakerStore::new(5, Duration::from_secs(300));
        for _ in 0..4 {
            store.record_failure("shell").await;
            assert!(!store.is_open("shell").await);
        }
        store.record_failure("shell").await;
        assert!(store.is_open("shell").await);
    }

    #[tokio::test(start_paused = true)]
    async fn closes_after_reset_window_elapses() {
        let store = InMemoryBreakerStore::new(2, Duration::from_secs(300));
        store.record_failure("http").await;
        store.record_failure("http").await;
        assert!(store.is_open("http").await);

        tokio::time::advance(Duration::from_secs(301)).await;
        assert!(!store.is_open("http").await);
    }

    #[tokio::test]
    async fn success_resets_counter() {
        let store = InMemoryBreakerStore::new(3, Duration::from_secs(300));
        store.record_failure("sql").await;
        store.record_failure("sql").await;
        store.record_success("sql").await;
        store.record_failure("sql").await;
        assert!(!store.is_open("sql").await);
    }

    #[tokio::test]
    async fn distinct_executors_have_independent_counters() {
        let store = InMemoryBreakerStore::new(1, Duration::from_secs(300));
        store.record_failure("shell").await;
        assert!(store.is_open("shell").await);
        assert!(!store.is_open("http").await);
    }
}
