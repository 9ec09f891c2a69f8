//! Circuit breaker in front of the coordination store.
//!
//! - **Closed**: calls pass through and consecutive outages are counted.
//! - **Open**: calls fail immediately until the reset period has passed.
//! - **HalfOpen**: calls pass through again; one success closes the circuit, one
//!   outage reopens it.
//!
//! Only `CoordinationError::Unavailable` counts as an outage. Every caller already
//! degrades on `Unavailable`, so an open circuit turns a slow timeout into an
//! immediate fallback.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::store::{CoordinationError, CoordinationStore};

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
pub const DEFAULT_RESET_AFTER: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct Breaker {
    state: CircuitState,
    failures: u32,
    opened_at: Option<Instant>,
}

pub struct CircuitBreakerStore {
    inner: Arc<dyn CoordinationStore>,
    failure_threshold: u32,
    reset_after: Duration,
    breaker: Mutex<Breaker>,
}

impl CircuitBreakerStore {
    pub fn new(inner: Arc<dyn CoordinationStore>) -> Self {
        Self::with_limits(inner, DEFAULT_FAILURE_THRESHOLD, DEFAULT_RESET_AFTER)
    }

    pub fn with_limits(
        inner: Arc<dyn CoordinationStore>,
        failure_threshold: u32,
        reset_after: Duration,
    ) -> Self {
        Self {
            inner,
            failure_threshold: failure_threshold.max(1),
            reset_after,
            breaker: Mutex::new(Breaker {
                state: CircuitState::Closed,
                failures: 0,
                opened_at: None,
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.breaker().state
    }

    fn breaker(&self) -> std::sync::MutexGuard<'_, Breaker> {
        self.breaker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn admit(&self) -> Result<(), CoordinationError> {
        let mut breaker = self.breaker();
        if breaker.state != CircuitState::Open {
            return Ok(());
        }
        match breaker.opened_at {
            Some(at) if at.elapsed() < self.reset_after => Err(CoordinationError::Unavailable(
                "circuit open, coordination store recently failed".to_string(),
            )),
            _ => {
                tracing::info!("Coordination circuit half-open, trying the store again");
                breaker.state = CircuitState::HalfOpen;
                Ok(())
            }
        }
    }

    fn record<T>(&self, outcome: &Result<T, CoordinationError>) {
        let mut breaker = self.breaker();
        match outcome {
            Err(CoordinationError::Unavailable(reason)) => {
                breaker.failures += 1;
                let trips = breaker.state == CircuitState::HalfOpen
                    || breaker.failures >= self.failure_threshold;
                if trips && breaker.state != CircuitState::Open {
                    tracing::error!(
                        failures = breaker.failures,
                        reason = %reason,
                        "Coordination circuit opened"
                    );
                    breaker.state = CircuitState::Open;
                    breaker.opened_at = Some(Instant::now());
                }
            }
            _ => {
                if breaker.state == CircuitState::HalfOpen {
                    tracing::info!("Coordination circuit closed");
                }
                breaker.state = CircuitState::Closed;
                breaker.failures = 0;
                breaker.opened_at = None;
            }
        }
    }

    async fn guarded<T, Fut>(&self, call: Fut) -> Result<T, CoordinationError>
    where
        Fut: Future<Output = Result<T, CoordinationError>> + Send,
    {
        self.admit()?;
        let outcome = call.await;
        self.record(&outcome);
        outcome
    }
}

#[async_trait]
impl CoordinationStore for CircuitBreakerStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, CoordinationError> {
        self.guarded(self.inner.set_if_absent(key, value, ttl)).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CoordinationError> {
        self.guarded(self.inner.get(key)).await
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CoordinationError> {
        self.guarded(self.inner.set_with_ttl(key, value, ttl)).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), CoordinationError> {
        self.guarded(self.inner.set(key, value)).await
    }

    async fn delete(&self, key: &str) -> Result<(), CoordinationError> {
        self.guarded(self.inner.delete(key)).await
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, CoordinationError> {
        self.guarded(self.inner.delete_if_equals(key, expected)).await
    }

    async fn push_back(&self, key: &str, value: &str) -> Result<u64, CoordinationError> {
        self.guarded(self.inner.push_back(key, value)).await
    }

    async fn pop_front(&self, key: &str) -> Result<Option<String>, CoordinationError> {
        self.guarded(self.inner.pop_front(key)).await
    }

    async fn list_len(&self, key: &str) -> Result<u64, CoordinationError> {
        self.guarded(self.inner.list_len(key)).await
    }

    async fn list_all(&self, key: &str) -> Result<Vec<String>, CoordinationError> {
        self.guarded(self.inner.list_all(key)).await
    }

    async fn list_remove(&self, key: &str, value: &str) -> Result<u64, CoordinationError> {
        self.guarded(self.inner.list_remove(key, value)).await
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, CoordinationError> {
        self.guarded(self.inner.keys_with_prefix(prefix)).await
    }

    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<i64, CoordinationError> {
        self.guarded(self.inner.incr_with_ttl(key, ttl)).await
    }

    async fn decr_if_present(&self, key: &str) -> Result<i64, CoordinationError> {
        self.guarded(self.inner.decr_if_present(key)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryCoordinationStore;

    fn breaker_over(store: &Arc<MemoryCoordinationStore>, reset_after: Duration) -> CircuitBreakerStore {
        CircuitBreakerStore::with_limits(store.clone(), 3, reset_after)
    }

    #[tokio::test]
    async fn opens_after_consecutive_outages() {
        let store = Arc::new(MemoryCoordinationStore::new());
        let breaker = breaker_over(&store, Duration::from_secs(60));

        store.set_available(false);
        for _ in 0..2 {
            assert!(breaker.get("k").await.is_err());
            assert_eq!(breaker.state(), CircuitState::Closed);
        }
        assert!(breaker.get("k").await.is_err());
        assert_eq!(breaker.state(), CircuitState::Open);

        // the store is back but the circuit still short-circuits
        store.set_available(true);
        match breaker.get("k").await {
            Err(CoordinationError::Unavailable(reason)) => assert!(reason.contains("circuit open")),
            other => panic!("expected open circuit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn success_resets_the_failure_count() {
        let store = Arc::new(MemoryCoordinationStore::new());
        let breaker = breaker_over(&store, Duration::from_secs(60));

        store.set_available(false);
        assert!(breaker.get("k").await.is_err());
        assert!(breaker.get("k").await.is_err());
        store.set_available(true);
        assert_eq!(breaker.get("k").await.unwrap(), None);
        store.set_available(false);
        assert!(breaker.get("k").await.is_err());
        assert!(breaker.get("k").await.is_err());
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_trial_closes_or_reopens() {
        let store = Arc::new(MemoryCoordinationStore::new());
        let breaker = breaker_over(&store, Duration::from_millis(20));

        store.set_available(false);
        for _ in 0..3 {
            let _ = breaker.get("k").await;
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        // a failed trial reopens straight away
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(breaker.get("k").await.is_err());
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(40)).await;
        store.set_available(true);
        assert!(breaker.set("k", "v").await.is_ok());
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.get("k").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn malformed_data_is_not_an_outage() {
        let store = Arc::new(MemoryCoordinationStore::new());
        let breaker = breaker_over(&store, Duration::from_secs(60));

        breaker.push_back("list", "a").await.unwrap();
        for _ in 0..5 {
            assert!(matches!(breaker.get("list").await, Err(CoordinationError::Malformed(_))));
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
    }
}
