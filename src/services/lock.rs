//! Named, TTL-bounded mutual exclusion in the coordination store.
//!
//! A lock is a `SET NX PX` key holding an owner token. Acquisition retries a fixed
//! number of times before giving up with `ResourceLocked`. When the coordination
//! store cannot be reached the manager fails open: the operation runs unguarded and
//! relies on the database row locks alone.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::store::CoordinationStore;
use crate::utils::error::AppError;

const DEFAULT_RETRIES: u32 = 10;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(100);

const RESERVATION_LOCK_TTL: Duration = Duration::from_secs(15);
const PAYMENT_LOCK_TTL: Duration = Duration::from_secs(60);
const QUEUE_LOCK_TTL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockKey {
    name: String,
    ttl: Duration,
}

impl LockKey {
    pub fn new(name: impl Into<String>, ttl: Duration) -> Self {
        Self {
            name: name.into(),
            ttl,
        }
    }

    /// Holds and orders on a set of seats in a show. Ids are sorted so the same
    /// set always maps to the same key.
    pub fn seats(show_id: i64, seat_ids: &[i64]) -> Self {
        Self::new(
            format!("lock:reservation:show:{show_id}:{}", join_sorted(seat_ids)),
            RESERVATION_LOCK_TTL,
        )
    }

    pub fn ticket_types(event_id: i64, ticket_type_ids: &[i64]) -> Self {
        Self::new(
            format!(
                "lock:reservation:event:{event_id}:{}",
                join_sorted(ticket_type_ids)
            ),
            RESERVATION_LOCK_TTL,
        )
    }

    pub fn payment(order_id: i64) -> Self {
        Self::new(format!("lock:payment:{order_id}"), PAYMENT_LOCK_TTL)
    }

    /// Payments that do not settle a single order lock on their reference.
    pub fn payment_reference(reference: &str) -> Self {
        Self::new(format!("lock:payment:{reference}"), PAYMENT_LOCK_TTL)
    }

    pub fn queue(show_id: i64, user_id: i64) -> Self {
        Self::new(format!("lock:queue:{show_id}:{user_id}"), QUEUE_LOCK_TTL)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

fn join_sorted(ids: &[i64]) -> String {
    let mut ids = ids.to_vec();
    ids.sort_unstable();
    ids.dedup();
    ids.iter()
        .map(i64::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Proof of ownership for an acquired lock.
#[derive(Debug)]
pub struct LockGuard {
    key: String,
    token: String,
}

impl LockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn CoordinationStore>,
    retries: u32,
    retry_delay: Duration,
}

impl LockManager {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self {
            store,
            retries: DEFAULT_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    pub fn with_retry(mut self, retries: u32, retry_delay: Duration) -> Self {
        self.retries = retries;
        self.retry_delay = retry_delay;
        self
    }

    /// `Ok(None)` means the coordination store is down and the caller proceeds unguarded.
    pub async fn acquire(&self, key: &LockKey) -> Result<Option<LockGuard>, AppError> {
        let token = format!("{}:{}", Utc::now().timestamp_millis(), Uuid::new_v4());

        for attempt in 0..self.retries.max(1) {
            match self.store.set_if_absent(&key.name, &token, key.ttl).await {
                Ok(true) => {
                    tracing::debug!(key = %key.name, attempt, "Lock acquired");
                    return Ok(Some(LockGuard {
                        key: key.name.clone(),
                        token,
                    }));
                }
                Ok(false) => tokio::time::sleep(self.retry_delay).await,
                Err(e) => {
                    tracing::warn!(
                        key = %key.name,
                        error = %e,
                        "Coordination store unavailable, proceeding without distributed lock"
                    );
                    return Ok(None);
                }
            }
        }

        tracing::info!(key = %key.name, retries = self.retries, "Lock contention exceeded retry budget");
        Err(AppError::ResourceLocked)
    }

    /// Releases only if the key still carries this guard's token.
    pub async fn release(&self, guard: LockGuard) {
        match self.store.delete_if_equals(&guard.key, &guard.token).await {
            Ok(true) => tracing::debug!(key = %guard.key, "Lock released"),
            Ok(false) => {
                tracing::warn!(key = %guard.key, "Lock expired before release")
            }
            Err(e) => {
                tracing::warn!(key = %guard.key, error = %e, "Failed to release lock, TTL will clear it")
            }
        }
    }

    /// Runs `operation` while holding `key`, releasing it whether the operation
    /// succeeds or fails.
    pub async fn run_locked<T, F, Fut>(&self, key: &LockKey, operation: F) -> Result<T, AppError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let guard = self.acquire(key).await?;
        let result = operation().await;
        if let Some(guard) = guard {
            self.release(guard).await;
        }
        result
    }
}
