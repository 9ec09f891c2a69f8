//! Fixed-window request limits kept in the coordination store.
//!
//! Each policy counts hits per client under `rl:<policy>:<client>`. The window
//! starts with the first hit. An unreachable store admits the request.

use std::sync::Arc;
use std::time::Duration;

use crate::config::RateLimitConfig;
use crate::store::CoordinationStore;
use crate::utils::error::AppError;

const MINUTE: Duration = Duration::from_secs(60);
const QUARTER_HOUR: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub name: &'static str,
    pub max: u64,
    pub window: Duration,
    /// Responses below 400 give their hit back.
    pub skip_successful: bool,
}

impl RateLimitPolicy {
    pub const fn new(name: &'static str, max: u64, window: Duration) -> Self {
        Self {
            name,
            max,
            window,
            skip_successful: false,
        }
    }

    pub const fn skipping_successful(mut self) -> Self {
        self.skip_successful = true;
        self
    }

    fn key(&self, client: &str) -> String {
        format!("rl:{}:{}", self.name, client)
    }

    fn retry_after_secs(&self) -> u64 {
        self.window.as_secs().max(1)
    }
}

/// The policy applied to each route group.
#[derive(Debug, Clone, Copy)]
pub struct RateLimits {
    pub general: RateLimitPolicy,
    pub purchase: RateLimitPolicy,
    pub webhook: RateLimitPolicy,
    pub strict: RateLimitPolicy,
    pub queue_join: RateLimitPolicy,
    pub queue_position: RateLimitPolicy,
    pub queue_verify: RateLimitPolicy,
    pub queue_status: RateLimitPolicy,
}

impl RateLimits {
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self {
            general: RateLimitPolicy::new("general", config.general, QUARTER_HOUR),
            purchase: RateLimitPolicy::new("purchase", config.purchase, MINUTE).skipping_successful(),
            webhook: RateLimitPolicy::new("webhook", config.webhook, MINUTE),
            strict: RateLimitPolicy::new("strict", config.strict, QUARTER_HOUR),
            queue_join: RateLimitPolicy::new("queue-join", config.queue_join, MINUTE),
            queue_position: RateLimitPolicy::new("queue-position", config.queue_position, MINUTE),
            queue_verify: RateLimitPolicy::new("queue-verify", config.queue_verify, MINUTE),
            queue_status: RateLimitPolicy::new("queue-status", config.queue_status, MINUTE),
        }
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn CoordinationStore>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self { store }
    }

    /// Counts one hit for `client` and rejects it once the window is used up.
    pub async fn check(&self, policy: &RateLimitPolicy, client: &str) -> Result<(), AppError> {
        match self.store.incr_with_ttl(&policy.key(client), policy.window).await {
            Ok(hits) if u64::try_from(hits).unwrap_or(0) > policy.max => {
                tracing::warn!(policy = policy.name, client = %client, hits, "Rate limit exceeded");
                Err(AppError::RateLimited {
                    retry_after_secs: policy.retry_after_secs(),
                })
            }
            Ok(_) => Ok(()),
            Err(e) => {
                tracing::warn!(policy = policy.name, error = %e, "Rate limit store unavailable, allowing request");
                Ok(())
            }
        }
    }

    /// Gives back the hit of a request that should not count.
    pub async fn forgive(&self, policy: &RateLimitPolicy, client: &str) {
        if let Err(e) = self.store.decr_if_present(&policy.key(client)).await {
            tracing::debug!(policy = policy.name, error = %e, "Could not return rate limit hit");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryCoordinationStore;

    const TWO_PER_MINUTE: RateLimitPolicy = RateLimitPolicy::new("test", 2, MINUTE);

    fn limiter() -> (Arc<MemoryCoordinationStore>, RateLimiter) {
        let store = Arc::new(MemoryCoordinationStore::new());
        (store.clone(), RateLimiter::new(store))
    }

    #[tokio::test]
    async fn rejects_hits_beyond_the_window_budget() {
        let (_, limiter) = limiter();
        limiter.check(&TWO_PER_MINUTE, "1.2.3.4").await.unwrap();
        limiter.check(&TWO_PER_MINUTE, "1.2.3.4").await.unwrap();

        match limiter.check(&TWO_PER_MINUTE, "1.2.3.4").await {
            Err(AppError::RateLimited { retry_after_secs }) => assert_eq!(retry_after_secs, 60),
            other => panic!("expected rate limit, got {other:?}"),
        }
        // other clients keep their own budget
        limiter.check(&TWO_PER_MINUTE, "5.6.7.8").await.unwrap();
    }

    #[tokio::test]
    async fn policies_count_separately() {
        let (_, limiter) = limiter();
        let other = RateLimitPolicy::new("other", 1, MINUTE);
        limiter.check(&other, "c").await.unwrap();
        limiter.check(&TWO_PER_MINUTE, "c").await.unwrap();
        assert!(limiter.check(&other, "c").await.is_err());
    }

    #[tokio::test]
    async fn forgiven_hits_free_their_slot() {
        let (_, limiter) = limiter();
        for _ in 0..5 {
            limiter.check(&TWO_PER_MINUTE, "c").await.unwrap();
            limiter.forgive(&TWO_PER_MINUTE, "c").await;
        }
        limiter.check(&TWO_PER_MINUTE, "c").await.unwrap();
        limiter.check(&TWO_PER_MINUTE, "c").await.unwrap();
        assert!(limiter.check(&TWO_PER_MINUTE, "c").await.is_err());
    }

    #[tokio::test]
    async fn unreachable_store_admits_requests() {
        let (store, limiter) = limiter();
        store.set_available(false);
        for _ in 0..5 {
            limiter.check(&TWO_PER_MINUTE, "c").await.unwrap();
        }
        limiter.forgive(&TWO_PER_MINUTE, "c").await;
    }

    #[test]
    fn purchase_policy_skips_successful_requests() {
        let limits = RateLimits::from_config(&RateLimitConfig::default());
        assert!(limits.purchase.skip_successful);
        assert_eq!(limits.purchase.max, 5);
        assert!(!limits.strict.skip_successful);
        assert_eq!(limits.strict.window, QUARTER_HOUR);
    }
}
