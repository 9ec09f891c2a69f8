//! Response replay for retried mutating requests.
//!
//! The first successful response for a key is stored with a scope TTL and
//! returned verbatim to every retry. Failures are not stored, so a retry after
//! an error runs again. A missing or unreachable coordination store never blocks
//! the request.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderMap, Method};
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::store::CoordinationStore;
use crate::utils::error::AppError;
use crate::utils::response::StoredResponse;

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";
pub const X_IDEMPOTENCY_KEY_HEADER: &str = "x-idempotency-key";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdempotencyScope {
    Reservation,
    Payment,
    Queue,
}

impl IdempotencyScope {
    pub fn prefix(self) -> &'static str {
        match self {
            IdempotencyScope::Reservation => "idempotency:reservation:",
            IdempotencyScope::Payment => "idempotency:payment:",
            IdempotencyScope::Queue => "idempotency:queue:",
        }
    }

    pub fn ttl(self) -> Duration {
        match self {
            IdempotencyScope::Reservation => Duration::from_secs(15 * 60),
            IdempotencyScope::Payment => Duration::from_secs(24 * 60 * 60),
            IdempotencyScope::Queue => Duration::from_secs(60 * 60),
        }
    }
}

/// Client-supplied key, or `auto:` plus a digest of what makes the request unique.
pub fn request_key(
    headers: &HeaderMap,
    method: &Method,
    path: &str,
    body: &serde_json::Value,
    user_id: Option<i64>,
) -> String {
    let supplied = [IDEMPOTENCY_KEY_HEADER, X_IDEMPOTENCY_KEY_HEADER]
        .iter()
        .filter_map(|name| headers.get(*name))
        .filter_map(|value| value.to_str().ok())
        .map(str::trim)
        .find(|value| !value.is_empty());

    if let Some(key) = supplied {
        return key.to_string();
    }

    let fingerprint = json!({
        "method": method.as_str(),
        "path": path,
        "body": body,
        "userId": user_id,
    });
    let digest = hex::encode(Sha256::digest(fingerprint.to_string().as_bytes()));
    format!("auto:{}", &digest[..32])
}

#[derive(Clone)]
pub struct IdempotencyCache {
    store: Arc<dyn CoordinationStore>,
}

impl IdempotencyCache {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self { store }
    }

    async fn lookup(&self, redis_key: &str) -> Option<StoredResponse> {
        match self.store.get(redis_key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(stored) => Some(stored),
                Err(e) => {
                    tracing::warn!(key = %redis_key, error = %e, "Discarding unreadable idempotency record");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Idempotency store unavailable, running request without replay");
                None
            }
        }
    }

    pub async fn replay_or_run<F, Fut>(
        &self,
        scope: IdempotencyScope,
        key: &str,
        operation: F,
    ) -> Result<StoredResponse, AppError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<StoredResponse, AppError>>,
    {
        let redis_key = format!("{}{}", scope.prefix(), key);

        if let Some(stored) = self.lookup(&redis_key).await {
            tracing::info!(key = %key, "Replaying idempotent response");
            return Ok(stored);
        }

        let response = operation().await?;

        if response.is_success() {
            match serde_json::to_string(&response) {
                Ok(raw) => {
                    if let Err(e) = self.store.set_with_ttl(&redis_key, &raw, scope.ttl()).await {
                        tracing::warn!(key = %key, error = %e, "Failed to store idempotent response");
                    }
                }
                Err(e) => tracing::warn!(key = %key, error = %e, "Failed to encode idempotent response"),
            }
        }
        Ok(response)
    }
}
