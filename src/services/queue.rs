//! Per-show virtual waiting room.
//!
//! Each show has a FIFO list of entries. A user may wait in one queue at a time,
//! tracked by a marker key that expires with the queue timeout. Admission pops
//! the head and mints a short-lived access token that holds and orders must
//! present while the show has its queue enabled.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::services::lock::{LockKey, LockManager};
use crate::store::{CoordinationError, CoordinationStore};
use crate::utils::error::AppError;

const QUEUE_KEY_PREFIX: &str = "queue:show:";
const USER_MARKER_PREFIX: &str = "user:queue:";
const ACCESS_TOKEN_MINUTES: i64 = 15;
const SECONDS_PER_POSITION: u64 = 30;

fn queue_key(show_id: i64) -> String {
    format!("{QUEUE_KEY_PREFIX}{show_id}")
}

fn user_marker_key(user_id: i64) -> String {
    format!("{USER_MARKER_PREFIX}{user_id}")
}

fn access_key(show_id: i64, user_id: i64) -> String {
    format!("access:{show_id}:{user_id}")
}

fn required_key(show_id: i64) -> String {
    format!("queue:{show_id}:enabled")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub user_id: i64,
    pub show_id: i64,
    pub joined_at: DateTime<Utc>,
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinReceipt {
    pub position: u64,
    pub session_id: String,
    pub estimated_wait_time: u64,
    pub queue_size: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuePosition {
    pub show_id: i64,
    pub user_id: i64,
    pub position: u64,
    pub estimated_wait_time: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Admission {
    pub user_id: i64,
    pub show_id: i64,
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    pub show_id: i64,
    pub queue_size: u64,
    pub max_size: u64,
    pub is_open: bool,
    pub queue_required: bool,
}

#[derive(Clone)]
pub struct VirtualQueue {
    store: Arc<dyn CoordinationStore>,
    locks: LockManager,
    max_size: u64,
    timeout: ChronoDuration,
}

impl VirtualQueue {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        locks: LockManager,
        max_size: u64,
        timeout_minutes: i64,
    ) -> Self {
        Self {
            store,
            locks,
            max_size,
            timeout: ChronoDuration::minutes(timeout_minutes),
        }
    }

    fn marker_ttl(&self) -> Duration {
        self.timeout.to_std().unwrap_or(Duration::from_secs(15 * 60))
    }

    async fn entries(&self, show_id: i64) -> Result<Vec<(String, QueueEntry)>, AppError> {
        let raw = self.store.list_all(&queue_key(show_id)).await?;
        Ok(raw
            .into_iter()
            .filter_map(|item| match serde_json::from_str::<QueueEntry>(&item) {
                Ok(entry) => Some((item, entry)),
                Err(e) => {
                    tracing::warn!(show_id, error = %e, "Skipping malformed queue entry");
                    None
                }
            })
            .collect())
    }

    async fn find_position(&self, show_id: i64, user_id: i64) -> Result<Option<u64>, AppError> {
        let entries = self.entries(show_id).await?;
        Ok(entries
            .iter()
            .position(|(_, entry)| entry.user_id == user_id)
            .map(|index| index as u64 + 1))
    }

    pub async fn join(&self, show_id: i64, user_id: i64, now: DateTime<Utc>) -> Result<JoinReceipt, AppError> {
        let store = &self.store;
        self.locks
            .run_locked(&LockKey::queue(show_id, user_id), || async {
                let marker = user_marker_key(user_id);
                let marked = store
                    .set_if_absent(&marker, &show_id.to_string(), self.marker_ttl())
                    .await?;
                if !marked {
                    return Err(AppError::UserAlreadyInQueue);
                }

                let size = store.list_len(&queue_key(show_id)).await?;
                if size >= self.max_size {
                    store.delete(&marker).await?;
                    return Err(AppError::QueueFull);
                }

                let entry = QueueEntry {
                    user_id,
                    show_id,
                    joined_at: now,
                    session_id: Uuid::new_v4().to_string(),
                };
                let raw = serde_json::to_string(&entry)
                    .map_err(|e| AppError::InternalServerError(e.to_string()))?;
                let queue_size = store.push_back(&queue_key(show_id), &raw).await?;
                let position = self
                    .find_position(show_id, user_id)
                    .await?
                    .unwrap_or(queue_size);

                tracing::info!(show_id, user_id, position, queue_size, "User joined queue");
                Ok(JoinReceipt {
                    position,
                    session_id: entry.session_id,
                    estimated_wait_time: position * SECONDS_PER_POSITION,
                    queue_size,
                })
            })
            .await
    }

    pub async fn position(&self, show_id: i64, user_id: i64) -> Result<QueuePosition, AppError> {
        let position = self
            .find_position(show_id, user_id)
            .await?
            .ok_or(AppError::NotInQueue)?;
        Ok(QueuePosition {
            show_id,
            user_id,
            position,
            estimated_wait_time: position * SECONDS_PER_POSITION,
        })
    }

    /// Admits the head of the queue.
    pub async fn process_next(&self, show_id: i64, now: DateTime<Utc>) -> Result<Admission, AppError> {
        let raw = self
            .store
            .pop_front(&queue_key(show_id))
            .await?
            .ok_or(AppError::QueueEmpty)?;
        let entry: QueueEntry = serde_json::from_str(&raw)
            .map_err(|e| CoordinationError::Malformed(format!("queue entry: {e}")))?;

        self.store.delete(&user_marker_key(entry.user_id)).await?;

        let access_token = Uuid::new_v4().to_string();
        let ttl = ChronoDuration::minutes(ACCESS_TOKEN_MINUTES);
        self.store
            .set_with_ttl(
                &access_key(show_id, entry.user_id),
                &access_token,
                ttl.to_std().unwrap_or(Duration::from_secs(15 * 60)),
            )
            .await?;

        tracing::info!(show_id, user_id = entry.user_id, "User admitted from queue");
        Ok(Admission {
            user_id: entry.user_id,
            show_id,
            access_token,
            expires_at: now + ttl,
        })
    }

    pub async fn verify_access(&self, show_id: i64, user_id: i64, token: &str) -> Result<bool, AppError> {
        let stored = self.store.get(&access_key(show_id, user_id)).await?;
        Ok(stored.as_deref() == Some(token))
    }

    /// Gate for holds and orders. A presented token must be valid; without one the
    /// request passes unless the show has its queue enabled.
    pub async fn require_access(
        &self,
        show_id: i64,
        user_id: i64,
        token: Option<&str>,
    ) -> Result<(), AppError> {
        match token {
            Some(token) => {
                if self.verify_access(show_id, user_id, token).await? {
                    Ok(())
                } else {
                    tracing::warn!(show_id, user_id, "Invalid queue access token presented");
                    Err(AppError::QueueAccessDenied)
                }
            }
            None if self.is_required(show_id).await => Err(AppError::QueueAccessRequired),
            None => Ok(()),
        }
    }

    /// Unknown when the store is down; treated as not required.
    pub async fn is_required(&self, show_id: i64) -> bool {
        match self.store.get(&required_key(show_id)).await {
            Ok(value) => value.as_deref() == Some("true"),
            Err(e) => {
                tracing::warn!(show_id, error = %e, "Queue requirement lookup failed, allowing access");
                false
            }
        }
    }

    pub async fn set_required(&self, show_id: i64, required: bool) -> Result<(), AppError> {
        if required {
            self.store.set(&required_key(show_id), "true").await?;
        } else {
            self.store.delete(&required_key(show_id)).await?;
        }
        tracing::info!(show_id, required, "Queue requirement updated");
        Ok(())
    }

    /// Returns whether the user had an entry in this show's queue.
    pub async fn leave(&self, show_id: i64, user_id: i64) -> Result<bool, AppError> {
        let entries = self.entries(show_id).await?;
        let mut removed = false;
        if let Some((raw, _)) = entries.iter().find(|(_, entry)| entry.user_id == user_id) {
            removed = self.store.list_remove(&queue_key(show_id), raw).await? > 0;
        }
        self.store.delete(&user_marker_key(user_id)).await?;
        Ok(removed)
    }

    pub async fn status(&self, show_id: i64) -> Result<QueueStatus, AppError> {
        let queue_size = self.store.list_len(&queue_key(show_id)).await?;
        Ok(QueueStatus {
            show_id,
            queue_size,
            max_size: self.max_size,
            is_open: queue_size < self.max_size,
            queue_required: self.is_required(show_id).await,
        })
    }

    /// Drops entries that waited longer than the queue timeout. Returns how many.
    pub async fn cleanup_expired(&self, now: DateTime<Utc>) -> Result<usize, AppError> {
        let mut removed = 0;
        for key in self.store.keys_with_prefix(QUEUE_KEY_PREFIX).await? {
            for raw in self.store.list_all(&key).await? {
                let Ok(entry) = serde_json::from_str::<QueueEntry>(&raw) else {
                    self.store.list_remove(&key, &raw).await?;
                    continue;
                };
                if now - entry.joined_at > self.timeout {
                    self.store.list_remove(&key, &raw).await?;
                    self.store.delete(&user_marker_key(entry.user_id)).await?;
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryCoordinationStore;

    fn queue(max_size: u64) -> (Arc<MemoryCoordinationStore>, VirtualQueue) {
        let store = Arc::new(MemoryCoordinationStore::new());
        let locks = LockManager::new(store.clone()).with_retry(2, Duration::from_millis(1));
        (store.clone(), VirtualQueue::new(store, locks, max_size, 15))
    }

    #[tokio::test]
    async fn positions_follow_join_order() {
        let (_, queue) = queue(10);
        let now = Utc::now();
        let first = queue.join(1, 100, now).await.unwrap();
        let second = queue.join(1, 200, now).await.unwrap();
        assert_eq!(first.position, 1);
        assert_eq!(second.position, 2);
        assert_eq!(second.estimated_wait_time, 60);
        assert_eq!(queue.position(1, 200).await.unwrap().position, 2);
        assert!(matches!(queue.position(1, 300).await, Err(AppError::NotInQueue)));
    }

    #[tokio::test]
    async fn user_waits_in_one_queue_at_a_time() {
        let (_, queue) = queue(10);
        let now = Utc::now();
        queue.join(1, 100, now).await.unwrap();
        assert!(matches!(queue.join(2, 100, now).await, Err(AppError::UserAlreadyInQueue)));
    }

    #[tokio::test]
    async fn full_queue_rejects_without_marking_user() {
        let (_, queue) = queue(1);
        let now = Utc::now();
        queue.join(1, 100, now).await.unwrap();
        assert!(matches!(queue.join(1, 200, now).await, Err(AppError::QueueFull)));
        // the rejected user can still join another show's queue
        assert!(queue.join(2, 200, now).await.is_ok());
    }

    #[tokio::test]
    async fn admission_mints_a_token_for_the_head() {
        let (_, queue) = queue(10);
        let now = Utc::now();
        queue.join(1, 100, now).await.unwrap();
        queue.join(1, 200, now).await.unwrap();

        let admitted = queue.process_next(1, now).await.unwrap();
        assert_eq!(admitted.user_id, 100);
        assert!(queue.verify_access(1, 100, &admitted.access_token).await.unwrap());
        assert!(!queue.verify_access(1, 200, &admitted.access_token).await.unwrap());
        assert_eq!(queue.position(1, 200).await.unwrap().position, 1);

        // admitted user may queue again
        assert!(queue.join(1, 100, now).await.is_ok());

        queue.process_next(1, now).await.unwrap();
        queue.process_next(1, now).await.unwrap();
        assert!(matches!(queue.process_next(1, now).await, Err(AppError::QueueEmpty)));
    }

    #[tokio::test]
    async fn required_queue_gates_access() {
        let (_, queue) = queue(10);
        let now = Utc::now();
        assert!(queue.require_access(1, 100, None).await.is_ok());

        queue.set_required(1, true).await.unwrap();
        assert!(matches!(
            queue.require_access(1, 100, None).await,
            Err(AppError::QueueAccessRequired)
        ));
        assert!(matches!(
            queue.require_access(1, 100, Some("forged")).await,
            Err(AppError::QueueAccessDenied)
        ));

        queue.join(1, 100, now).await.unwrap();
        let admitted = queue.process_next(1, now).await.unwrap();
        assert!(queue
            .require_access(1, 100, Some(&admitted.access_token))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn leave_and_cleanup_remove_entries() {
        let (_, queue) = queue(10);
        let now = Utc::now();
        queue.join(1, 100, now - ChronoDuration::minutes(20)).await.unwrap();
        queue.join(1, 200, now).await.unwrap();
        queue.join(1, 300, now).await.unwrap();

        assert!(queue.leave(1, 300).await.unwrap());
        assert!(!queue.leave(1, 300).await.unwrap());

        assert_eq!(queue.cleanup_expired(now).await.unwrap(), 1);
        assert_eq!(queue.status(1).await.unwrap().queue_size, 1);
        assert_eq!(queue.position(1, 200).await.unwrap().position, 1);
    }

    #[tokio::test]
    async fn queue_answers_unavailable_when_store_is_down() {
        let (store, queue) = queue(10);
        store.set_available(false);
        let err = queue.join(1, 100, Utc::now()).await.unwrap_err();
        assert!(matches!(err, AppError::ServiceUnavailable(_)));
    }
}
