//! Redis coordination store.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};

use crate::store::{CoordinationError, CoordinationStore};

/// Deletes the key only while it still holds the caller's value.
const DELETE_IF_EQUALS: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// INCR that starts the window TTL on the first hit only.
const INCR_WITH_TTL: &str = r#"
local count = redis.call("INCR", KEYS[1])
if count == 1 then
    redis.call("PEXPIRE", KEYS[1], ARGV[1])
end
return count
"#;

/// DECR that never creates a counter without a TTL.
const DECR_IF_PRESENT: &str = r#"
if redis.call("EXISTS", KEYS[1]) == 1 then
    return redis.call("DECR", KEYS[1])
else
    return 0
end
"#;

const SCAN_BATCH: usize = 200;

#[derive(Clone)]
pub struct RedisCoordinationStore {
    conn_manager: ConnectionManager,
}

impl RedisCoordinationStore {
    pub async fn new(redis_url: &str) -> Result<Self, CoordinationError> {
        let client = Client::open(redis_url).map_err(|e| {
            CoordinationError::Unavailable(format!("Failed to create Redis client: {e}"))
        })?;

        let conn_manager = ConnectionManager::new(client).await.map_err(|e| {
            CoordinationError::Unavailable(format!(
                "Failed to create Redis connection manager: {e}"
            ))
        })?;

        Ok(Self { conn_manager })
    }
}

fn unavailable(e: redis::RedisError) -> CoordinationError {
    CoordinationError::Unavailable(e.to_string())
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl CoordinationStore for RedisCoordinationStore {
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, CoordinationError> {
        let mut conn = self.conn_manager.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(reply.is_some())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CoordinationError> {
        let mut conn = self.conn_manager.clone();
        let value: Option<String> = conn.get(key).await.map_err(unavailable)?;
        Ok(value)
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), CoordinationError> {
        let mut conn = self.conn_manager.clone();
        let _: () = conn
            .pset_ex(key, value, ttl_millis(ttl))
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), CoordinationError> {
        let mut conn = self.conn_manager.clone();
        let _: () = conn.set(key, value).await.map_err(unavailable)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CoordinationError> {
        let mut conn = self.conn_manager.clone();
        let _: () = conn.del(key).await.map_err(unavailable)?;
        Ok(())
    }

    async fn delete_if_equals(
        &self,
        key: &str,
        expected: &str,
    ) -> Result<bool, CoordinationError> {
        let mut conn = self.conn_manager.clone();
        let deleted: i64 = Script::new(DELETE_IF_EQUALS)
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(deleted == 1)
    }

    async fn push_back(&self, key: &str, value: &str) -> Result<u64, CoordinationError> {
        let mut conn = self.conn_manager.clone();
        let len: u64 = conn.rpush(key, value).await.map_err(unavailable)?;
        Ok(len)
    }

    async fn pop_front(&self, key: &str) -> Result<Option<String>, CoordinationError> {
        let mut conn = self.conn_manager.clone();
        let value: Option<String> = conn.lpop(key, None).await.map_err(unavailable)?;
        Ok(value)
    }

    async fn list_len(&self, key: &str) -> Result<u64, CoordinationError> {
        let mut conn = self.conn_manager.clone();
        let len: u64 = conn.llen(key).await.map_err(unavailable)?;
        Ok(len)
    }

    async fn list_all(&self, key: &str) -> Result<Vec<String>, CoordinationError> {
        let mut conn = self.conn_manager.clone();
        let values: Vec<String> = conn.lrange(key, 0, -1).await.map_err(unavailable)?;
        Ok(values)
    }

    async fn list_remove(&self, key: &str, value: &str) -> Result<u64, CoordinationError> {
        let mut conn = self.conn_manager.clone();
        let removed: u64 = conn.lrem(key, 1, value).await.map_err(unavailable)?;
        Ok(removed)
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, CoordinationError> {
        let mut conn = self.conn_manager.clone();
        let pattern = format!("{prefix}*");
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(unavailable)?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<i64, CoordinationError> {
        let mut conn = self.conn_manager.clone();
        let count: i64 = Script::new(INCR_WITH_TTL)
            .key(key)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(count)
    }

    async fn decr_if_present(&self, key: &str) -> Result<i64, CoordinationError> {
        let mut conn = self.conn_manager.clone();
        let count: i64 = Script::new(DECR_IF_PRESENT)
            .key(key)
            .invoke_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(count)
    }
}
