//! Redis store backend.
//!
//! [`RedisStore`] maps each [`IdempotencyStore`] primitive onto a single Redis
//! command or Lua script, so every primitive is one atomic round trip:
//!
//! | Primitive | Redis |
//! |-----------|-------|
//! | `exists` | `EXISTS` |
//! | `test_and_insert` | Lua: `SADD`, reporting prior membership |
//! | `enqueue` | `RPUSH` |
//! | `admit` | Lua: `SADD`, then `RPUSH` only for a new member |
//! | `set_flag` | `SET key 1 NX` |
//! | `dequeue` | `LMOVE queue processing LEFT RIGHT`, polled until the timeout |
//! | `ack` | `LREM processing 1 payload` |
//! | `requeue` | Lua: `LMOVE processing queue RIGHT LEFT` until empty |

use std::time::Duration;

use ::redis::aio::MultiplexedConnection;
use ::redis::{AsyncCommands, Script};
use async_trait::async_trait;
use tokio::time::Instant;
use tracing::debug;

use crate::{IdempotencyStore, Result, StoreError};

/// Insert a set member, reporting whether it was already there.
///
/// KEYS[1] = set key. ARGV[1] = member.
/// Returns: 1 if the member already existed, 0 if it was inserted.
const LUA_TEST_AND_INSERT: &str = r#"
if redis.call('SADD', KEYS[1], ARGV[1]) == 1 then
    return 0
end
return 1
"#;

/// Record a set member and queue its payload only if the member is new.
///
/// KEYS[1] = set key, KEYS[2] = queue list. ARGV[1] = member, ARGV[2] = payload.
/// Returns: 1 if the member already existed, 0 if it was inserted and queued.
const LUA_ADMIT: &str = r#"
if redis.call('SADD', KEYS[1], ARGV[1]) == 0 then
    return 1
end
redis.call('RPUSH', KEYS[2], ARGV[2])
return 0
"#;

/// Move every processing item back to the head of the queue, oldest first.
///
/// KEYS[1] = processing list, KEYS[2] = queue list.
/// Returns: number of items moved.
const LUA_REQUEUE: &str = r#"
local moved = 0
while redis.call('LMOVE', KEYS[1], KEYS[2], 'RIGHT', 'LEFT') do
    moved = moved + 1
end
return moved
"#;

/// Interval between `LMOVE` attempts while waiting on an empty queue.
const DEQUEUE_POLL: Duration = Duration::from_millis(50);

/// Redis-backed [`IdempotencyStore`].
///
/// Holds a [`MultiplexedConnection`]; clones share one TCP connection, so each
/// call clones it rather than locking.
#[derive(Clone)]
pub struct RedisStore {
    conn: MultiplexedConnection,
}

impl RedisStore {
    /// Connect to Redis at `url` (`redis://[:<password>@]<host>:<port>[/<db>]`).
    pub async fn connect(url: &str) -> Result<Self> {
        let client = ::redis::Client::open(url)
            .map_err(|e| StoreError::Backend(format!("invalid Redis URL: {e}")))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StoreError::Unavailable(format!("failed to connect to Redis: {e}")))?;
        Ok(Self { conn })
    }

    pub fn with_connection(conn: MultiplexedConnection) -> Self {
        Self { conn }
    }
}

fn map_redis_error(err: ::redis::RedisError, key: &str) -> StoreError {
    if err.is_io_error() || err.is_timeout() {
        StoreError::Unavailable(format!("Redis error for key {key}: {err}"))
    } else {
        StoreError::Backend(format!("Redis error for key {key}: {err}"))
    }
}

#[async_trait]
impl IdempotencyStore for RedisStore {
    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        conn.exists(key).await.map_err(|e| map_redis_error(e, key))
    }

    async fn test_and_insert(&self, set_key: &str, member: &str) -> Result<bool> {
        let script = Script::new(LUA_TEST_AND_INSERT);
        let existed: i64 = script
            .key(set_key)
            .arg(member)
            .invoke_async(&mut self.conn.clone())
            .await
            .map_err(|e| map_redis_error(e, set_key))?;
        Ok(existed == 1)
    }

    async fn enqueue(&self, queue_key: &str, payload: &[u8]) -> Result<()> {
        let mut conn = self.conn.clone();
        let _len: i64 = conn
            .rpush(queue_key, payload)
            .await
            .map_err(|e| map_redis_error(e, queue_key))?;
        Ok(())
    }

    async fn admit(
        &self,
        set_key: &str,
        member: &str,
        queue_key: &str,
        payload: &[u8],
    ) -> Result<bool> {
        let script = Script::new(LUA_ADMIT);
        let existed: i64 = script
            .key(set_key)
            .key(queue_key)
            .arg(member)
            .arg(payload)
            .invoke_async(&mut self.conn.clone())
            .await
            .map_err(|e| map_redis_error(e, set_key))?;
        Ok(existed == 1)
    }

    async fn set_flag(&self, key: &str) -> Result<bool> {
        let reply: Option<String> = ::redis::cmd("SET")
            .arg(key)
            .arg(1)
            .arg("NX")
            .query_async(&mut self.conn.clone())
            .await
            .map_err(|e| map_redis_error(e, key))?;
        Ok(reply.is_some())
    }

    async fn dequeue(
        &self,
        queue_key: &str,
        processing_key: &str,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>> {
        let deadline = Instant::now() + timeout;
        loop {
            let item: Option<Vec<u8>> = ::redis::cmd("LMOVE")
                .arg(queue_key)
                .arg(processing_key)
                .arg("LEFT")
                .arg("RIGHT")
                .query_async(&mut self.conn.clone())
                .await
                .map_err(|e| map_redis_error(e, queue_key))?;
            if item.is_some() {
                return Ok(item);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            tokio::time::sleep(remaining.min(DEQUEUE_POLL)).await;
        }
    }

    async fn ack(&self, processing_key: &str, payload: &[u8]) -> Result<()> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn
            .lrem(processing_key, 1, payload)
            .await
            .map_err(|e| map_redis_error(e, processing_key))?;
        if removed == 0 {
            debug!(key = processing_key, "ack found no matching processing item");
        }
        Ok(())
    }

    async fn requeue(&self, processing_key: &str, queue_key: &str) -> Result<usize> {
        let script = Script::new(LUA_REQUEUE);
        let moved: i64 = script
            .key(processing_key)
            .key(queue_key)
            .invoke_async(&mut self.conn.clone())
            .await
            .map_err(|e| map_redis_error(e, processing_key))?;
        Ok(moved.max(0) as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Connect to the Redis named by `TALLY_TEST_REDIS_URL` and isolate keys per test.
    async fn test_store() -> (RedisStore, String) {
        let url = std::env::var("TALLY_TEST_REDIS_URL")
            .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let store = RedisStore::connect(&url).await.unwrap();
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        (store, format!("tally-test-{nanos}"))
    }

    #[tokio::test]
    #[ignore = "requires a running Redis server"]
    async fn test_and_insert_against_redis() {
        let (store, prefix) = test_store().await;
        let key = format!("{prefix}:operators:1");
        assert!(!store.test_and_insert(&key, "0xabc").await.unwrap());
        assert!(store.test_and_insert(&key, "0xabc").await.unwrap());
        assert!(store.exists(&key).await.unwrap());
    }

    #[tokio::test]
    #[ignore = "requires a running Redis server"]
    async fn admit_against_redis() {
        let (store, prefix) = test_store().await;
        let set = format!("{prefix}:operators:1");
        let queue = format!("{prefix}:queue");
        let processing = format!("{prefix}:queue:processing");
        assert!(!store.admit(&set, "0xabc", &queue, b"first").await.unwrap());
        assert!(store.admit(&set, "0xabc", &queue, b"again").await.unwrap());

        let timeout = Duration::from_millis(100);
        let item = store.dequeue(&queue, &processing, timeout).await.unwrap();
        assert_eq!(item.as_deref(), Some(&b"first"[..]));
        assert!(store.dequeue(&queue, &processing, timeout).await.unwrap().is_none());
    }

    #[tokio::test]
    #[ignore = "requires a running Redis server"]
    async fn set_flag_against_redis() {
        let (store, prefix) = test_store().await;
        let key = format!("{prefix}:finished:1");
        assert!(store.set_flag(&key).await.unwrap());
        assert!(!store.set_flag(&key).await.unwrap());
    }

    #[tokio::test]
    #[ignore = "requires a running Redis server"]
    async fn queue_roundtrip_against_redis() {
        let (store, prefix) = test_store().await;
        let queue = format!("{prefix}:queue");
        let processing = format!("{prefix}:queue:processing");
        let timeout = Duration::from_millis(100);

        store.enqueue(&queue, b"a").await.unwrap();
        store.enqueue(&queue, b"b").await.unwrap();
        let first = store.dequeue(&queue, &processing, timeout).await.unwrap();
        assert_eq!(first.as_deref(), Some(&b"a"[..]));

        assert_eq!(store.requeue(&processing, &queue).await.unwrap(), 1);
        let again = store.dequeue(&queue, &processing, timeout).await.unwrap();
        assert_eq!(again.as_deref(), Some(&b"a"[..]));
        store.ack(&processing, b"a").await.unwrap();

        let second = store.dequeue(&queue, &processing, timeout).await.unwrap();
        assert_eq!(second.as_deref(), Some(&b"b"[..]));
        assert!(store.dequeue(&queue, &processing, timeout).await.unwrap().is_none());
    }
}
