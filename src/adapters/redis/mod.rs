//! Redis-backed key-value store for production deployments.
//!
//! Counters use INCR + EXPIRE in one MULTI/EXEC pipeline so the increment
//! and the expiry refresh land atomically. Suitable for multi-server
//! deployments sharing one Redis.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;

use crate::ports::{KeyValueStore, KvError};

/// TTL-capable key-value store over a multiplexed Redis connection.
#[derive(Clone)]
pub struct RedisKeyValueStore {
    conn: MultiplexedConnection,
}

impl RedisKeyValueStore {
    /// Creates a store over an established connection.
    pub fn new(conn: MultiplexedConnection) -> Self {
        Self { conn }
    }
}

fn ttl_secs(ttl: Duration) -> i64 {
    (ttl.as_secs().max(1)) as i64
}

#[async_trait]
impl KeyValueStore for RedisKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut conn = self.conn.clone();
        conn.get(key)
            .await
            .map_err(|e: redis::RedisError| KvError::Unavailable(e.to_string()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), KvError> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("EX").arg(ttl_secs(ttl));
        }
        cmd.query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e: redis::RedisError| KvError::Unavailable(e.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key)
            .await
            .map_err(|e: redis::RedisError| KvError::Unavailable(e.to_string()))
    }

    async fn increment(&self, key: &str, ttl: Duration) -> Result<i64, KvError> {
        let mut conn = self.conn.clone();
        // EXPIRE on every increment, not just the first: the caller hands in
        // the time left to a fixed deadline, so refreshing keeps the key
        // dying at that deadline no matter which write created it.
        let (count,): (i64,) = redis::pipe()
            .atomic()
            .cmd("INCR")
            .arg(key)
            .cmd("EXPIRE")
            .arg(key)
            .arg(ttl_secs(ttl))
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e: redis::RedisError| KvError::Unavailable(e.to_string()))?;
        Ok(count)
    }

    async fn decrement(&self, key: &str) -> Result<i64, KvError> {
        let mut conn = self.conn.clone();
        conn.decr(key, 1_i64)
            .await
            .map_err(|e: redis::RedisError| KvError::Unavailable(e.to_string()))
    }
}

impl std::fmt::Debug for RedisKeyValueStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisKeyValueStore").finish_non_exhaustive()
    }
}
