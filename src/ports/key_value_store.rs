//! TTL-capable key-value store port.
//!
//! Leaf dependency of the rate limiter and the stream registry. The only
//! operation with read-modify-write contention in the whole system is
//! [`KeyValueStore::increment`], which implementations must make atomic.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Error from the key-value backend.
#[derive(Debug, Clone, Error)]
pub enum KvError {
    #[error("key-value store unavailable: {0}")]
    Unavailable(String),
}

/// Thin async get/set/delete over a TTL-capable store.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Returns the value for `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;

    /// Sets `key` to `value`, optionally expiring after `ttl`.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), KvError>;

    /// Removes `key`. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), KvError>;

    /// Atomically increments the integer at `key` and returns the new value.
    ///
    /// The expiry is (re)applied on every call so the key always dies at the
    /// same wall-clock deadline regardless of which write created it. An
    /// absent key counts from zero.
    async fn increment(&self, key: &str, ttl: Duration) -> Result<i64, KvError>;

    /// Atomically decrements the integer at `key` and returns the new value.
    ///
    /// Used to hand back an increment that overshot a limit.
    async fn decrement(&self, key: &str) -> Result<i64, KvError>;
}
