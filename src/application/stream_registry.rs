//! Maps chat ids to in-flight stream ids for reconnection.
//!
//! Entries are short-lived (`stream:<chat_id>` with a TTL of minutes) and
//! last-write-wins: starting a new generation for a chat replaces any
//! earlier registration. Absence after expiry means "no resumable stream",
//! never an error.

use std::sync::Arc;
use std::time::Duration;

use crate::domain::{ChatId, StreamId};
use crate::ports::{KeyValueStore, KvError};

const KEY_PREFIX: &str = "stream";

/// Registry of the authoritative stream id per chat.
#[derive(Clone)]
pub struct StreamRegistry {
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

impl StreamRegistry {
    /// Creates a registry with the given registration lifetime.
    pub fn new(store: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    fn key(chat_id: &ChatId) -> String {
        format!("{}:{}", KEY_PREFIX, chat_id)
    }

    /// Registers `stream_id` as the active stream for `chat_id`.
    ///
    /// Called exactly once per generation start, before output flows, so a
    /// racing resume request observes the entry as soon as possible.
    pub async fn register(&self, chat_id: &ChatId, stream_id: &StreamId) -> Result<(), KvError> {
        self.store
            .set(&Self::key(chat_id), &stream_id.to_string(), Some(self.ttl))
            .await
    }

    /// Looks up the active stream for `chat_id`, if any.
    ///
    /// Unparseable or expired entries degrade to `None`.
    pub async fn lookup(&self, chat_id: &ChatId) -> Result<Option<StreamId>, KvError> {
        let value = self.store.get(&Self::key(chat_id)).await?;
        Ok(value.and_then(|v| v.parse().ok()))
    }

    /// Drops the registration for `chat_id`, e.g. when the chat is deleted.
    pub async fn clear(&self, chat_id: &ChatId) -> Result<(), KvError> {
        self.store.delete(&Self::key(chat_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryKeyValueStore;

    fn registry(ttl: Duration) -> StreamRegistry {
        StreamRegistry::new(Arc::new(InMemoryKeyValueStore::new()), ttl)
    }

    #[tokio::test]
    async fn lookup_returns_registered_stream() {
        let registry = registry(Duration::from_secs(300));
        let chat = ChatId::new();
        let stream = StreamId::new();

        registry.register(&chat, &stream).await.unwrap();
        assert_eq!(registry.lookup(&chat).await.unwrap(), Some(stream));
    }

    #[tokio::test]
    async fn lookup_of_unknown_chat_is_none() {
        let registry = registry(Duration::from_secs(300));
        assert_eq!(registry.lookup(&ChatId::new()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn reregistration_wins() {
        let registry = registry(Duration::from_secs(300));
        let chat = ChatId::new();
        let first = StreamId::new();
        let second = StreamId::new();

        registry.register(&chat, &first).await.unwrap();
        registry.register(&chat, &second).await.unwrap();
        assert_eq!(registry.lookup(&chat).await.unwrap(), Some(second));
    }

    #[tokio::test(start_paused = true)]
    async fn registration_expires_after_ttl() {
        let registry = registry(Duration::from_secs(300));
        let chat = ChatId::new();

        registry.register(&chat, &StreamId::new()).await.unwrap();
        tokio::time::advance(Duration::from_secs(301)).await;
        assert_eq!(registry.lookup(&chat).await.unwrap(), None);
    }

    #[tokio::test]
    async fn clear_removes_registration() {
        let registry = registry(Duration::from_secs(300));
        let chat = ChatId::new();

        registry.register(&chat, &StreamId::new()).await.unwrap();
        registry.clear(&chat).await.unwrap();
        assert_eq!(registry.lookup(&chat).await.unwrap(), None);
    }
}
