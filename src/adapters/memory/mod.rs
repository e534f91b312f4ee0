//! In-memory adapters for tests and local development.
//!
//! Behaviourally equivalent to the production backends at the granularity
//! the application observes: TTLs honour tokio's (pausable) clock, and the
//! key-value counter ops are atomic under one lock.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, RwLock};
use tokio::time::Instant;

use crate::domain::{Chat, ChatId, Message, MessageId, Timestamp, UserId, Visibility};
use crate::ports::{
    ChatStore, ChatStoreError, GenerationRequest, KeyValueStore, KvError, ModelChunk, ModelError,
    ModelProvider, TokenStream,
};

// ---------------------------------------------------------------------------
// Key-value store

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

/// TTL-capable key-value store backed by a `HashMap`.
#[derive(Default)]
pub struct InMemoryKeyValueStore {
    entries: Mutex<HashMap<String, Entry>>,
    failing: AtomicBool,
}

impl InMemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent operation fail, simulating an outage.
    pub fn fail_all(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), KvError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(KvError::Unavailable("simulated outage".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        self.check_available()?;
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), KvError> {
        self.check_available()?;
        let entry = Entry {
            value: value.to_string(),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        self.entries.lock().unwrap().insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        self.check_available()?;
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }

    async fn increment(&self, key: &str, ttl: Duration) -> Result<i64, KvError> {
        self.check_available()?;
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap();
        let current = match entries.get(key) {
            Some(entry) if !entry.is_expired(now) => entry.value.parse::<i64>().unwrap_or(0),
            _ => 0,
        };
        let next = current + 1;
        entries.insert(
            key.to_string(),
            Entry {
                value: next.to_string(),
                expires_at: Some(now + ttl),
            },
        );
        Ok(next)
    }

    async fn decrement(&self, key: &str) -> Result<i64, KvError> {
        self.check_available()?;
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap();
        let (current, expires_at) = match entries.get(key) {
            Some(entry) if !entry.is_expired(now) => {
                (entry.value.parse::<i64>().unwrap_or(0), entry.expires_at)
            }
            _ => (0, None),
        };
        let next = current - 1;
        entries.insert(
            key.to_string(),
            Entry {
                value: next.to_string(),
                expires_at,
            },
        );
        Ok(next)
    }
}

// ---------------------------------------------------------------------------
// Chat store

#[derive(Default)]
struct ChatState {
    chats: HashMap<ChatId, Chat>,
    messages: Vec<Message>,
}

/// Chat persistence backed by plain collections.
#[derive(Default)]
pub struct InMemoryChatStore {
    state: RwLock<ChatState>,
}

impl InMemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatStore for InMemoryChatStore {
    async fn save_chat(&self, chat: &Chat) -> Result<(), ChatStoreError> {
        let mut state = self.state.write().await;
        // First writer wins, like the ON CONFLICT DO NOTHING insert.
        state.chats.entry(chat.id).or_insert_with(|| chat.clone());
        Ok(())
    }

    async fn chat_by_id(&self, id: &ChatId) -> Result<Option<Chat>, ChatStoreError> {
        let state = self.state.read().await;
        Ok(state.chats.get(id).cloned())
    }

    async fn chats_for_user(
        &self,
        user_id: &UserId,
        limit: u32,
        skip: u32,
        search: Option<&str>,
    ) -> Result<Vec<Chat>, ChatStoreError> {
        let state = self.state.read().await;
        let needle = search.map(str::to_lowercase);
        let mut chats: Vec<Chat> = state
            .chats
            .values()
            .filter(|c| c.user_id == *user_id)
            .filter(|c| {
                needle
                    .as_ref()
                    .map_or(true, |n| c.title.to_lowercase().contains(n))
            })
            .cloned()
            .collect();
        chats.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(chats
            .into_iter()
            .skip(skip as usize)
            .take(limit as usize)
            .collect())
    }

    async fn delete_chat(&self, id: &ChatId) -> Result<(), ChatStoreError> {
        let mut state = self.state.write().await;
        if state.chats.remove(id).is_none() {
            return Err(ChatStoreError::NotFound(*id));
        }
        state.messages.retain(|m| m.chat_id != *id);
        Ok(())
    }

    async fn delete_all_chats_for_user(&self, user_id: &UserId) -> Result<u64, ChatStoreError> {
        let mut state = self.state.write().await;
        let doomed: Vec<ChatId> = state
            .chats
            .values()
            .filter(|c| c.user_id == *user_id)
            .map(|c| c.id)
            .collect();
        for id in &doomed {
            state.chats.remove(id);
        }
        state.messages.retain(|m| !doomed.contains(&m.chat_id));
        Ok(doomed.len() as u64)
    }

    async fn update_title(&self, id: &ChatId, title: &str) -> Result<(), ChatStoreError> {
        let mut state = self.state.write().await;
        let chat = state
            .chats
            .get_mut(id)
            .ok_or(ChatStoreError::NotFound(*id))?;
        chat.title = title.to_string();
        chat.updated_at = Timestamp::now();
        Ok(())
    }

    async fn update_visibility(
        &self,
        id: &ChatId,
        visibility: Visibility,
    ) -> Result<(), ChatStoreError> {
        let mut state = self.state.write().await;
        let chat = state
            .chats
            .get_mut(id)
            .ok_or(ChatStoreError::NotFound(*id))?;
        chat.visibility = visibility;
        chat.updated_at = Timestamp::now();
        Ok(())
    }

    async fn save_messages(&self, messages: &[Message]) -> Result<(), ChatStoreError> {
        let mut state = self.state.write().await;
        for message in messages {
            // Resubmitted ids are skipped, like the production insert.
            if state.messages.iter().any(|m| m.id == message.id) {
                continue;
            }
            if let Some(chat) = state.chats.get_mut(&message.chat_id) {
                chat.updated_at = Timestamp::now();
            }
            state.messages.push(message.clone());
        }
        Ok(())
    }

    async fn messages_for_chat(&self, chat_id: &ChatId) -> Result<Vec<Message>, ChatStoreError> {
        let state = self.state.read().await;
        let mut messages: Vec<Message> = state
            .messages
            .iter()
            .filter(|m| m.chat_id == *chat_id)
            .cloned()
            .collect();
        // Stable sort keeps insertion order for equal timestamps.
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(messages)
    }

    async fn message_by_id(&self, id: &MessageId) -> Result<Option<Message>, ChatStoreError> {
        let state = self.state.read().await;
        Ok(state.messages.iter().find(|m| m.id == *id).cloned())
    }

    async fn delete_messages_from(
        &self,
        chat_id: &ChatId,
        from: Timestamp,
    ) -> Result<(), ChatStoreError> {
        let mut state = self.state.write().await;
        state
            .messages
            .retain(|m| m.chat_id != *chat_id || m.created_at.is_before(&from));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Model provider

struct ScriptedStream {
    chunks: Vec<Result<ModelChunk, ModelError>>,
    delay: Option<Duration>,
}

/// Model provider that replays scripted responses.
#[derive(Default)]
pub struct ScriptedModelProvider {
    streams: Mutex<VecDeque<ScriptedStream>>,
    completions: Mutex<VecDeque<Result<String, ModelError>>>,
}

impl ScriptedModelProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the chunks the next `stream_generate` call will emit.
    pub fn script_stream(&self, chunks: Vec<Result<ModelChunk, ModelError>>) {
        self.streams
            .lock()
            .unwrap()
            .push_back(ScriptedStream { chunks, delay: None });
    }

    /// As [`script_stream`](Self::script_stream), pausing between chunks.
    pub fn script_stream_with_delay(
        &self,
        chunks: Vec<Result<ModelChunk, ModelError>>,
        delay: Duration,
    ) {
        self.streams.lock().unwrap().push_back(ScriptedStream {
            chunks,
            delay: Some(delay),
        });
    }

    /// Queues the result of the next `complete` call.
    pub fn script_completion(&self, result: Result<String, ModelError>) {
        self.completions.lock().unwrap().push_back(result);
    }
}

#[async_trait]
impl ModelProvider for ScriptedModelProvider {
    async fn stream_generate(
        &self,
        _request: GenerationRequest,
    ) -> Result<TokenStream, ModelError> {
        let script = self
            .streams
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ModelError::Unavailable("no scripted stream".to_string()))?;

        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            for chunk in script.chunks {
                if let Some(delay) = script.delay {
                    tokio::time::sleep(delay).await;
                }
                if tx.send(chunk).await.is_err() {
                    break;
                }
            }
        });
        Ok(TokenStream { receiver: rx })
    }

    async fn complete(&self, _request: GenerationRequest) -> Result<String, ModelError> {
        self.completions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ModelError::Unavailable("no scripted completion".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn set_with_ttl_expires() {
        let store = InMemoryKeyValueStore::new();
        store
            .set("k", "v", Some(Duration::from_secs(10)))
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn increment_reapplies_ttl_from_a_fixed_deadline_caller() {
        let store = InMemoryKeyValueStore::new();
        assert_eq!(store.increment("c", Duration::from_secs(60)).await.unwrap(), 1);

        tokio::time::advance(Duration::from_secs(30)).await;
        // Caller recomputes time-to-deadline, so the key still dies on time.
        assert_eq!(store.increment("c", Duration::from_secs(30)).await.unwrap(), 2);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(store.get("c").await.unwrap(), None);
        assert_eq!(store.increment("c", Duration::from_secs(60)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn decrement_undoes_increment() {
        let store = InMemoryKeyValueStore::new();
        store.increment("c", Duration::from_secs(60)).await.unwrap();
        store.increment("c", Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.decrement("c").await.unwrap(), 1);
        assert_eq!(store.get("c").await.unwrap().as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn chat_listing_is_recency_ordered_and_searchable() {
        let store = InMemoryChatStore::new();
        let user = UserId::new("u1").unwrap();

        let mut first = Chat::new(ChatId::new(), user.clone());
        first.title = "Rust questions".to_string();
        let mut second = Chat::new(ChatId::new(), user.clone());
        second.title = "Dinner plans".to_string();
        store.save_chat(&first).await.unwrap();
        store.save_chat(&second).await.unwrap();

        // Touch the older chat so it becomes most recent.
        store.update_title(&first.id, "Rust questions").await.unwrap();

        let all = store.chats_for_user(&user, 10, 0, None).await.unwrap();
        assert_eq!(all[0].id, first.id);

        let hits = store
            .chats_for_user(&user, 10, 0, Some("rust"))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, first.id);
    }

    #[tokio::test]
    async fn duplicate_chat_insert_keeps_the_first_writer() {
        let store = InMemoryChatStore::new();
        let user = UserId::new("u1").unwrap();
        let chat_id = ChatId::new();

        let first = Chat::new(chat_id, user.clone());
        store.save_chat(&first).await.unwrap();

        let mut loser = Chat::new(chat_id, user);
        loser.title = "should not land".to_string();
        store.save_chat(&loser).await.unwrap();

        let stored = store.chat_by_id(&chat_id).await.unwrap().unwrap();
        assert_eq!(stored.title, first.title);
        assert_eq!(stored.created_at, first.created_at);
    }

    #[tokio::test]
    async fn resubmitted_message_id_is_stored_once() {
        let store = InMemoryChatStore::new();
        let chat = Chat::new(ChatId::new(), UserId::new("u1").unwrap());
        store.save_chat(&chat).await.unwrap();

        let message = Message::user(
            MessageId::from_string("m1"),
            chat.id,
            vec![crate::domain::MessagePart::text("hi")],
        );
        store.save_messages(&[message.clone()]).await.unwrap();
        store.save_messages(&[message]).await.unwrap();

        assert_eq!(store.messages_for_chat(&chat.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn deleting_a_chat_removes_its_messages() {
        let store = InMemoryChatStore::new();
        let user = UserId::new("u1").unwrap();
        let chat = Chat::new(ChatId::new(), user);
        store.save_chat(&chat).await.unwrap();
        store
            .save_messages(&[Message::user(
                MessageId::generate(),
                chat.id,
                vec![crate::domain::MessagePart::text("hi")],
            )])
            .await
            .unwrap();

        store.delete_chat(&chat.id).await.unwrap();
        assert!(store.messages_for_chat(&chat.id).await.unwrap().is_empty());
        assert!(matches!(
            store.delete_chat(&chat.id).await,
            Err(ChatStoreError::NotFound(_))
        ));
    }
}
