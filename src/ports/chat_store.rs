//! Persistence port for chat metadata and message history.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{Chat, ChatId, Message, MessageId, Timestamp, UserId, Visibility};

/// Error from the persistence backend.
#[derive(Debug, Clone, Error)]
pub enum ChatStoreError {
    #[error("chat {0} not found")]
    NotFound(ChatId),

    #[error("database error: {0}")]
    Database(String),
}

/// Persistence interface consumed by the chat turn pipeline.
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Inserts a new chat. An id that already exists is left untouched, so
    /// racing creators of the same chat both succeed.
    async fn save_chat(&self, chat: &Chat) -> Result<(), ChatStoreError>;

    /// Fetches a chat by id.
    async fn chat_by_id(&self, id: &ChatId) -> Result<Option<Chat>, ChatStoreError>;

    /// Lists a user's chats ordered by most-recently-updated first,
    /// optionally filtered by a case-insensitive title substring.
    async fn chats_for_user(
        &self,
        user_id: &UserId,
        limit: u32,
        skip: u32,
        search: Option<&str>,
    ) -> Result<Vec<Chat>, ChatStoreError>;

    /// Deletes a chat and all its messages.
    async fn delete_chat(&self, id: &ChatId) -> Result<(), ChatStoreError>;

    /// Deletes every chat owned by `user_id`, returning how many went away.
    async fn delete_all_chats_for_user(&self, user_id: &UserId) -> Result<u64, ChatStoreError>;

    /// Replaces the chat title.
    async fn update_title(&self, id: &ChatId, title: &str) -> Result<(), ChatStoreError>;

    /// Changes the chat visibility.
    async fn update_visibility(
        &self,
        id: &ChatId,
        visibility: Visibility,
    ) -> Result<(), ChatStoreError>;

    /// Appends messages in one batch and bumps the chat's `updated_at`.
    /// A message id that is already stored is skipped, not duplicated.
    async fn save_messages(&self, messages: &[Message]) -> Result<(), ChatStoreError>;

    /// All messages of a chat ordered by `created_at` ascending.
    async fn messages_for_chat(&self, chat_id: &ChatId) -> Result<Vec<Message>, ChatStoreError>;

    /// Fetches one message by id.
    async fn message_by_id(&self, id: &MessageId) -> Result<Option<Message>, ChatStoreError>;

    /// Deletes every message in `chat_id` with `created_at >= from`.
    ///
    /// This is the regenerate primitive: the pivot message and everything
    /// after it disappear before the edited message is re-appended.
    async fn delete_messages_from(
        &self,
        chat_id: &ChatId,
        from: Timestamp,
    ) -> Result<(), ChatStoreError>;
}
