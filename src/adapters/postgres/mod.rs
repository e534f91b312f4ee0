//! PostgreSQL implementation of ChatStore.
//!
//! Chats and messages live in two tables; message parts and attachments are
//! stored as jsonb so the typed part union round-trips without a table per
//! part kind.

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use crate::domain::{
    Attachment, Chat, ChatId, Message, MessageId, MessagePart, Role, Timestamp, UserId, Visibility,
};
use crate::ports::{ChatStore, ChatStoreError};

/// PostgreSQL implementation of ChatStore.
#[derive(Clone)]
pub struct PostgresChatStore {
    pool: PgPool,
}

impl PostgresChatStore {
    /// Creates a new PostgresChatStore.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn chat_from_row(row: &sqlx::postgres::PgRow) -> Result<Chat, ChatStoreError> {
    let id: uuid::Uuid = row
        .try_get("id")
        .map_err(|e| ChatStoreError::Database(format!("Failed to read chat id: {}", e)))?;
    let user_id: String = row
        .try_get("user_id")
        .map_err(|e| ChatStoreError::Database(format!("Failed to read user_id: {}", e)))?;
    let title: String = row
        .try_get("title")
        .map_err(|e| ChatStoreError::Database(format!("Failed to read title: {}", e)))?;
    let visibility: String = row
        .try_get("visibility")
        .map_err(|e| ChatStoreError::Database(format!("Failed to read visibility: {}", e)))?;
    let created_at: chrono::DateTime<chrono::Utc> = row
        .try_get("created_at")
        .map_err(|e| ChatStoreError::Database(format!("Failed to read created_at: {}", e)))?;
    let updated_at: chrono::DateTime<chrono::Utc> = row
        .try_get("updated_at")
        .map_err(|e| ChatStoreError::Database(format!("Failed to read updated_at: {}", e)))?;

    Ok(Chat {
        id: ChatId::from_uuid(id),
        user_id: UserId::new(user_id)
            .ok_or_else(|| ChatStoreError::Database("Empty user_id in chats row".to_string()))?,
        title,
        visibility: Visibility::parse(&visibility).ok_or_else(|| {
            ChatStoreError::Database(format!("Unknown visibility '{}' in chats row", visibility))
        })?,
        created_at: Timestamp::from_datetime(created_at),
        updated_at: Timestamp::from_datetime(updated_at),
    })
}

fn message_from_row(row: &sqlx::postgres::PgRow) -> Result<Message, ChatStoreError> {
    let id: String = row
        .try_get("id")
        .map_err(|e| ChatStoreError::Database(format!("Failed to read message id: {}", e)))?;
    let chat_id: uuid::Uuid = row
        .try_get("chat_id")
        .map_err(|e| ChatStoreError::Database(format!("Failed to read chat_id: {}", e)))?;
    let role: String = row
        .try_get("role")
        .map_err(|e| ChatStoreError::Database(format!("Failed to read role: {}", e)))?;
    let parts: serde_json::Value = row
        .try_get("parts")
        .map_err(|e| ChatStoreError::Database(format!("Failed to read parts: {}", e)))?;
    let attachments: serde_json::Value = row
        .try_get("attachments")
        .map_err(|e| ChatStoreError::Database(format!("Failed to read attachments: {}", e)))?;
    let created_at: chrono::DateTime<chrono::Utc> = row
        .try_get("created_at")
        .map_err(|e| ChatStoreError::Database(format!("Failed to read created_at: {}", e)))?;

    let parts: Vec<MessagePart> = serde_json::from_value(parts)
        .map_err(|e| ChatStoreError::Database(format!("Failed to decode parts: {}", e)))?;
    let attachments: Vec<Attachment> = serde_json::from_value(attachments)
        .map_err(|e| ChatStoreError::Database(format!("Failed to decode attachments: {}", e)))?;

    Ok(Message {
        id: MessageId::from_string(id),
        chat_id: ChatId::from_uuid(chat_id),
        role: Role::parse(&role).ok_or_else(|| {
            ChatStoreError::Database(format!("Unknown role '{}' in messages row", role))
        })?,
        parts,
        attachments,
        created_at: Timestamp::from_datetime(created_at),
    })
}

#[async_trait]
impl ChatStore for PostgresChatStore {
    async fn save_chat(&self, chat: &Chat) -> Result<(), ChatStoreError> {
        // Racing double-submits both try to create the chat; first writer
        // wins and the loser's insert is a no-op, not an error.
        sqlx::query(
            r#"
            INSERT INTO chats (id, user_id, title, visibility, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(chat.id.as_uuid())
        .bind(chat.user_id.as_str())
        .bind(&chat.title)
        .bind(chat.visibility.as_str())
        .bind(chat.created_at.as_datetime())
        .bind(chat.updated_at.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| ChatStoreError::Database(format!("Failed to insert chat: {}", e)))?;

        Ok(())
    }

    async fn chat_by_id(&self, id: &ChatId) -> Result<Option<Chat>, ChatStoreError> {
        let row = sqlx::query(
            "SELECT id, user_id, title, visibility, created_at, updated_at FROM chats WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ChatStoreError::Database(format!("Failed to fetch chat: {}", e)))?;

        row.as_ref().map(chat_from_row).transpose()
    }

    async fn chats_for_user(
        &self,
        user_id: &UserId,
        limit: u32,
        skip: u32,
        search: Option<&str>,
    ) -> Result<Vec<Chat>, ChatStoreError> {
        let rows = match search {
            Some(needle) => {
                sqlx::query(
                    r#"
                    SELECT id, user_id, title, visibility, created_at, updated_at
                    FROM chats
                    WHERE user_id = $1 AND title ILIKE $2
                    ORDER BY updated_at DESC
                    LIMIT $3 OFFSET $4
                    "#,
                )
                .bind(user_id.as_str())
                .bind(format!("%{}%", needle))
                .bind(i64::from(limit))
                .bind(i64::from(skip))
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT id, user_id, title, visibility, created_at, updated_at
                    FROM chats
                    WHERE user_id = $1
                    ORDER BY updated_at DESC
                    LIMIT $2 OFFSET $3
                    "#,
                )
                .bind(user_id.as_str())
                .bind(i64::from(limit))
                .bind(i64::from(skip))
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(|e| ChatStoreError::Database(format!("Failed to list chats: {}", e)))?;

        rows.iter().map(chat_from_row).collect()
    }

    async fn delete_chat(&self, id: &ChatId) -> Result<(), ChatStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| ChatStoreError::Database(format!("Failed to start transaction: {}", e)))?;

        sqlx::query("DELETE FROM messages WHERE chat_id = $1")
            .bind(id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| ChatStoreError::Database(format!("Failed to delete messages: {}", e)))?;

        let result = sqlx::query("DELETE FROM chats WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| ChatStoreError::Database(format!("Failed to delete chat: {}", e)))?;

        if result.rows_affected() == 0 {
            return Err(ChatStoreError::NotFound(*id));
        }

        tx.commit()
            .await
            .map_err(|e| ChatStoreError::Database(format!("Failed to commit transaction: {}", e)))?;

        Ok(())
    }

    async fn delete_all_chats_for_user(&self, user_id: &UserId) -> Result<u64, ChatStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| ChatStoreError::Database(format!("Failed to start transaction: {}", e)))?;

        sqlx::query(
            "DELETE FROM messages WHERE chat_id IN (SELECT id FROM chats WHERE user_id = $1)",
        )
        .bind(user_id.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| ChatStoreError::Database(format!("Failed to delete messages: {}", e)))?;

        let result = sqlx::query("DELETE FROM chats WHERE user_id = $1")
            .bind(user_id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| ChatStoreError::Database(format!("Failed to delete chats: {}", e)))?;

        tx.commit()
            .await
            .map_err(|e| ChatStoreError::Database(format!("Failed to commit transaction: {}", e)))?;

        Ok(result.rows_affected())
    }

    async fn update_title(&self, id: &ChatId, title: &str) -> Result<(), ChatStoreError> {
        let result = sqlx::query("UPDATE chats SET title = $2, updated_at = NOW() WHERE id = $1")
            .bind(id.as_uuid())
            .bind(title)
            .execute(&self.pool)
            .await
            .map_err(|e| ChatStoreError::Database(format!("Failed to update title: {}", e)))?;

        if result.rows_affected() == 0 {
            return Err(ChatStoreError::NotFound(*id));
        }
        Ok(())
    }

    async fn update_visibility(
        &self,
        id: &ChatId,
        visibility: Visibility,
    ) -> Result<(), ChatStoreError> {
        let result =
            sqlx::query("UPDATE chats SET visibility = $2, updated_at = NOW() WHERE id = $1")
                .bind(id.as_uuid())
                .bind(visibility.as_str())
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    ChatStoreError::Database(format!("Failed to update visibility: {}", e))
                })?;

        if result.rows_affected() == 0 {
            return Err(ChatStoreError::NotFound(*id));
        }
        Ok(())
    }

    async fn save_messages(&self, messages: &[Message]) -> Result<(), ChatStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| ChatStoreError::Database(format!("Failed to start transaction: {}", e)))?;

        for message in messages {
            let parts = serde_json::to_value(&message.parts)
                .map_err(|e| ChatStoreError::Database(format!("Failed to encode parts: {}", e)))?;
            let attachments = serde_json::to_value(&message.attachments).map_err(|e| {
                ChatStoreError::Database(format!("Failed to encode attachments: {}", e))
            })?;

            // A resubmitted message id is a no-op rather than a PK violation.
            sqlx::query(
                r#"
                INSERT INTO messages (id, chat_id, role, parts, attachments, created_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(message.id.as_str())
            .bind(message.chat_id.as_uuid())
            .bind(message.role.as_str())
            .bind(parts)
            .bind(attachments)
            .bind(message.created_at.as_datetime())
            .execute(&mut *tx)
            .await
            .map_err(|e| ChatStoreError::Database(format!("Failed to insert message: {}", e)))?;

            sqlx::query("UPDATE chats SET updated_at = NOW() WHERE id = $1")
                .bind(message.chat_id.as_uuid())
                .execute(&mut *tx)
                .await
                .map_err(|e| ChatStoreError::Database(format!("Failed to touch chat: {}", e)))?;
        }

        tx.commit()
            .await
            .map_err(|e| ChatStoreError::Database(format!("Failed to commit transaction: {}", e)))?;

        Ok(())
    }

    async fn messages_for_chat(&self, chat_id: &ChatId) -> Result<Vec<Message>, ChatStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, chat_id, role, parts, attachments, created_at
            FROM messages
            WHERE chat_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(chat_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ChatStoreError::Database(format!("Failed to fetch messages: {}", e)))?;

        rows.iter().map(message_from_row).collect()
    }

    async fn message_by_id(&self, id: &MessageId) -> Result<Option<Message>, ChatStoreError> {
        let row = sqlx::query(
            "SELECT id, chat_id, role, parts, attachments, created_at FROM messages WHERE id = $1",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ChatStoreError::Database(format!("Failed to fetch message: {}", e)))?;

        row.as_ref().map(message_from_row).transpose()
    }

    async fn delete_messages_from(
        &self,
        chat_id: &ChatId,
        from: Timestamp,
    ) -> Result<(), ChatStoreError> {
        sqlx::query("DELETE FROM messages WHERE chat_id = $1 AND created_at >= $2")
            .bind(chat_id.as_uuid())
            .bind(from.as_datetime())
            .execute(&self.pool)
            .await
            .map_err(|e| ChatStoreError::Database(format!("Failed to delete messages: {}", e)))?;

        Ok(())
    }
}

impl std::fmt::Debug for PostgresChatStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresChatStore").finish_non_exhaustive()
    }
}
