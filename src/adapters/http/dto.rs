//! Request and response bodies for the chat API.

use serde::{Deserialize, Serialize};

use crate::application::{IncomingMessage, Trigger, Usage};
use crate::domain::{Chat, ChatId, Message};

/// Body of `POST /api/chat`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    /// Client-generated chat id; an unknown id creates the chat.
    pub id: ChatId,
    /// Conversation as the client sees it; only the last message is new.
    pub messages: Vec<IncomingMessage>,
    /// Model id from the catalog; unknown or absent falls back to default.
    #[serde(default)]
    pub model_id: Option<String>,
    #[serde(default)]
    pub trigger: Trigger,
}

/// Query of `DELETE /api/chat`.
#[derive(Debug, Deserialize)]
pub struct DeleteChatQuery {
    pub id: ChatId,
}

/// Query of `GET /api/history`.
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_history_limit")]
    pub limit: u32,
    #[serde(default)]
    pub skip: u32,
    #[serde(default, rename = "searchQuery")]
    pub search: Option<String>,
}

fn default_history_limit() -> u32 {
    20
}

/// Body of `GET /api/history`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResponse {
    pub chats: Vec<Chat>,
    pub has_more: bool,
}

/// Body of `DELETE /api/history`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteHistoryResponse {
    pub deleted_count: u64,
}

/// Query of `GET /api/messages`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesQuery {
    pub chat_id: ChatId,
}

/// Body of `GET /api/messages`.
#[derive(Debug, Serialize)]
pub struct MessagesResponse {
    pub messages: Vec<Message>,
}

/// Body of `GET /api/usage`.
#[derive(Debug, Serialize)]
pub struct UsageResponse {
    pub usage: u32,
    pub limit: u32,
}

/// One catalog entry in `GET /api/models`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelEntry {
    pub id: &'static str,
    pub name: &'static str,
    pub provider: &'static str,
    pub description: &'static str,
    pub is_default: bool,
}

impl From<Usage> for UsageResponse {
    fn from(u: Usage) -> Self {
        Self {
            usage: u.usage,
            limit: u.limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_request_deserializes_with_defaults() {
        let json = r#"{
            "id": "550e8400-e29b-41d4-a716-446655440000",
            "messages": [
                {"id": "m1", "role": "user", "parts": [{"type": "text", "text": "hi"}]}
            ]
        }"#;
        let request: ChatRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.messages.len(), 1);
        assert_eq!(request.model_id, None);
        assert_eq!(request.trigger, Trigger::SubmitMessage);
    }

    #[test]
    fn regenerate_trigger_deserializes() {
        let json = r#"{
            "id": "550e8400-e29b-41d4-a716-446655440000",
            "messages": [
                {"id": "m1", "role": "user", "parts": [{"type": "text", "text": "hi"}]}
            ],
            "modelId": "gemini-2.5-pro",
            "trigger": "regenerate-message"
        }"#;
        let request: ChatRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.trigger, Trigger::RegenerateMessage);
        assert_eq!(request.model_id.as_deref(), Some("gemini-2.5-pro"));
    }
}
