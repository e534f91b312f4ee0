//! Messages and their typed parts.

use serde::{Deserialize, Serialize};

use super::{ChatId, MessageId, Timestamp};

/// Role of a message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    /// Returns the string representation stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }

    /// Parses the stored representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "system" => Some(Role::System),
            _ => None,
        }
    }
}

/// One typed segment of a message body.
///
/// Closed tagged union so rendering and persistence can match exhaustively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagePart {
    /// Plain text content.
    Text { text: String },
    /// Reference to an uploaded file.
    File {
        name: String,
        url: String,
        media_type: String,
    },
    /// Model reasoning trace, delivered ahead of the answer text.
    Reasoning { text: String },
    /// Source citation attached to the answer.
    Source { url: String, title: Option<String> },
}

impl MessagePart {
    /// Creates a text part.
    pub fn text(text: impl Into<String>) -> Self {
        MessagePart::Text { text: text.into() }
    }

    /// Creates a reasoning part.
    pub fn reasoning(text: impl Into<String>) -> Self {
        MessagePart::Reasoning { text: text.into() }
    }
}

/// File attachment metadata carried alongside a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub name: String,
    pub url: String,
    pub media_type: String,
}

/// A single message within a chat.
///
/// Within a chat, messages are totally ordered by `created_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub role: Role,
    pub parts: Vec<MessagePart>,
    pub attachments: Vec<Attachment>,
    pub created_at: Timestamp,
}

impl Message {
    /// Creates a user message with the given parts.
    pub fn user(id: MessageId, chat_id: ChatId, parts: Vec<MessagePart>) -> Self {
        Self {
            id,
            chat_id,
            role: Role::User,
            parts,
            attachments: Vec::new(),
            created_at: Timestamp::now(),
        }
    }

    /// Creates an assistant message with the given parts.
    pub fn assistant(id: MessageId, chat_id: ChatId, parts: Vec<MessagePart>) -> Self {
        Self {
            id,
            chat_id,
            role: Role::Assistant,
            parts,
            attachments: Vec::new(),
            created_at: Timestamp::now(),
        }
    }

    /// Concatenated text content of all text parts.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        for part in &self.parts {
            if let MessagePart::Text { text } = part {
                out.push_str(text);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parts_serialize_with_type_tag() {
        let part = MessagePart::text("hello");
        let json = serde_json::to_string(&part).unwrap();
        assert!(json.contains(r#""type":"text"#));
        assert!(json.contains("hello"));

        let part = MessagePart::Source {
            url: "https://example.com".to_string(),
            title: None,
        };
        let json = serde_json::to_string(&part).unwrap();
        assert!(json.contains(r#""type":"source"#));
    }

    #[test]
    fn parts_deserialize_from_tagged_json() {
        let part: MessagePart =
            serde_json::from_str(r#"{"type":"reasoning","text":"thinking"}"#).unwrap();
        assert_eq!(part, MessagePart::reasoning("thinking"));
    }

    #[test]
    fn text_content_skips_non_text_parts() {
        let msg = Message::assistant(
            MessageId::generate(),
            ChatId::new(),
            vec![
                MessagePart::reasoning("hmm"),
                MessagePart::text("Hello"),
                MessagePart::text(" world"),
            ],
        );
        assert_eq!(msg.text_content(), "Hello world");
    }

    #[test]
    fn role_round_trips_through_storage_form() {
        for role in [Role::User, Role::Assistant, Role::System] {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse("tool"), None);
    }
}
