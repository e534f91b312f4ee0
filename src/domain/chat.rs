//! Chat aggregate: metadata for one conversation thread.

use serde::{Deserialize, Serialize};

use super::{ChatId, Timestamp, UserId};

/// Title given to a chat before the generated summary arrives.
pub const PLACEHOLDER_TITLE: &str = "New Thread";

/// Who may read a chat. Mutation always requires ownership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Private,
    Public,
}

impl Visibility {
    /// Returns the string representation stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Private => "private",
            Visibility::Public => "public",
        }
    }

    /// Parses the stored representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "private" => Some(Visibility::Private),
            "public" => Some(Visibility::Public),
            _ => None,
        }
    }
}

/// Chat metadata. Messages live separately, keyed by chat id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: ChatId,
    pub user_id: UserId,
    pub title: String,
    pub visibility: Visibility,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Chat {
    /// Creates a new private chat with the placeholder title.
    pub fn new(id: ChatId, user_id: UserId) -> Self {
        let now = Timestamp::now();
        Self {
            id,
            user_id,
            title: PLACEHOLDER_TITLE.to_string(),
            visibility: Visibility::Private,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether `user` owns this chat.
    pub fn is_owned_by(&self, user: &UserId) -> bool {
        &self.user_id == user
    }

    /// Whether `user` may read this chat: the owner always, anyone if public.
    pub fn is_readable_by(&self, user: &UserId) -> bool {
        self.is_owned_by(user) || self.visibility == Visibility::Public
    }
}
