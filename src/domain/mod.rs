//! Domain types for chats, messages and streams.
//!
//! Pure data with no I/O; everything here is owned by the persistence and
//! streaming layers through the ports in [`crate::ports`].

mod chat;
mod ids;
mod message;
mod timestamp;

pub use chat::{Chat, Visibility, PLACEHOLDER_TITLE};
pub use ids::{ChatId, MessageId, StreamId, UserId};
pub use message::{Attachment, Message, MessagePart, Role};
pub use timestamp::Timestamp;
