//! Application services orchestrating the domain over the ports.

pub mod chat_turn;
pub mod rate_limiter;
pub mod resumable;
pub mod stream_registry;
pub mod title;

pub use chat_turn::{ChatTurn, ChatTurnCommand, ChatTurnError, ChatTurnHandler, IncomingMessage, Trigger};
pub use rate_limiter::{RateLimitDecision, RateLimiter, Usage};
pub use resumable::{
    CompletionCallback, EventStream, ResumableStreamContext, StreamContextConfig, StreamEvent,
    StreamOutcome,
};
pub use stream_registry::StreamRegistry;
