//! Model provider port: the hosted LLM consumed as a token stream.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::domain::Role;

/// Error from the model provider.
#[derive(Debug, Clone, Error)]
pub enum ModelError {
    #[error("provider rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u32 },

    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("failed to parse provider response: {0}")]
    Parse(String),
}

/// One flattened prompt message sent to the provider.
#[derive(Debug, Clone)]
pub struct PromptMessage {
    pub role: Role,
    pub content: String,
}

impl PromptMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Request for a generation.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Model id from the catalog.
    pub model: String,
    /// Full conversation history, oldest first.
    pub messages: Vec<PromptMessage>,
    /// Sampling temperature.
    pub temperature: f32,
    /// Optional completion cap.
    pub max_tokens: Option<u32>,
}

/// One incremental chunk of model output.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelChunk {
    /// Incremental answer text.
    TextDelta(String),
    /// Incremental reasoning trace.
    ReasoningDelta(String),
    /// The provider signalled the end of the generation.
    Done,
}

/// Streaming response handle.
///
/// The receiver yields chunks until `Done` or an error; dropping it does not
/// cancel the upstream request (the engine drains it to completion).
pub struct TokenStream {
    pub receiver: mpsc::Receiver<Result<ModelChunk, ModelError>>,
}

/// Port for model generation.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Starts a streaming generation.
    async fn stream_generate(&self, request: GenerationRequest) -> Result<TokenStream, ModelError>;

    /// Runs a short non-streaming completion (title generation).
    async fn complete(&self, request: GenerationRequest) -> Result<String, ModelError>;
}
