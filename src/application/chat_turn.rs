//! One inbound chat turn, end to end.
//!
//! Orchestrates: validate → rate limit → persist user message → start
//! generation → publish through the resumable stream engine → persist the
//! assistant message when generation finishes. The generation task's
//! lifetime is independent of the HTTP request that started it; that
//! independence is the load-bearing design decision of this subsystem.

use std::sync::Arc;

use serde::Deserialize;
use tokio::task::JoinHandle;

use crate::application::rate_limiter::RateLimiter;
use crate::application::resumable::{
    CompletionCallback, EventStream, ResumableStreamContext, StreamOutcome,
};
use crate::application::stream_registry::StreamRegistry;
use crate::application::title;
use crate::config::{resolve_model_id, LimitsConfig, GENERATION_TEMPERATURE};
use crate::domain::{Chat, ChatId, Message, MessageId, MessagePart, Role, StreamId, Timestamp, UserId};
use crate::ports::{
    ChatStore, ChatStoreError, GenerationRequest, ModelError, ModelProvider, PromptMessage,
};

/// What kind of turn the client requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Trigger {
    #[default]
    SubmitMessage,
    RegenerateMessage,
}

/// A message as it arrives in the request body.
#[derive(Debug, Clone, Deserialize)]
pub struct IncomingMessage {
    pub id: MessageId,
    pub role: Role,
    pub parts: Vec<MessagePart>,
}

impl IncomingMessage {
    /// Concatenated text content of the text parts.
    fn text_content(&self) -> String {
        let mut out = String::new();
        for part in &self.parts {
            if let MessagePart::Text { text } = part {
                out.push_str(text);
            }
        }
        out
    }
}

/// Command describing one chat turn.
#[derive(Debug, Clone)]
pub struct ChatTurnCommand {
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub is_anonymous: bool,
    pub messages: Vec<IncomingMessage>,
    pub model_id: Option<String>,
    pub trigger: Trigger,
}

/// Errors that can end a turn before streaming starts.
#[derive(Debug, thiserror::Error)]
pub enum ChatTurnError {
    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("daily message limit of {limit} reached")]
    RateLimited { limit: u32, reset_at: Timestamp },

    #[error("caller does not own this chat")]
    Forbidden,

    #[error(transparent)]
    Store(#[from] ChatStoreError),

    #[error(transparent)]
    Provider(#[from] ModelError),
}

/// A started turn: the deliverable stream plus observability handles.
pub struct ChatTurn {
    /// Id under which the generation is resumable.
    pub stream_id: StreamId,
    /// Frames for the initiating client.
    pub events: EventStream,
    /// Title generation task, present when the chat was just created.
    pub title_task: Option<JoinHandle<()>>,
}

/// Orchestrator for chat turns. Cheap to clone.
#[derive(Clone)]
pub struct ChatTurnHandler {
    chat_store: Arc<dyn ChatStore>,
    provider: Arc<dyn ModelProvider>,
    rate_limiter: RateLimiter,
    registry: StreamRegistry,
    streams: ResumableStreamContext,
    limits: LimitsConfig,
}

impl ChatTurnHandler {
    /// Wires the handler with its collaborators.
    pub fn new(
        chat_store: Arc<dyn ChatStore>,
        provider: Arc<dyn ModelProvider>,
        rate_limiter: RateLimiter,
        registry: StreamRegistry,
        streams: ResumableStreamContext,
        limits: LimitsConfig,
    ) -> Self {
        Self {
            chat_store,
            provider,
            rate_limiter,
            registry,
            streams,
            limits,
        }
    }

    /// Runs one turn up to the point where frames start flowing.
    pub async fn handle(&self, cmd: ChatTurnCommand) -> Result<ChatTurn, ChatTurnError> {
        // Validating
        let last = cmd
            .messages
            .last()
            .ok_or_else(|| ChatTurnError::Invalid("messages must not be empty".to_string()))?;
        if last.role != Role::User {
            return Err(ChatTurnError::Invalid(
                "last message must be from the user".to_string(),
            ));
        }
        if last.parts.is_empty() {
            return Err(ChatTurnError::Invalid(
                "message must have at least one part".to_string(),
            ));
        }

        // RateLimiting: short-circuit before any persistence.
        let decision = self
            .rate_limiter
            .check_and_consume(&cmd.user_id, cmd.is_anonymous)
            .await;
        if !decision.allowed {
            return Err(ChatTurnError::RateLimited {
                limit: decision.limit,
                reset_at: decision.reset_at,
            });
        }

        // Persisting (user message), creating the chat first if needed.
        let mut title_task = None;
        match self.chat_store.chat_by_id(&cmd.chat_id).await? {
            Some(chat) if !chat.is_owned_by(&cmd.user_id) => {
                // Fail closed; the response never reveals whether the chat exists.
                return Err(ChatTurnError::Forbidden);
            }
            Some(_) => {}
            None => {
                let chat = Chat::new(cmd.chat_id, cmd.user_id.clone());
                self.chat_store.save_chat(&chat).await?;
                title_task = Some(self.spawn_title_task(cmd.chat_id, last.text_content()));
            }
        }

        if cmd.trigger == Trigger::RegenerateMessage {
            // Last-writer-wins: concurrent regenerates race at this delete.
            if let Some(stored) = self.chat_store.message_by_id(&last.id).await? {
                if stored.chat_id == cmd.chat_id {
                    self.chat_store
                        .delete_messages_from(&cmd.chat_id, stored.created_at)
                        .await?;
                }
            }
        }

        let user_message = Message::user(last.id.clone(), cmd.chat_id, last.parts.clone());
        self.chat_store.save_messages(&[user_message]).await?;

        // Generating
        let history = self.chat_store.messages_for_chat(&cmd.chat_id).await?;
        let request = GenerationRequest {
            model: resolve_model_id(cmd.model_id.as_deref()).to_string(),
            messages: to_prompt(&history),
            temperature: GENERATION_TEMPERATURE,
            max_tokens: None,
        };
        let source = self.provider.stream_generate(request).await?;

        // Register before any output flows so a racing resume request can
        // find the stream as soon as possible.
        let stream_id = StreamId::new();
        if let Err(e) = self.registry.register(&cmd.chat_id, &stream_id).await {
            tracing::warn!(chat = %cmd.chat_id, error = %e, "stream registration failed, turn is not resumable");
        }

        // Streaming / Finalizing
        let assistant_id = MessageId::generate();
        let events = self
            .streams
            .create_new_resumable_stream(
                stream_id,
                assistant_id,
                source,
                self.finalize_callback(cmd.chat_id),
            )
            .await;

        Ok(ChatTurn {
            stream_id,
            events,
            title_task,
        })
    }

    /// Persists the assistant message when the generation finishes, whether
    /// or not the initiating connection is still open. Partial output from a
    /// failed generation is persisted too rather than discarded.
    fn finalize_callback(&self, chat_id: ChatId) -> CompletionCallback {
        let store = self.chat_store.clone();
        Box::new(move |outcome: StreamOutcome| {
            Box::pin(async move {
                let mut parts = Vec::new();
                if !outcome.reasoning.is_empty() {
                    parts.push(MessagePart::reasoning(outcome.reasoning));
                }
                if !outcome.text.is_empty() {
                    parts.push(MessagePart::text(outcome.text));
                }

                if parts.is_empty() {
                    tracing::warn!(chat = %chat_id, error = ?outcome.error, "generation produced no output, nothing to persist");
                    return;
                }

                let message = Message::assistant(outcome.message_id, chat_id, parts);
                if let Err(e) = store.save_messages(&[message]).await {
                    tracing::error!(chat = %chat_id, error = %e, "failed to persist assistant message");
                } else if let Some(upstream) = outcome.error {
                    tracing::warn!(chat = %chat_id, error = %upstream, "persisted partial output from failed generation");
                }
            })
        })
    }

    fn spawn_title_task(&self, chat_id: ChatId, first_message: String) -> JoinHandle<()> {
        let provider = self.provider.clone();
        let store = self.chat_store.clone();
        let max_chars = self.limits.title_max_chars;
        tokio::spawn(async move {
            match title::generate_title(provider, &first_message, max_chars).await {
                Ok(generated) if !generated.is_empty() => {
                    if let Err(e) = store.update_title(&chat_id, &generated).await {
                        // Non-fatal for the turn; the placeholder title stays.
                        tracing::warn!(chat = %chat_id, error = %e, "failed to persist generated title");
                    }
                }
                Ok(_) => {
                    tracing::warn!(chat = %chat_id, "title generation returned empty output");
                }
                Err(e) => {
                    tracing::warn!(chat = %chat_id, error = %e, "title generation failed");
                }
            }
        })
    }
}

fn to_prompt(history: &[Message]) -> Vec<PromptMessage> {
    history
        .iter()
        .filter_map(|m| {
            let content = m.text_content();
            if content.is_empty() {
                return None;
            }
            Some(PromptMessage {
                role: m.role,
                content,
            })
        })
        .collect()
}
