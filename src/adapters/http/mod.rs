//! HTTP adapter: the REST + SSE surface of the service.

pub mod auth;
pub mod chat;
pub mod dto;
pub mod error;
pub mod history;
pub mod meta;
pub mod stream;

use std::convert::Infallible;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Request};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{Stream, StreamExt};
use tower_http::trace::TraceLayer;

use crate::application::{
    ChatTurnHandler, EventStream, RateLimiter, ResumableStreamContext, StreamRegistry,
};
use crate::ports::ChatStore;

pub use auth::CurrentUser;
pub use error::{ApiError, ErrorResponse};

/// Shared handler state. Cheap to clone per request.
#[derive(Clone)]
pub struct AppState {
    pub turns: ChatTurnHandler,
    pub chat_store: Arc<dyn ChatStore>,
    pub rate_limiter: RateLimiter,
    pub registry: StreamRegistry,
    pub streams: ResumableStreamContext,
}

/// Builds the API router.
///
/// Endpoints:
/// - POST   /api/chat                  — run a chat turn, respond as SSE
/// - DELETE /api/chat?id=              — delete an owned chat
/// - GET    /api/chat/:chat_id/stream  — resume the active stream for a chat
/// - GET    /api/history               — list the caller's chats
/// - DELETE /api/history               — delete all of the caller's chats
/// - GET    /api/messages?chatId=      — list a chat's messages
/// - GET    /api/usage                 — daily quota consumption
/// - GET    /api/models                — model catalog
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/chat", post(chat::post_chat).delete(chat::delete_chat))
        .route("/api/chat/:chat_id/stream", get(stream::get_stream))
        .route(
            "/api/history",
            get(history::get_history).delete(history::delete_history),
        )
        .route("/api/messages", get(history::get_messages))
        .route("/api/usage", get(meta::get_usage))
        .route("/api/models", get(meta::get_models))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// `Json` body extractor that renders rejections as the unified error body.
///
/// Axum's own extractor replies to malformed or mistyped bodies with a
/// plain-text 422; every body problem here is a 400 `{error, message}` like
/// any other client error.
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ApiJson(value)),
            Err(rejection) => Err(ApiError::BadRequest(rejection.body_text())),
        }
    }
}

/// Wraps a frame stream as an SSE response.
///
/// Each frame becomes one `data:` line of JSON; the stream closes with a
/// literal `[DONE]` marker so clients can distinguish completion from a
/// dropped connection.
pub(crate) fn sse_response(
    events: EventStream,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let frames = events
        .map(|event| {
            let payload = serde_json::to_string(&event).unwrap_or_else(|e| {
                tracing::error!(error = %e, "failed to encode stream event");
                r#"{"type":"error","message":"encoding failure"}"#.to_string()
            });
            Ok(Event::default().data(payload))
        })
        .chain(futures::stream::once(async {
            Ok(Event::default().data("[DONE]"))
        }));

    Sse::new(frames).keep_alive(KeepAlive::default())
}
