//! Handler for resuming an in-flight response stream.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use super::auth::CurrentUser;
use super::error::ApiError;
use super::{sse_response, AppState};
use crate::domain::ChatId;

/// `GET /api/chat/:chat_id/stream` — reattaches to the active stream for a
/// chat.
///
/// Replies 204 when there is nothing to resume: no registered stream, the
/// registration expired, or the channel was already torn down. The client
/// falls back to fetching persisted messages.
pub async fn get_stream(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(chat_id): Path<ChatId>,
) -> Result<Response, ApiError> {
    let chat = state
        .chat_store
        .chat_by_id(&chat_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Chat {} not found", chat_id)))?;

    if !chat.is_readable_by(&user.user_id) {
        return Err(ApiError::Forbidden(
            "You do not have access to this chat".to_string(),
        ));
    }

    let stream_id = match state.registry.lookup(&chat_id).await {
        Ok(Some(stream_id)) => stream_id,
        Ok(None) => return Ok(StatusCode::NO_CONTENT.into_response()),
        Err(e) => {
            // Degraded registry means "not resumable", not a server error.
            tracing::warn!(chat = %chat_id, error = %e, "stream registry lookup failed");
            return Ok(StatusCode::NO_CONTENT.into_response());
        }
    };

    match state.streams.resume_existing_stream(&stream_id).await {
        Some(events) => Ok(sse_response(events).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}
