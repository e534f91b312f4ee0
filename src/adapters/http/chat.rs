//! Handlers for starting a chat turn and deleting a chat.

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;

use super::auth::CurrentUser;
use super::dto::{ChatRequest, DeleteChatQuery};
use super::error::ApiError;
use super::{sse_response, ApiJson, AppState};
use crate::application::ChatTurnCommand;

/// `POST /api/chat` — runs one chat turn and streams the response as SSE.
///
/// The generation task outlives this response: closing the connection stops
/// delivery, not generation or persistence.
pub async fn post_chat(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiJson(body): ApiJson<ChatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let turn = state
        .turns
        .handle(ChatTurnCommand {
            chat_id: body.id,
            user_id: user.user_id,
            is_anonymous: user.is_anonymous,
            messages: body.messages,
            model_id: body.model_id,
            trigger: body.trigger,
        })
        .await?;

    Ok(sse_response(turn.events))
}

/// `DELETE /api/chat?id=` — deletes an owned chat and its messages.
///
/// Unknown and foreign chats are indistinguishable in the response: both
/// come back 403 so the endpoint never confirms a chat's existence.
pub async fn delete_chat(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<DeleteChatQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let owned = state
        .chat_store
        .chat_by_id(&query.id)
        .await?
        .is_some_and(|chat| chat.is_owned_by(&user.user_id));
    if !owned {
        return Err(ApiError::Forbidden(
            "You do not have access to this chat".to_string(),
        ));
    }

    state.chat_store.delete_chat(&query.id).await?;
    if let Err(e) = state.registry.clear(&query.id).await {
        tracing::warn!(chat = %query.id, error = %e, "failed to clear stream registration");
    }

    Ok(Json(serde_json::json!({ "deleted": true })))
}
