//! Handlers for chat history and message listing.

use axum::extract::{Query, State};
use axum::Json;

use super::auth::CurrentUser;
use super::dto::{
    DeleteHistoryResponse, HistoryQuery, HistoryResponse, MessagesQuery, MessagesResponse,
};
use super::error::ApiError;
use super::AppState;

const MAX_HISTORY_LIMIT: u32 = 100;

/// `GET /api/history` — lists the caller's chats, most recent first.
pub async fn get_history(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let limit = query.limit.clamp(1, MAX_HISTORY_LIMIT);

    // Fetch one past the page to learn whether more exist.
    let mut chats = state
        .chat_store
        .chats_for_user(&user.user_id, limit + 1, query.skip, query.search.as_deref())
        .await?;
    let has_more = chats.len() as u32 > limit;
    chats.truncate(limit as usize);

    Ok(Json(HistoryResponse { chats, has_more }))
}

/// `DELETE /api/history` — deletes every chat the caller owns.
pub async fn delete_history(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<DeleteHistoryResponse>, ApiError> {
    let deleted_count = state
        .chat_store
        .delete_all_chats_for_user(&user.user_id)
        .await?;
    Ok(Json(DeleteHistoryResponse { deleted_count }))
}

/// `GET /api/messages?chatId=` — lists a chat's messages oldest first.
///
/// Readable by the owner always, and by anyone for public chats.
pub async fn get_messages(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<MessagesQuery>,
) -> Result<Json<MessagesResponse>, ApiError> {
    let chat = state
        .chat_store
        .chat_by_id(&query.chat_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Chat {} not found", query.chat_id)))?;

    if !chat.is_readable_by(&user.user_id) {
        return Err(ApiError::Forbidden(
            "You do not have access to this chat".to_string(),
        ));
    }

    let messages = state.chat_store.messages_for_chat(&query.chat_id).await?;
    Ok(Json(MessagesResponse { messages }))
}
