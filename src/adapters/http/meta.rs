//! Handlers for quota and catalog lookups.

use axum::extract::State;
use axum::Json;

use super::auth::CurrentUser;
use super::dto::{ModelEntry, UsageResponse};
use super::AppState;
use crate::config::{available_models, DEFAULT_MODEL};

/// `GET /api/usage` — the caller's consumed and allowed daily messages.
pub async fn get_usage(State(state): State<AppState>, user: CurrentUser) -> Json<UsageResponse> {
    let usage = state
        .rate_limiter
        .usage(&user.user_id, user.is_anonymous)
        .await;
    Json(usage.into())
}

/// `GET /api/models` — the model catalog this deployment serves.
pub async fn get_models() -> Json<Vec<ModelEntry>> {
    let entries = available_models()
        .iter()
        .map(|m| ModelEntry {
            id: m.id,
            name: m.name,
            provider: m.provider,
            description: m.description,
            is_default: m.id == DEFAULT_MODEL,
        })
        .collect();
    Json(entries)
}
