//! HTTP error mapping.
//!
//! Every handler failure funnels into [`ApiError`], which renders a stable
//! `{"error": code, "message": ...}` body. Internal details are logged, not
//! leaked.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::application::ChatTurnError;
use crate::domain::Timestamp;
use crate::ports::ChatStoreError;

/// Error rendered to the HTTP client.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized,
    Forbidden(String),
    NotFound(String),
    RateLimited { limit: u32, reset_at: Timestamp },
    Upstream(String),
    Internal(String),
}

/// Wire shape of every error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: &'static str,
    pub message: String,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Unauthorized => "unauthorized",
            ApiError::Forbidden(_) => "forbidden",
            ApiError::NotFound(_) => "not_found",
            ApiError::RateLimited { .. } => "rate_limited",
            ApiError::Upstream(_) => "upstream_error",
            ApiError::Internal(_) => "internal_error",
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::BadRequest(msg) => msg.clone(),
            ApiError::Unauthorized => "Missing or invalid credentials".to_string(),
            ApiError::Forbidden(msg) => msg.clone(),
            ApiError::NotFound(msg) => msg.clone(),
            ApiError::RateLimited { limit, reset_at } => format!(
                "Daily message limit of {} reached, resets at {}",
                limit, reset_at
            ),
            ApiError::Upstream(_) => "The model provider is unavailable".to_string(),
            ApiError::Internal(_) => "Something went wrong".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            ApiError::Upstream(detail) => {
                tracing::error!(detail = %detail, "upstream provider error");
            }
            ApiError::Internal(detail) => {
                tracing::error!(detail = %detail, "internal error");
            }
            _ => {}
        }

        let body = ErrorResponse {
            error: self.code(),
            message: self.message(),
        };
        (self.status(), Json(body)).into_response()
    }
}

impl From<ChatStoreError> for ApiError {
    fn from(e: ChatStoreError) -> Self {
        match e {
            ChatStoreError::NotFound(id) => ApiError::NotFound(format!("Chat {} not found", id)),
            ChatStoreError::Database(detail) => ApiError::Internal(detail),
        }
    }
}

impl From<ChatTurnError> for ApiError {
    fn from(e: ChatTurnError) -> Self {
        match e {
            ChatTurnError::Invalid(msg) => ApiError::BadRequest(msg),
            ChatTurnError::RateLimited { limit, reset_at } => {
                ApiError::RateLimited { limit, reset_at }
            }
            ChatTurnError::Forbidden => {
                ApiError::Forbidden("You do not have access to this chat".to_string())
            }
            ChatTurnError::Store(e) => e.into(),
            ChatTurnError::Provider(e) => ApiError::Upstream(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_match_error_kinds() {
        assert_eq!(
            ApiError::BadRequest("x".to_string()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ApiError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ApiError::RateLimited {
                limit: 10,
                reset_at: Timestamp::now()
            }
            .status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ApiError::Upstream("503".to_string()).status(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn internal_detail_is_not_leaked() {
        let err = ApiError::Internal("connection refused to db:5432".to_string());
        assert_eq!(err.message(), "Something went wrong");
    }

    #[test]
    fn store_not_found_maps_to_404() {
        let err: ApiError = ChatStoreError::NotFound(crate::domain::ChatId::new()).into();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }
}
