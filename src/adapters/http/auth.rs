//! Caller identity extraction.
//!
//! Authentication happens upstream (gateway or session layer); this service
//! trusts two headers: `x-user-id` carries the opaque caller id and
//! `x-anonymous: true` marks guest sessions, which get the lower quota.

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use super::error::ApiError;
use crate::domain::UserId;

/// The authenticated (or guest) caller of the current request.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub user_id: UserId,
    pub is_anonymous: bool,
}

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .and_then(UserId::new)
            .ok_or(ApiError::Unauthorized)?;

        let is_anonymous = parts
            .headers
            .get("x-anonymous")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
            .unwrap_or(false);

        Ok(Self {
            user_id,
            is_anonymous,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(request: Request<()>) -> Result<CurrentUser, ApiError> {
        let (mut parts, _) = request.into_parts();
        CurrentUser::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn extracts_authenticated_user() {
        let request = Request::builder()
            .header("x-user-id", "u-42")
            .body(())
            .unwrap();
        let user = extract(request).await.unwrap();
        assert_eq!(user.user_id.as_str(), "u-42");
        assert!(!user.is_anonymous);
    }

    #[tokio::test]
    async fn anonymous_flag_is_honoured() {
        let request = Request::builder()
            .header("x-user-id", "guest-7")
            .header("x-anonymous", "true")
            .body(())
            .unwrap();
        let user = extract(request).await.unwrap();
        assert!(user.is_anonymous);
    }

    #[tokio::test]
    async fn missing_user_id_is_unauthorized() {
        let request = Request::builder().body(()).unwrap();
        assert!(matches!(
            extract(request).await,
            Err(ApiError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn empty_user_id_is_unauthorized() {
        let request = Request::builder()
            .header("x-user-id", "")
            .body(())
            .unwrap();
        assert!(matches!(
            extract(request).await,
            Err(ApiError::Unauthorized)
        ));
    }
}
