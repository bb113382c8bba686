// auth.rs
use axum::extract::FromRequestParts;
use http::request::Parts;
use uuid::Uuid;

use crate::error::AppError;

/// Identity is resolved upstream; requests carry the caller's id in this header.
pub const USER_HEADER: &str = "x-user-id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser(pub Uuid);

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| Uuid::parse_str(value.trim()).ok())
            .map(AuthUser)
            .ok_or(AppError::Unauthenticated)
    }
}
