// error.rs
use axum::{
    extract::rejection::JsonRejection,
    response::{IntoResponse, Response},
    Json,
};
use http::StatusCode;
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

use crate::store::StoreError;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Business-rule violation, e.g. voting on an expired poll.
    #[error("{0}")]
    InvalidOperation(String),

    #[error("{0}")]
    Validation(String),

    #[error("Missing or malformed X-User-Id header")]
    Unauthenticated,

    #[error("Only the poll owner can do that")]
    Forbidden,

    /// Safe to retry the whole request; nothing was applied.
    #[error("Request conflicted with a concurrent update, please retry")]
    TransientConflict,

    #[error("Internal server error")]
    Unexpected(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => AppError::NotFound(what),
            StoreError::Transient(reason) => {
                warn!(%reason, "transient store conflict");
                AppError::TransientConflict
            }
            StoreError::Database(err) => AppError::Unexpected(Box::new(err)),
        }
    }
}

/// Unreadable or mistyped request bodies are validation failures.
impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::InvalidOperation { .. } | AppError::Validation { .. } => {
                StatusCode::BAD_REQUEST
            }
            AppError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::TransientConflict => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Unexpected(ref source) => {
                error!(error = %source, "unexpected failure");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
