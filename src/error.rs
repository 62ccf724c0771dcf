//! Application-wide error taxonomy.
//!
//! Mirrors `auth::middleware::AuthError`'s `IntoResponse` idiom but covers
//! the full taxonomy from the error-handling design: validation, not-found,
//! conflict, and the upstream/credential/state-invariant kinds that never
//! reach a client directly but still need one place to log from.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("upstream transient error: {0}")]
    UpstreamTransient(String),

    #[error("upstream permanent error: {0}")]
    UpstreamPermanent(String),

    #[error("credential expired or invalid: {0}")]
    CredentialExpired(String),

    #[error("state invariant violated: {0}")]
    StateInvariant(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::UpstreamTransient(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            AppError::UpstreamPermanent(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
            AppError::CredentialExpired(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            AppError::StateInvariant(msg) => {
                tracing::error!(error = %msg, "state invariant violated");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_to_expected_status_classes() {
        assert_eq!(
            AppError::Validation("x".into()).into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::NotFound("x".into()).into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::CredentialExpired("x".into())
                .into_response()
                .status(),
            StatusCode::UNAUTHORIZED
        );
    }
}
