//! `POST /auth` — stateless bearer-token issuance.

use crate::auth::jwt::JwtHandler;
use crate::auth::models::{LoginRequest, LoginResponse};
use crate::error::AppError;
use axum::{extract::State, Json};
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct AuthState {
    pub jwt_handler: Arc<JwtHandler>,
}

pub async fn authenticate(
    State(state): State<AuthState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    if req.username.trim().is_empty() || req.password.trim().is_empty() {
        return Err(AppError::Validation(
            "username and password must be non-empty".to_string(),
        ));
    }

    let (token, expires_in) = state
        .jwt_handler
        .generate_token(&req.username)
        .map_err(|e| AppError::Internal(e.to_string()))?;

    info!(username = %req.username, "issued bearer token");

    Ok(Json(LoginResponse { token, expires_in }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_empty_username() {
        let state = AuthState {
            jwt_handler: Arc::new(JwtHandler::new("secret".to_string(), 30)),
        };
        let result = authenticate(
            State(state),
            Json(LoginRequest {
                username: "".to_string(),
                password: "pw".to_string(),
            }),
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn accepts_any_nonempty_credentials() {
        let state = AuthState {
            jwt_handler: Arc::new(JwtHandler::new("secret".to_string(), 30)),
        };
        let result = authenticate(
            State(state),
            Json(LoginRequest {
                username: "sniper1".to_string(),
                password: "anything".to_string(),
            }),
        )
        .await;
        assert!(result.is_ok());
        assert!(!result.unwrap().0.token.is_empty());
    }
}
