//! Authentication middleware.
//!
//! When `AUTH_SECRET` is configured every API request must carry it as a
//! Bearer token. Without a secret the server is open.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};

use crate::error::AppError;
use crate::AppState;

/// Caller that passed the token check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    /// The bearer token, or "anonymous" when no secret is configured
    #[allow(dead_code)]
    pub token: String,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());

        let Some(secret) = state.config.auth_secret.as_deref() else {
            return Ok(AuthUser {
                token: "anonymous".to_string(),
            });
        };

        match auth_header.and_then(|header| header.strip_prefix("Bearer ")) {
            Some(token) if token == secret => Ok(AuthUser {
                token: token.to_string(),
            }),
            Some(_) => {
                tracing::warn!("Rejected request with an invalid bearer token");
                Err(AppError::Unauthorized)
            }
            None => Err(AppError::Unauthorized),
        }
    }
}
