//! Unified error handling for the server.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use duplex_engine::Error as EngineError;
use serde::Serialize;

/// Application error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized")]
    Unauthorized,
}

/// Error response body.
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

/// Status code for an engine error, decided by its innermost cause.
pub fn engine_status(err: &EngineError) -> StatusCode {
    match err.root() {
        EngineError::NotFound { .. } | EngineError::UnknownEntity(_) => StatusCode::NOT_FOUND,
        EngineError::Validation { .. } | EngineError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
        EngineError::UnresolvedMapping { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        EngineError::PartialReplication { .. }
        | EngineError::Store { .. }
        | EngineError::Failed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message, details) = match &self {
            AppError::Engine(e) => {
                let status = engine_status(e);
                if status.is_server_error() {
                    tracing::error!("Engine error: {}", e);
                } else {
                    tracing::warn!("Engine error: {}", e);
                }
                (status, e.to_string(), Some(e.root().to_string()))
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone(), None),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone(), None),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string(), None),
        };

        let body = Json(ErrorResponse {
            error: error_message,
            details,
        });

        (status, body).into_response()
    }
}

/// Result type alias for handlers.
pub type Result<T> = std::result::Result<T, AppError>;
