//! Health check endpoint.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use duplex_engine::StoreHandle;
use serde::Serialize;

use crate::AppState;

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    /// "ok" when both stores accept transactions, "degraded" otherwise
    pub status: &'static str,
    pub version: String,
    pub primary: StoreStatus,
    pub secondary: StoreStatus,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct StoreStatus {
    pub reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Create health routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/", get(root))
}

/// Open and immediately roll back a transaction on one store.
async fn check_store(handle: &StoreHandle) -> StoreStatus {
    let outcome = match handle.begin().await {
        Ok(tx) => tx.rollback().await.map_err(|e| e.to_string()),
        Err(e) => Err(e.to_string()),
    };
    match outcome {
        Ok(()) => StoreStatus {
            reachable: true,
            error: None,
        },
        Err(error) => {
            tracing::warn!("{} store failed its health check: {}", handle.role(), error);
            StoreStatus {
                reachable: false,
                error: Some(error),
            }
        }
    }
}

/// Health check handler. Answers 503 while either store is unreachable.
async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let primary = check_store(state.stores.primary()).await;
    let secondary = check_store(state.stores.secondary()).await;
    let healthy = primary.reachable && secondary.reachable;

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = HealthResponse {
        status: if healthy { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION").to_string(),
        primary,
        secondary,
        timestamp: chrono::Utc::now().to_rfc3339(),
    };
    (status, Json(body))
}

/// Root handler.
async fn root() -> &'static str {
    "Duplex Replication Server"
}
