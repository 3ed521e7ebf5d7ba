//! Drift maintenance routes.

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use duplex_engine::{EntityRecord, Id, RepairSummary, SyncReport};

use crate::auth::AuthUser;
use crate::error::Result;
use crate::handlers::{
    handle_check, handle_check_all, handle_repair_all, handle_repair_record, CheckAllResponse,
};
use crate::AppState;

/// Create sync maintenance routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/sync/check/all", get(check_all_handler))
        .route("/sync/check/{entity}", get(check_handler))
        .route("/sync/{entity}/all", post(repair_all_handler))
        .route("/sync/{entity}/{id}", post(repair_record_handler))
}

/// GET /sync/check/all - Compare every entity across the stores.
async fn check_all_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
) -> Result<Json<CheckAllResponse>> {
    let response = handle_check_all(&state.stores).await?;
    Ok(Json(response))
}

/// GET /sync/check/{entity} - Compare one entity across the stores.
async fn check_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(entity): Path<String>,
) -> Result<Json<SyncReport>> {
    let report = handle_check(&state.stores, &entity).await?;
    Ok(Json(report))
}

/// POST /sync/{entity}/all - Copy every primary row to the secondary.
async fn repair_all_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(entity): Path<String>,
) -> Result<Json<RepairSummary>> {
    let summary = handle_repair_all(&state.stores, &entity).await?;
    Ok(Json(summary))
}

/// POST /sync/{entity}/{id} - Copy one primary row to the secondary.
async fn repair_record_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path((entity, id)): Path<(String, Id)>,
) -> Result<Json<EntityRecord>> {
    let record = handle_repair_record(&state.stores, &entity, id).await?;
    Ok(Json(record))
}
