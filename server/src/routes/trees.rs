//! Nested tree routes.

use axum::{
    extract::{Path, Query, State},
    routing::{delete, post, put},
    Json, Router,
};
use duplex_engine::{Id, LevelOutcome, SyncedNode};
use serde_json::Value;

use crate::auth::AuthUser;
use crate::error::Result;
use crate::handlers::{
    handle_delete_tree, handle_sync_collection, handle_upsert_tree, ModeQuery,
    TreeDeleteResponse,
};
use crate::AppState;

/// Create tree routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/trees/{tree}", post(upsert_handler))
        .route("/api/trees/{tree}/{id}", delete(delete_handler))
        .route("/api/trees/{tree}/{id}/{collection}", put(collection_handler))
}

/// POST /api/trees/{tree} - Upsert roots and reconcile their collections.
async fn upsert_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(tree): Path<String>,
    Query(mode): Query<ModeQuery>,
    Json(body): Json<Value>,
) -> Result<Json<Vec<SyncedNode>>> {
    let nodes = handle_upsert_tree(&state.stores, &tree, body, mode.dual()).await?;
    Ok(Json(nodes))
}

/// PUT /api/trees/{tree}/{id}/{collection} - Reconcile one collection.
async fn collection_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path((tree, id, collection)): Path<(String, Id, String)>,
    Query(mode): Query<ModeQuery>,
    Json(body): Json<Value>,
) -> Result<Json<LevelOutcome>> {
    let outcome =
        handle_sync_collection(&state.stores, &tree, id, &collection, body, mode.dual()).await?;
    Ok(Json(outcome))
}

/// DELETE /api/trees/{tree}/{id} - Delete a root and its subtree.
async fn delete_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path((tree, id)): Path<(String, Id)>,
    Query(mode): Query<ModeQuery>,
) -> Result<Json<TreeDeleteResponse>> {
    let response = handle_delete_tree(&state.stores, &tree, id, mode.dual()).await?;
    Ok(Json(response))
}
