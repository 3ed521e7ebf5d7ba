//! Flat entity routes.

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use duplex_engine::{BulkResult, EntityRecord, Id};
use serde_json::Value;
use std::collections::HashMap;

use crate::auth::AuthUser;
use crate::error::Result;
use crate::handlers::{
    handle_bulk, handle_create, handle_delete, handle_get, handle_list, handle_update,
    DeleteResponse, ListQuery, ListResponse, ModeQuery,
};
use crate::AppState;

/// Create entity routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/{entity}", get(list_handler).post(create_handler))
        .route("/api/{entity}/bulk", post(bulk_handler))
        .route(
            "/api/{entity}/{id}",
            get(get_handler).put(update_handler).delete(delete_handler),
        )
}

/// GET /api/{entity} - List rows with paging and equality filters.
async fn list_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(entity): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<ListResponse>> {
    let query = ListQuery::parse(params)?;
    let response = handle_list(&state.stores, &entity, query).await?;
    Ok(Json(response))
}

/// POST /api/{entity} - Create a row in both stores.
async fn create_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(entity): Path<String>,
    Query(mode): Query<ModeQuery>,
    Json(body): Json<Value>,
) -> Result<Json<EntityRecord>> {
    let created = handle_create(&state.stores, &entity, body, mode.dual()).await?;
    Ok(Json(created))
}

/// POST /api/{entity}/bulk - Create or update many rows at once.
async fn bulk_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(entity): Path<String>,
    Query(mode): Query<ModeQuery>,
    Json(body): Json<Value>,
) -> Result<Json<BulkResult>> {
    let result = handle_bulk(&state.stores, &entity, body, mode.dual()).await?;
    Ok(Json(result))
}

/// GET /api/{entity}/{id} - Read one row.
async fn get_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path((entity, id)): Path<(String, Id)>,
    Query(mode): Query<ModeQuery>,
) -> Result<Json<EntityRecord>> {
    let record = handle_get(&state.stores, &entity, id, mode.dual()).await?;
    Ok(Json(record))
}

/// PUT /api/{entity}/{id} - Update a row in both stores.
async fn update_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path((entity, id)): Path<(String, Id)>,
    Query(mode): Query<ModeQuery>,
    Json(body): Json<Value>,
) -> Result<Json<Option<EntityRecord>>> {
    let updated = handle_update(&state.stores, &entity, id, body, mode.dual()).await?;
    Ok(Json(updated))
}

/// DELETE /api/{entity}/{id} - Delete a row from both stores.
async fn delete_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path((entity, id)): Path<(String, Id)>,
    Query(mode): Query<ModeQuery>,
) -> Result<Json<DeleteResponse>> {
    let response = handle_delete(&state.stores, &entity, id, mode.dual()).await?;
    Ok(Json(response))
}
