//! HTTP route definitions.

mod entities;
mod health;
mod sync;
mod trees;

use crate::AppState;
use axum::Router;

/// Create all application routes.
pub fn create_routes() -> Router<AppState> {
    Router::new()
        .merge(health::routes())
        .merge(trees::routes())
        .merge(entities::routes())
        .merge(sync::routes())
}
