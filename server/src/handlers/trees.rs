//! Nested upserts, collection syncs and cascade deletes.

use super::entities::json_kind;
use crate::entities;
use crate::error::{AppError, Result};
use duplex_engine::{
    DesiredNode, Id, LevelOutcome, LevelSpec, Stores, SyncedNode, TreeSpec, TreeSynchronizer,
};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Serialize)]
pub struct TreeDeleteResponse {
    pub id: Id,
    /// Rows removed from the primary store, root included
    pub deleted: u64,
}

fn layout(name: &str) -> Result<TreeSpec> {
    entities::tree(name).ok_or_else(|| {
        AppError::NotFound(format!(
            "unknown tree '{}', expected one of: {}",
            name,
            entities::TREES.join(", ")
        ))
    })
}

fn level(tree: &TreeSpec, name: &str, collection: &str) -> Result<LevelSpec> {
    entities::collection(tree, collection).ok_or_else(|| {
        AppError::NotFound(format!(
            "tree '{}' has no collection '{}'",
            name, collection
        ))
    })
}

/// Create or update one or more roots together with their collections.
pub async fn handle_upsert_tree(
    stores: &Stores,
    name: &str,
    body: Value,
    dual: bool,
) -> Result<Vec<SyncedNode>> {
    let tree = layout(name)?;
    let items = tree.parse(body)?;
    let synchronizer = TreeSynchronizer::new(stores.clone());
    Ok(synchronizer.upsert(&tree, items, dual).await?)
}

/// Reconcile one top-level collection of an existing root.
pub async fn handle_sync_collection(
    stores: &Stores,
    name: &str,
    id: Id,
    collection: &str,
    body: Value,
    dual: bool,
) -> Result<LevelOutcome> {
    let tree = layout(name)?;
    let level = level(&tree, name, collection)?;
    let items = match body {
        Value::Array(items) => items,
        other => {
            return Err(AppError::BadRequest(format!(
                "expected a JSON array, got {}",
                json_kind(&other)
            )))
        }
    };
    let desired = items
        .into_iter()
        .map(|item| DesiredNode::from_json(item, &level.children))
        .collect::<duplex_engine::Result<Vec<_>>>()?;

    let synchronizer = TreeSynchronizer::new(stores.clone());
    Ok(synchronizer
        .sync_under(&tree.entity, &level, id, desired, dual)
        .await?)
}

/// Delete a root and everything below it.
pub async fn handle_delete_tree(
    stores: &Stores,
    name: &str,
    id: Id,
    dual: bool,
) -> Result<TreeDeleteResponse> {
    let tree = layout(name)?;
    let synchronizer = TreeSynchronizer::new(stores.clone());
    let deleted = synchronizer.remove(&tree, id, dual).await?;
    Ok(TreeDeleteResponse { id, deleted })
}
