//! Nested tree synchronization.
//!
//! A tree is a root entity with any number of child collections, each of
//! which may have collections of its own. A client sends the whole desired
//! subtree; every level is reconciled against its parent with the rules of
//! [`crate::reconcile`], all inside one [`ReplicationTx`].
//!
//! Newly created children have no id until the store assigns one, so the
//! resolved row for a desired item is found by position: items with an id
//! map to the updated row of that id, id-less items map to the created rows
//! in input order. Bulk inserts preserve input order, which is what makes
//! this mapping sound.

use crate::error::{Error, Operation, Result};
use crate::reconcile::{apply_plan, plan_children, ChildSyncResult, ParentScope, SyncSummary};
use crate::registry::{EntityRegistry, Stores};
use crate::service::ReplicatedService;
use crate::store::Filter;
use crate::transaction::ReplicationTx;
use crate::{EntityName, EntityRecord, Id};
use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

/// A column stamped with the id of an ancestor above the direct parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AncestorKey {
    pub column: String,
    /// 1 is the parent's parent, 2 the one above that, and so on.
    pub levels_up: usize,
}

/// One child collection of a tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelSpec {
    /// Key of the collection in the parent's payload.
    pub collection: String,
    pub entity: EntityName,
    /// Column referencing the direct parent.
    pub foreign_key: String,
    pub ancestor_keys: Vec<AncestorKey>,
    /// Columns that must be null on this level's rows. Rows of the same
    /// table with a value there belong to another collection.
    pub null_keys: Vec<String>,
    pub children: Vec<LevelSpec>,
}

impl LevelSpec {
    pub fn new(
        collection: impl Into<String>,
        entity: impl Into<EntityName>,
        foreign_key: impl Into<String>,
    ) -> Self {
        Self {
            collection: collection.into(),
            entity: entity.into(),
            foreign_key: foreign_key.into(),
            ancestor_keys: Vec::new(),
            null_keys: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_child(mut self, child: LevelSpec) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_ancestor_key(mut self, column: impl Into<String>, levels_up: usize) -> Self {
        self.ancestor_keys.push(AncestorKey {
            column: column.into(),
            levels_up,
        });
        self
    }

    pub fn with_null_key(mut self, column: impl Into<String>) -> Self {
        self.null_keys.push(column.into());
        self
    }

    fn scope(&self, parent_id: Id) -> ParentScope<'_> {
        ParentScope::new(&self.foreign_key, parent_id).with_null_keys(&self.null_keys)
    }

    fn collect_entities<'a>(&'a self, out: &mut Vec<&'a str>) {
        out.push(&self.entity);
        for child in &self.children {
            child.collect_entities(out);
        }
    }
}

/// A root entity and its nested collections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeSpec {
    pub entity: EntityName,
    pub children: Vec<LevelSpec>,
}

impl TreeSpec {
    pub fn new(entity: impl Into<EntityName>) -> Self {
        Self {
            entity: entity.into(),
            children: Vec::new(),
        }
    }

    pub fn with_child(mut self, child: LevelSpec) -> Self {
        self.children.push(child);
        self
    }

    /// Every entity named by the tree, root first.
    pub fn entities(&self) -> Vec<&str> {
        let mut out = vec![self.entity.as_str()];
        for child in &self.children {
            child.collect_entities(&mut out);
        }
        out
    }

    /// Check that every entity of the tree is registered.
    pub fn validate(&self, registry: &EntityRegistry) -> Result<()> {
        for entity in self.entities() {
            registry.get(entity)?;
        }
        Ok(())
    }

    /// Parse a JSON array of root payloads.
    pub fn parse(&self, payload: Value) -> Result<Vec<DesiredNode>> {
        match payload {
            Value::Array(items) => items
                .into_iter()
                .map(|item| DesiredNode::from_json(item, &self.children))
                .collect(),
            other => Ok(vec![DesiredNode::from_json(other, &self.children)?]),
        }
    }
}

/// A desired record with its desired child collections.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DesiredNode {
    pub record: EntityRecord,
    /// Keyed by collection name. A collection missing here means "no
    /// children": existing ones are deleted.
    pub children: BTreeMap<String, Vec<DesiredNode>>,
}

impl DesiredNode {
    pub fn new(record: EntityRecord) -> Self {
        Self {
            record,
            children: BTreeMap::new(),
        }
    }

    pub fn with_children(mut self, collection: impl Into<String>, items: Vec<DesiredNode>) -> Self {
        self.children.insert(collection.into(), items);
        self
    }

    /// Split a JSON object into the record and its child collections, as
    /// laid out by `levels`.
    pub fn from_json(value: Value, levels: &[LevelSpec]) -> Result<Self> {
        let Value::Object(mut fields) = value else {
            return Err(Error::InvalidPayload(format!(
                "expected an object, got {}",
                value
            )));
        };

        let mut children = BTreeMap::new();
        for level in levels {
            let items = match fields.remove(&level.collection) {
                None | Some(Value::Null) => Vec::new(),
                Some(Value::Array(items)) => items
                    .into_iter()
                    .map(|item| DesiredNode::from_json(item, &level.children))
                    .collect::<Result<Vec<_>>>()?,
                Some(other) => {
                    return Err(Error::InvalidPayload(format!(
                        "'{}' must be an array, got {}",
                        level.collection, other
                    )))
                }
            };
            children.insert(level.collection.clone(), items);
        }

        Ok(Self {
            record: EntityRecord::parse(fields)?,
            children,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeOperation {
    Created,
    Updated,
}

/// A stored record and the outcome of its child collections.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncedNode {
    pub record: EntityRecord,
    pub operation: NodeOperation,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub children: BTreeMap<String, LevelOutcome>,
}

impl SyncedNode {
    /// Totals for this node's descendants.
    pub fn summary(&self) -> SyncSummary {
        let mut total = SyncSummary::default();
        for outcome in self.children.values() {
            total.add(outcome.total());
        }
        total
    }
}

/// Outcome of reconciling one collection under one parent.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelOutcome {
    pub nodes: Vec<SyncedNode>,
    pub deleted: Vec<Id>,
    /// Counts for this level only.
    pub summary: SyncSummary,
    /// Positions of desired items that could not be mapped to a stored row.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unresolved: Vec<usize>,
}

impl LevelOutcome {
    /// Counts for this level and every level below it.
    pub fn total(&self) -> SyncSummary {
        let mut total = self.summary;
        for node in &self.nodes {
            total.add(node.summary());
        }
        total
    }
}

/// Map each desired item to its resolved row.
///
/// `declared` holds the id of every desired item in input order. Items with
/// an id resolve to the updated row of that id (first occurrence only);
/// id-less items take the created rows in order.
pub fn map_resolved(
    declared: &[Option<Id>],
    result: &ChildSyncResult,
) -> Vec<Option<(EntityRecord, NodeOperation)>> {
    let updated: BTreeMap<Id, &EntityRecord> = result
        .updated
        .iter()
        .filter_map(|row| row.id.map(|id| (id, row)))
        .collect();
    let mut created = result.created.iter();
    let mut seen = HashSet::new();

    declared
        .iter()
        .map(|declared| match declared {
            Some(id) if seen.insert(*id) => updated
                .get(id)
                .map(|row| ((*row).clone(), NodeOperation::Updated)),
            Some(_) => None,
            None => created
                .next()
                .map(|row| (row.clone(), NodeOperation::Created)),
        })
        .collect()
}

/// Reconcile one collection under the last id of `ancestors`, then recurse
/// into the collections of every resolved item.
pub fn sync_level<'a>(
    tx: &'a mut ReplicationTx,
    stores: &'a Stores,
    level: &'a LevelSpec,
    ancestors: Vec<Id>,
    desired: Vec<DesiredNode>,
) -> BoxFuture<'a, Result<LevelOutcome>> {
    async move {
        let Some(&parent_id) = ancestors.last() else {
            return Err(Error::InvalidPayload(format!(
                "no parent for '{}'",
                level.collection
            )));
        };
        let pair = stores.pair(&level.entity)?;

        let mut records = Vec::with_capacity(desired.len());
        let mut declared = Vec::with_capacity(desired.len());
        let mut subtrees = Vec::with_capacity(desired.len());
        for node in desired {
            let mut record = node.record;
            for key in &level.ancestor_keys {
                let Some(ancestor) = ancestors
                    .len()
                    .checked_sub(key.levels_up + 1)
                    .map(|i| ancestors[i])
                else {
                    return Err(Error::InvalidPayload(format!(
                        "'{}' has no ancestor {} levels up for {}",
                        level.collection, key.levels_up, key.column
                    )));
                };
                record.insert(key.column.clone(), ancestor);
            }
            declared.push(record.id);
            records.push(record);
            subtrees.push(node.children);
        }

        let scope = level.scope(parent_id);
        let plan = plan_children(tx, &pair, &scope, records).await?;
        if !plan.to_delete.is_empty() {
            for child in &level.children {
                delete_descendants(tx, stores, child, plan.to_delete.clone()).await?;
            }
        }
        let result = apply_plan(tx, &pair, &scope, plan).await?;

        let mut outcome = LevelOutcome {
            deleted: result.deleted.clone(),
            summary: result.summary,
            ..LevelOutcome::default()
        };

        let resolved = map_resolved(&declared, &result);
        for (index, (resolved, mut children)) in resolved.into_iter().zip(subtrees).enumerate() {
            let Some((record, operation)) = resolved else {
                tracing::warn!(
                    "Item {} of '{}' under {}={} could not be mapped, skipping its children",
                    index,
                    level.collection,
                    level.foreign_key,
                    parent_id
                );
                outcome.unresolved.push(index);
                continue;
            };
            let Some(id) = record.id else {
                outcome.unresolved.push(index);
                continue;
            };

            let mut node = SyncedNode {
                record,
                operation,
                children: BTreeMap::new(),
            };
            for child in &level.children {
                let items = children.remove(&child.collection).unwrap_or_default();
                let mut chain = ancestors.clone();
                chain.push(id);
                let child_outcome = sync_level(tx, stores, child, chain, items).await?;
                node.children.insert(child.collection.clone(), child_outcome);
            }
            outcome.nodes.push(node);
        }

        Ok(outcome)
    }
    .boxed()
}

/// Delete the rows of `level` whose parent is in `parent_ids`, and all of
/// their descendants, deepest level first.
pub fn delete_descendants<'a>(
    tx: &'a mut ReplicationTx,
    stores: &'a Stores,
    level: &'a LevelSpec,
    parent_ids: Vec<Id>,
) -> BoxFuture<'a, Result<u64>> {
    async move {
        if parent_ids.is_empty() {
            return Ok(0);
        }
        let pair = stores.pair(&level.entity)?;
        let scope = level
            .null_keys
            .iter()
            .fold(Filter::all().is_in(level.foreign_key.clone(), parent_ids), |f, key| {
                f.eq(key.as_str(), Value::Null)
            });

        let mut deleted = 0;
        if !level.children.is_empty() {
            let ids: Vec<Id> = pair
                .primary
                .find_in(tx.primary(), &scope)
                .await?
                .into_iter()
                .filter_map(|row| row.id)
                .collect();
            for child in &level.children {
                deleted += delete_descendants(tx, stores, child, ids.clone()).await?;
            }
        }

        let removed = pair.primary.delete(tx.primary(), &scope).await?;
        if let Some(secondary) = tx.secondary() {
            pair.secondary.delete(secondary, &scope).await?;
        }
        if removed > 0 {
            tracing::debug!("Cascade deleted {} {} row(s)", removed, level.entity);
        }
        Ok(deleted + removed)
    }
    .boxed()
}

/// Create or update each root of `tree` and synchronize its collections.
pub async fn upsert_roots(
    tx: &mut ReplicationTx,
    stores: &Stores,
    tree: &TreeSpec,
    items: Vec<DesiredNode>,
) -> Result<Vec<SyncedNode>> {
    let service = ReplicatedService::new(&tree.entity, stores.clone())?;
    let mut out = Vec::with_capacity(items.len());

    for item in items {
        let DesiredNode {
            record,
            mut children,
        } = item;

        let (record, operation) = match record.id {
            Some(id) => {
                // Children are attached in Primary, so the root must exist there
                let row = service.update_in(tx, id, &record).await?.ok_or_else(|| {
                    Error::NotFound {
                        entity: tree.entity.to_string(),
                        id,
                    }
                })?;
                (row, NodeOperation::Updated)
            }
            None => (service.create_in(tx, record).await?, NodeOperation::Created),
        };
        let Some(root_id) = record.id else {
            return Err(Error::Store {
                store: crate::StoreRole::Primary,
                message: format!("{} was stored without an id", tree.entity),
            });
        };

        let mut node = SyncedNode {
            record,
            operation,
            children: BTreeMap::new(),
        };
        for level in &tree.children {
            let desired = children.remove(&level.collection).unwrap_or_default();
            let outcome = sync_level(tx, stores, level, vec![root_id], desired).await?;
            node.children.insert(level.collection.clone(), outcome);
        }
        out.push(node);
    }
    Ok(out)
}

/// Delete a root and every descendant, deepest level first.
pub async fn delete_tree(
    tx: &mut ReplicationTx,
    stores: &Stores,
    tree: &TreeSpec,
    id: Id,
) -> Result<u64> {
    let mut deleted = 0;
    for level in &tree.children {
        deleted += delete_descendants(tx, stores, level, vec![id]).await?;
    }
    let service = ReplicatedService::new(&tree.entity, stores.clone())?;
    service.delete_in(tx, id).await?;
    Ok(deleted + 1)
}

/// Runs tree operations, each under its own transaction pair.
#[derive(Clone)]
pub struct TreeSynchronizer {
    stores: Stores,
}

impl TreeSynchronizer {
    pub fn new(stores: Stores) -> Self {
        Self { stores }
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    /// Create or update the given roots and everything below them.
    pub async fn upsert(
        &self,
        tree: &TreeSpec,
        items: Vec<DesiredNode>,
        dual: bool,
    ) -> Result<Vec<SyncedNode>> {
        tree.validate(self.stores.registry())
            .map_err(|e| e.context(tree.entity.as_str(), Operation::SyncTree))?;
        let mut tx = ReplicationTx::begin(&self.stores, dual)
            .await
            .map_err(|e| e.context(tree.entity.as_str(), Operation::SyncTree))?;
        let outcome = upsert_roots(&mut tx, &self.stores, tree, items).await;
        let nodes = tx.finish(&tree.entity, Operation::SyncTree, outcome).await?;

        let mut total = SyncSummary::default();
        for node in &nodes {
            total.add(node.summary());
        }
        tracing::info!(
            "Synced {} {} tree(s): {} created, {} updated, {} deleted below the roots",
            nodes.len(),
            tree.entity,
            total.total_created,
            total.total_updated,
            total.total_deleted
        );
        Ok(nodes)
    }

    /// Reconcile one collection under an existing parent.
    pub async fn sync(
        &self,
        level: &LevelSpec,
        parent_id: Id,
        desired: Vec<DesiredNode>,
        dual: bool,
    ) -> Result<LevelOutcome> {
        let mut tx = ReplicationTx::begin(&self.stores, dual)
            .await
            .map_err(|e| e.context(level.entity.as_str(), Operation::SyncChildren))?;
        let outcome = sync_level(&mut tx, &self.stores, level, vec![parent_id], desired).await;
        let outcome = tx
            .finish(&level.entity, Operation::SyncChildren, outcome)
            .await?;
        let total = outcome.total();
        tracing::info!(
            "Synced '{}' of {}={}: {} created, {} updated, {} deleted",
            level.collection,
            level.foreign_key,
            parent_id,
            total.total_created,
            total.total_updated,
            total.total_deleted
        );
        Ok(outcome)
    }

    /// Reconcile one collection under a parent of `parent_entity`. The
    /// parent is read from Primary inside the same transaction pair and
    /// must exist there.
    pub async fn sync_under(
        &self,
        parent_entity: &str,
        level: &LevelSpec,
        parent_id: Id,
        desired: Vec<DesiredNode>,
        dual: bool,
    ) -> Result<LevelOutcome> {
        let parent = self
            .stores
            .accessor_for(parent_entity, crate::StoreRole::Primary)
            .map_err(|e| e.context(level.entity.as_str(), Operation::SyncChildren))?;
        let mut tx = ReplicationTx::begin(&self.stores, dual)
            .await
            .map_err(|e| e.context(level.entity.as_str(), Operation::SyncChildren))?;

        let outcome = match parent.find_by_id_in(tx.primary(), parent_id).await {
            Ok(Some(_)) => sync_level(&mut tx, &self.stores, level, vec![parent_id], desired).await,
            Ok(None) => Err(Error::NotFound {
                entity: parent_entity.to_string(),
                id: parent_id,
            }),
            Err(e) => Err(e),
        };
        let outcome = tx
            .finish(&level.entity, Operation::SyncChildren, outcome)
            .await?;
        let total = outcome.total();
        tracing::info!(
            "Synced '{}' of {} {}: {} created, {} updated, {} deleted",
            level.collection,
            parent_entity,
            parent_id,
            total.total_created,
            total.total_updated,
            total.total_deleted
        );
        Ok(outcome)
    }

    /// Delete a root and its whole subtree.
    pub async fn remove(&self, tree: &TreeSpec, id: Id, dual: bool) -> Result<u64> {
        let mut tx = ReplicationTx::begin(&self.stores, dual)
            .await
            .map_err(|e| e.context(tree.entity.as_str(), Operation::DeleteTree))?;
        let outcome = delete_tree(&mut tx, &self.stores, tree, id).await;
        let deleted = tx
            .finish(&tree.entity, Operation::DeleteTree, outcome)
            .await?;
        tracing::info!("Deleted {} id {} and {} row(s) in total", tree.entity, id, deleted);
        Ok(deleted)
    }
}
