//! Reconciliation of one parent's children.
//!
//! Given the children a client wants a parent to have, make both stores
//! match it. Identity decides everything:
//!
//! 1. Read the parent's existing children from Primary
//! 2. Desired items without an id are created, items with an id are updated
//! 3. Existing children whose id is not desired are deleted
//! 4. Delete, then create (Primary first, ids forced onto Secondary), then update
//!
//! Deletes run first so a client may remove a row and re-add an equivalent
//! one in the same call without tripping unique constraints.
//!
//! Everything runs inside the caller's [`ReplicationTx`]; nothing here
//! commits or rolls back.

use crate::error::Result;
use crate::registry::AccessorPair;
use crate::service::mirrored_bulk_create;
use crate::store::Filter;
use crate::transaction::ReplicationTx;
use crate::{EntityRecord, Id};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeSet, HashSet};

/// Counts of what a reconciliation did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSummary {
    pub total_created: usize,
    pub total_updated: usize,
    pub total_deleted: usize,
}

impl SyncSummary {
    pub fn add(&mut self, other: SyncSummary) {
        self.total_created += other.total_created;
        self.total_updated += other.total_updated;
        self.total_deleted += other.total_deleted;
    }
}

/// The create/update/delete sets for one parent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconciliationPlan {
    /// Desired items without an id, in input order.
    pub to_create: Vec<EntityRecord>,
    /// Desired items with an id, in input order, one per id.
    pub to_update: Vec<EntityRecord>,
    /// Existing ids that are not desired any more.
    pub to_delete: Vec<Id>,
}

impl ReconciliationPlan {
    /// Diff `desired` against the ids that currently exist.
    ///
    /// If the same id is desired twice, the first occurrence wins.
    pub fn build(existing_ids: &[Id], desired: Vec<EntityRecord>) -> Self {
        let mut to_create = Vec::new();
        let mut to_update = Vec::new();
        let mut keep = HashSet::new();

        for item in desired {
            match item.id {
                None => to_create.push(item),
                Some(id) => {
                    if keep.insert(id) {
                        to_update.push(item);
                    } else {
                        tracing::warn!("Ignoring duplicate desired item with id {}", id);
                    }
                }
            }
        }

        let mut seen = HashSet::new();
        let to_delete = existing_ids
            .iter()
            .copied()
            .filter(|id| !keep.contains(id) && seen.insert(*id))
            .collect();

        Self {
            to_create,
            to_update,
            to_delete,
        }
    }

    /// Ids of the items that will be kept and updated.
    pub fn keep_ids(&self) -> BTreeSet<Id> {
        self.to_update.iter().filter_map(|i| i.id).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty()
    }
}

/// Outcome of reconciling one parent's children.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildSyncResult {
    /// Rows created, in the input order of the id-less desired items.
    pub created: Vec<EntityRecord>,
    /// Rows updated, re-read from Primary.
    pub updated: Vec<EntityRecord>,
    pub deleted: Vec<Id>,
    pub summary: SyncSummary,
}

/// The rows that count as children of one parent.
///
/// Normally `foreign_key = parent_id`. Columns in `null_keys` must also be
/// null, which lets two collections share a table without deleting each
/// other's rows by absence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParentScope<'a> {
    pub foreign_key: &'a str,
    pub parent_id: Id,
    pub null_keys: &'a [String],
}

impl<'a> ParentScope<'a> {
    pub fn new(foreign_key: &'a str, parent_id: Id) -> Self {
        Self {
            foreign_key,
            parent_id,
            null_keys: &[],
        }
    }

    pub fn with_null_keys(mut self, null_keys: &'a [String]) -> Self {
        self.null_keys = null_keys;
        self
    }

    /// Conditions selecting the parent's children.
    pub fn filter(&self) -> Filter {
        self.narrow(Filter::all())
    }

    /// Add the scope's conditions to `filter`.
    pub fn narrow(&self, filter: Filter) -> Filter {
        let filter = filter.eq(self.foreign_key, self.parent_id);
        self.null_keys
            .iter()
            .fold(filter, |f, key| f.eq(key.as_str(), Value::Null))
    }

    /// Stamp the parent id, and clear the null keys, on a desired row.
    fn stamp(&self, item: EntityRecord) -> EntityRecord {
        let item = item.set(self.foreign_key, self.parent_id);
        self.null_keys
            .iter()
            .fold(item, |item, key| item.set(key.as_str(), Value::Null))
    }
}

/// Make the children of `parent_id` match `desired` in every targeted store.
pub async fn sync_children(
    tx: &mut ReplicationTx,
    pair: &AccessorPair,
    foreign_key: &str,
    parent_id: Id,
    desired: Vec<EntityRecord>,
) -> Result<ChildSyncResult> {
    let scope = ParentScope::new(foreign_key, parent_id);
    let plan = plan_children(tx, pair, &scope, desired).await?;
    apply_plan(tx, pair, &scope, plan).await
}

/// Read the existing children in `scope` from Primary and diff them
/// against `desired`.
pub async fn plan_children(
    tx: &mut ReplicationTx,
    pair: &AccessorPair,
    scope: &ParentScope<'_>,
    desired: Vec<EntityRecord>,
) -> Result<ReconciliationPlan> {
    let existing = pair.primary.find_in(tx.primary(), &scope.filter()).await?;
    let existing_ids: Vec<Id> = existing.iter().filter_map(|r| r.id).collect();

    let plan = ReconciliationPlan::build(&existing_ids, desired);
    tracing::debug!(
        "Sync of {} for {}={}: {} to create, {} to update, {} to delete",
        pair.entity(),
        scope.foreign_key,
        scope.parent_id,
        plan.to_create.len(),
        plan.to_update.len(),
        plan.to_delete.len()
    );
    Ok(plan)
}

/// Execute a plan inside `scope`: delete, create, update.
pub async fn apply_plan(
    tx: &mut ReplicationTx,
    pair: &AccessorPair,
    scope: &ParentScope<'_>,
    plan: ReconciliationPlan,
) -> Result<ChildSyncResult> {
    let mut result = ChildSyncResult::default();

    if !plan.to_delete.is_empty() {
        let doomed =
            scope.narrow(Filter::all().is_in(crate::ID_FIELD, plan.to_delete.iter().copied()));
        let deleted_primary = pair.primary.delete(tx.primary(), &doomed).await?;
        tracing::debug!(
            "Deleted {} {} row(s) from primary",
            deleted_primary,
            pair.entity()
        );
        if let Some(secondary) = tx.secondary() {
            let deleted_secondary = pair.secondary.delete(secondary, &doomed).await?;
            tracing::debug!(
                "Deleted {} {} row(s) from secondary",
                deleted_secondary,
                pair.entity()
            );
        }
        result.deleted = plan.to_delete;
    }

    if !plan.to_create.is_empty() {
        let stamped: Vec<EntityRecord> = plan
            .to_create
            .into_iter()
            .map(|item| scope.stamp(item))
            .collect();
        result.created = mirrored_bulk_create(pair, tx, &stamped).await?;
    }

    for item in plan.to_update {
        let Some(id) = item.id else { continue };
        let item = scope.stamp(item);
        let target = scope.narrow(Filter::by_id(id));

        pair.primary.update(tx.primary(), &target, &item.fields).await?;
        if let Some(secondary) = tx.secondary() {
            pair.secondary.update(secondary, &target, &item.fields).await?;
        }
        let reread = pair.primary.find_in(tx.primary(), &target).await?;
        match reread.into_iter().next() {
            Some(row) => result.updated.push(row),
            None => tracing::warn!(
                "{} id {} is not a child of {}={}, skipped",
                pair.entity(),
                id,
                scope.foreign_key,
                scope.parent_id
            ),
        }
    }

    result.summary = SyncSummary {
        total_created: result.created.len(),
        total_updated: result.updated.len(),
        total_deleted: result.deleted.len(),
    };
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(v: serde_json::Value) -> EntityRecord {
        EntityRecord::from(v)
    }

    #[test]
    fn plan_partitions_by_identity() {
        let desired = vec![
            item(json!({"id": 10, "name": "a2"})),
            item(json!({"name": "c"})),
        ];
        let plan = ReconciliationPlan::build(&[10, 11], desired);

        assert_eq!(plan.to_create.len(), 1);
        assert_eq!(plan.to_update.len(), 1);
        assert_eq!(plan.to_update[0].id, Some(10));
        assert_eq!(plan.to_delete, vec![11]);
    }

    #[test]
    fn empty_desired_deletes_everything() {
        let plan = ReconciliationPlan::build(&[1, 2, 3], vec![]);
        assert_eq!(plan.to_delete, vec![1, 2, 3]);
        assert!(plan.to_create.is_empty());
        assert!(plan.to_update.is_empty());
    }

    #[test]
    fn duplicate_desired_ids_are_collapsed() {
        let desired = vec![
            item(json!({"id": 1, "v": "first"})),
            item(json!({"id": 1, "v": "second"})),
        ];
        let plan = ReconciliationPlan::build(&[1], desired);
        assert_eq!(plan.to_update.len(), 1);
        assert_eq!(plan.to_update[0].get("v"), Some(&json!("first")));
        assert!(plan.to_delete.is_empty());
    }

    #[test]
    fn keep_ids_and_emptiness() {
        let plan = ReconciliationPlan::build(&[], vec![]);
        assert!(plan.is_empty());

        let plan = ReconciliationPlan::build(&[4], vec![item(json!({"id": 4}))]);
        assert_eq!(plan.keep_ids().into_iter().collect::<Vec<_>>(), vec![4]);
        assert!(!plan.is_empty());
    }

    #[test]
    fn scope_requires_null_keys() {
        let null_keys = vec!["id_point".to_string()];
        let scope = ParentScope::new("id_clause", 4).with_null_keys(&null_keys);
        let filter = scope.filter();

        let own = item(json!({"id": 1, "id_clause": 4})).to_map();
        let pointed = item(json!({"id": 2, "id_clause": 4, "id_point": 9})).to_map();
        let explicit_null = item(json!({"id": 3, "id_clause": 4, "id_point": null})).to_map();
        assert!(filter.matches(&own));
        assert!(!filter.matches(&pointed));
        assert!(filter.matches(&explicit_null));

        let stamped = scope.stamp(item(json!({"note": "n", "id_point": 9})));
        assert_eq!(stamped.get("id_clause"), Some(&json!(4)));
        assert_eq!(stamped.get("id_point"), Some(&Value::Null));
    }

    #[test]
    fn summary_accumulates() {
        let mut total = SyncSummary::default();
        total.add(SyncSummary {
            total_created: 1,
            total_updated: 2,
            total_deleted: 3,
        });
        total.add(SyncSummary {
            total_created: 1,
            total_updated: 0,
            total_deleted: 0,
        });
        assert_eq!(total.total_created, 2);
        assert_eq!(total.total_updated, 2);
        assert_eq!(total.total_deleted, 3);
    }
}
