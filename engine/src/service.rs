//! Replicated entity service.
//!
//! Generic create/update/delete/read for one entity, fanned out to one or
//! both stores. In dual mode every write runs under a [`ReplicationTx`]:
//! Primary first, so the identity it generates can be forced onto the
//! Secondary copy.

use crate::error::{Error, Operation, Result};
use crate::registry::{AccessorPair, Stores};
use crate::store::{Filter, Page};
use crate::transaction::ReplicationTx;
use crate::{EntityRecord, Id};
use serde::Serialize;

/// Result of a bulk create-or-update.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkResult {
    pub created: Vec<EntityRecord>,
    pub updated: Vec<EntityRecord>,
    pub summary: BulkSummary,
}

/// Counts of a bulk create-or-update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkSummary {
    pub total_created: usize,
    pub total_updated: usize,
    /// Created plus updated.
    pub total: usize,
}

/// A page of rows plus the total matching count.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CountedRows {
    pub count: u64,
    pub rows: Vec<EntityRecord>,
}

/// Replicated CRUD for a single entity.
#[derive(Clone)]
pub struct ReplicatedService {
    stores: Stores,
    pair: AccessorPair,
}

impl ReplicatedService {
    pub fn new(entity: &str, stores: Stores) -> Result<Self> {
        let pair = stores.pair(entity)?;
        Ok(Self { stores, pair })
    }

    pub fn entity(&self) -> &str {
        self.pair.entity()
    }

    pub fn accessors(&self) -> &AccessorPair {
        &self.pair
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    /// Open a transaction pair for this service's stores.
    pub async fn begin(&self, dual: bool) -> Result<ReplicationTx> {
        ReplicationTx::begin(&self.stores, dual).await
    }

    async fn open(&self, dual: bool, operation: Operation) -> Result<ReplicationTx> {
        self.begin(dual)
            .await
            .map_err(|e| e.context(self.entity(), operation))
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Create a record in Primary and, in dual mode, the same record with
    /// the same id in Secondary.
    pub async fn create(&self, data: EntityRecord, dual: bool) -> Result<EntityRecord> {
        let mut tx = self.open(dual, Operation::Create).await?;
        let outcome = self.create_in(&mut tx, data).await;
        let created = tx.finish(self.entity(), Operation::Create, outcome).await?;
        tracing::info!(
            "Created {} with id {:?} ({})",
            self.entity(),
            created.id,
            mode(dual)
        );
        Ok(created)
    }

    /// Update a record by id. Fails with `NotFound` when no targeted store
    /// has the row.
    ///
    /// Returns the updated Primary row, or `None` when only Secondary had
    /// the row. That change is committed all the same.
    pub async fn update(
        &self,
        id: Id,
        data: EntityRecord,
        dual: bool,
    ) -> Result<Option<EntityRecord>> {
        let mut tx = self.open(dual, Operation::Update).await?;
        let outcome = self.update_in(&mut tx, id, &data).await;
        let updated = tx.finish(self.entity(), Operation::Update, outcome).await?;
        match &updated {
            Some(_) => tracing::info!("Updated {} id {} ({})", self.entity(), id, mode(dual)),
            None => tracing::warn!(
                "Updated {} id {} in secondary only, primary has no such row",
                self.entity(),
                id
            ),
        }
        Ok(updated)
    }

    /// Delete a record by id. Fails with `NotFound` when no targeted store
    /// had the row.
    pub async fn delete(&self, id: Id, dual: bool) -> Result<bool> {
        let mut tx = self.open(dual, Operation::Delete).await?;
        let outcome = self.delete_in(&mut tx, id).await;
        tx.finish(self.entity(), Operation::Delete, outcome).await?;
        tracing::info!("Deleted {} id {} ({})", self.entity(), id, mode(dual));
        Ok(true)
    }

    /// Create many records; the Secondary copies carry Primary's ids.
    pub async fn bulk_create(
        &self,
        items: Vec<EntityRecord>,
        dual: bool,
    ) -> Result<Vec<EntityRecord>> {
        let mut tx = self.open(dual, Operation::BulkCreate).await?;
        let outcome = self.bulk_create_in(&mut tx, &items).await;
        let created = tx
            .finish(self.entity(), Operation::BulkCreate, outcome)
            .await?;
        tracing::info!(
            "Bulk created {} {} record(s) ({})",
            created.len(),
            self.entity(),
            mode(dual)
        );
        Ok(created)
    }

    /// Create items without an id and update items with one.
    pub async fn bulk_create_or_update(
        &self,
        items: Vec<EntityRecord>,
        dual: bool,
    ) -> Result<BulkResult> {
        let mut tx = self.open(dual, Operation::BulkCreateOrUpdate).await?;
        let outcome = self.bulk_create_or_update_in(&mut tx, items).await;
        let result = tx
            .finish(self.entity(), Operation::BulkCreateOrUpdate, outcome)
            .await?;
        tracing::info!(
            "Bulk create/update of {}: {} created, {} updated ({})",
            self.entity(),
            result.summary.total_created,
            result.summary.total_updated,
            mode(dual)
        );
        Ok(result)
    }

    // ------------------------------------------------------------------
    // Transactional building blocks
    // ------------------------------------------------------------------

    /// Create inside a caller-owned transaction pair.
    pub async fn create_in(
        &self,
        tx: &mut ReplicationTx,
        data: EntityRecord,
    ) -> Result<EntityRecord> {
        let mut data = data;
        data.id = None;

        let created = self.pair.primary.create(tx.primary(), &data).await?;
        tracing::debug!(
            "Created {} in primary with id {:?}",
            self.entity(),
            created.id
        );

        if let Some(secondary) = tx.secondary() {
            let mirrored = EntityRecord {
                id: created.id,
                fields: data.fields,
            };
            self.pair.secondary.create(secondary, &mirrored).await?;
            tracing::debug!(
                "Created {} in secondary with id {:?}",
                self.entity(),
                created.id
            );
        }
        Ok(created)
    }

    /// Update by id inside a caller-owned transaction pair and return the
    /// Primary row as seen by the transaction.
    pub async fn update_in(
        &self,
        tx: &mut ReplicationTx,
        id: Id,
        data: &EntityRecord,
    ) -> Result<Option<EntityRecord>> {
        let filter = Filter::by_id(id);
        let affected_primary = self
            .pair
            .primary
            .update(tx.primary(), &filter, &data.fields)
            .await?;
        tracing::debug!(
            "Updated {} row(s) of {} in primary",
            affected_primary,
            self.entity()
        );

        let mut affected_secondary = 0;
        if let Some(secondary) = tx.secondary() {
            affected_secondary = self
                .pair
                .secondary
                .update(secondary, &filter, &data.fields)
                .await?;
            tracing::debug!(
                "Updated {} row(s) of {} in secondary",
                affected_secondary,
                self.entity()
            );
        }

        if affected_primary == 0 && affected_secondary == 0 {
            return Err(Error::NotFound {
                entity: self.entity().to_string(),
                id,
            });
        }
        self.pair.primary.find_by_id_in(tx.primary(), id).await
    }

    /// Delete by id inside a caller-owned transaction pair.
    pub async fn delete_in(&self, tx: &mut ReplicationTx, id: Id) -> Result<()> {
        let filter = Filter::by_id(id);
        let deleted_primary = self.pair.primary.delete(tx.primary(), &filter).await?;
        tracing::debug!(
            "Deleted {} row(s) of {} from primary",
            deleted_primary,
            self.entity()
        );

        let mut deleted_secondary = 0;
        if let Some(secondary) = tx.secondary() {
            deleted_secondary = self.pair.secondary.delete(secondary, &filter).await?;
            tracing::debug!(
                "Deleted {} row(s) of {} from secondary",
                deleted_secondary,
                self.entity()
            );
        }

        if deleted_primary == 0 && deleted_secondary == 0 {
            return Err(Error::NotFound {
                entity: self.entity().to_string(),
                id,
            });
        }
        Ok(())
    }

    pub async fn bulk_create_in(
        &self,
        tx: &mut ReplicationTx,
        items: &[EntityRecord],
    ) -> Result<Vec<EntityRecord>> {
        let items: Vec<EntityRecord> = items
            .iter()
            .map(|item| EntityRecord {
                id: None,
                fields: item.fields.clone(),
            })
            .collect();
        mirrored_bulk_create(&self.pair, tx, &items).await
    }

    pub async fn bulk_create_or_update_in(
        &self,
        tx: &mut ReplicationTx,
        items: Vec<EntityRecord>,
    ) -> Result<BulkResult> {
        let (to_update, to_create): (Vec<_>, Vec<_>) =
            items.into_iter().partition(|i| i.is_persisted());
        tracing::debug!(
            "Bulk operation on {}: {} to create, {} to update",
            self.entity(),
            to_create.len(),
            to_update.len()
        );

        let created = mirrored_bulk_create(&self.pair, tx, &to_create).await?;

        let mut updated = Vec::with_capacity(to_update.len());
        for item in &to_update {
            let Some(id) = item.id else { continue };
            let filter = Filter::by_id(id);
            self.pair
                .primary
                .update(tx.primary(), &filter, &item.fields)
                .await?;
            if let Some(secondary) = tx.secondary() {
                self.pair
                    .secondary
                    .update(secondary, &filter, &item.fields)
                    .await?;
            }
            if let Some(row) = self.pair.primary.find_by_id_in(tx.primary(), id).await? {
                updated.push(row);
            }
        }

        let summary = BulkSummary {
            total_created: created.len(),
            total_updated: updated.len(),
            total: created.len() + updated.len(),
        };
        Ok(BulkResult {
            created,
            updated,
            summary,
        })
    }

    // ------------------------------------------------------------------
    // Reads: single store, no transaction. `dual` selects Primary.
    // ------------------------------------------------------------------

    pub async fn find_all(&self, filter: &Filter, dual: bool) -> Result<Vec<EntityRecord>> {
        let accessor = self.pair.for_read(dual);
        let rows = accessor
            .find(filter, Page::default())
            .await
            .map_err(|e| e.context(self.entity(), Operation::Read))?;
        tracing::debug!(
            "Found {} {}(s) in {}",
            rows.len(),
            self.entity(),
            accessor.role()
        );
        Ok(rows)
    }

    pub async fn find_and_count_all(
        &self,
        filter: &Filter,
        page: Page,
        dual: bool,
    ) -> Result<CountedRows> {
        let accessor = self.pair.for_read(dual);
        let count = accessor
            .count(filter)
            .await
            .map_err(|e| e.context(self.entity(), Operation::Read))?;
        let rows = accessor
            .find(filter, page)
            .await
            .map_err(|e| e.context(self.entity(), Operation::Read))?;
        Ok(CountedRows { count, rows })
    }

    pub async fn find_by_id(&self, id: Id, dual: bool) -> Result<Option<EntityRecord>> {
        let found = self.find_one(&Filter::by_id(id), dual).await?;
        if found.is_none() {
            tracing::debug!(
                "{} with id {} not found in {}",
                self.entity(),
                id,
                self.pair.for_read(dual).role()
            );
        }
        Ok(found)
    }

    pub async fn find_one(&self, filter: &Filter, dual: bool) -> Result<Option<EntityRecord>> {
        let page = Page {
            limit: Some(1),
            offset: 0,
        };
        let rows = self
            .pair
            .for_read(dual)
            .find(filter, page)
            .await
            .map_err(|e| e.context(self.entity(), Operation::Read))?;
        Ok(rows.into_iter().next())
    }

    pub async fn count(&self, filter: &Filter, dual: bool) -> Result<u64> {
        self.pair
            .for_read(dual)
            .count(filter)
            .await
            .map_err(|e| e.context(self.entity(), Operation::Read))
    }
}

/// Insert `items` into Primary, then the same items carrying Primary's ids
/// into Secondary. The returned Primary rows are in input order.
pub(crate) async fn mirrored_bulk_create(
    pair: &AccessorPair,
    tx: &mut ReplicationTx,
    items: &[EntityRecord],
) -> Result<Vec<EntityRecord>> {
    if items.is_empty() {
        return Ok(Vec::new());
    }

    let created = pair.primary.bulk_create(tx.primary(), items).await?;
    tracing::debug!(
        "Created {} {} record(s) in primary",
        created.len(),
        pair.entity()
    );

    if let Some(secondary) = tx.secondary() {
        let with_ids: Vec<EntityRecord> = created
            .iter()
            .zip(items)
            .map(|(row, item)| EntityRecord {
                id: row.id,
                fields: item.fields.clone(),
            })
            .collect();
        pair.secondary.bulk_create(secondary, &with_ids).await?;
        tracing::debug!(
            "Created {} {} record(s) in secondary",
            with_ids.len(),
            pair.entity()
        );
    }
    Ok(created)
}

fn mode(dual: bool) -> &'static str {
    if dual {
        "both stores"
    } else {
        "primary only"
    }
}
