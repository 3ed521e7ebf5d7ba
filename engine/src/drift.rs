//! Drift detection and repair.
//!
//! Advisory tooling for out-of-band maintenance. Checks read both stores
//! without a transaction. Repairs copy Primary rows onto Secondary and
//! never touch Primary.

use crate::error::{Error, Operation, Result};
use crate::registry::Stores;
use crate::store::{Filter, Page};
use crate::{EntityName, EntityRecord, Id};
use serde::Serialize;
use std::collections::BTreeSet;

/// Per-entity comparison of the two stores.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub entity: EntityName,
    pub primary_count: usize,
    pub secondary_count: usize,
    pub only_in_primary: Vec<EntityRecord>,
    pub only_in_secondary: Vec<EntityRecord>,
    pub is_sync: bool,
}

impl SyncReport {
    /// Compare the rows of one entity read from each store.
    pub fn compare(
        entity: impl Into<EntityName>,
        primary: Vec<EntityRecord>,
        secondary: Vec<EntityRecord>,
    ) -> Self {
        let primary_ids: BTreeSet<Id> = primary.iter().filter_map(|r| r.id).collect();
        let secondary_ids: BTreeSet<Id> = secondary.iter().filter_map(|r| r.id).collect();
        let primary_count = primary.len();
        let secondary_count = secondary.len();

        let only_in_primary: Vec<EntityRecord> = primary
            .into_iter()
            .filter(|r| r.id.map_or(true, |id| !secondary_ids.contains(&id)))
            .collect();
        let only_in_secondary: Vec<EntityRecord> = secondary
            .into_iter()
            .filter(|r| r.id.map_or(true, |id| !primary_ids.contains(&id)))
            .collect();

        let is_sync = primary_count == secondary_count
            && only_in_primary.is_empty()
            && only_in_secondary.is_empty();

        Self {
            entity: entity.into(),
            primary_count,
            secondary_count,
            only_in_primary,
            only_in_secondary,
            is_sync,
        }
    }
}

/// Aggregate outcome of a bulk repair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RepairSummary {
    pub synced: usize,
    pub failed: usize,
}

pub struct DriftDetector {
    stores: Stores,
}

impl DriftDetector {
    pub fn new(stores: Stores) -> Self {
        Self { stores }
    }

    pub async fn check_sync(&self, entity: &str) -> Result<SyncReport> {
        let pair = self.stores.pair(entity)?;
        let primary = pair
            .primary
            .find(&Filter::all(), Page::default())
            .await
            .map_err(|e| e.context(entity, Operation::Read))?;
        let secondary = pair
            .secondary
            .find(&Filter::all(), Page::default())
            .await
            .map_err(|e| e.context(entity, Operation::Read))?;

        let report = SyncReport::compare(pair.entity(), primary, secondary);
        if report.is_sync {
            tracing::debug!("{} is in sync ({} rows)", entity, report.primary_count);
        } else {
            tracing::warn!(
                "{} drifted: {} rows in primary, {} in secondary, {} only in primary, \
                 {} only in secondary",
                entity,
                report.primary_count,
                report.secondary_count,
                report.only_in_primary.len(),
                report.only_in_secondary.len()
            );
        }
        Ok(report)
    }

    /// Check several entities. Stops at the first entity that cannot be read.
    pub async fn check_all_sync<S: AsRef<str>>(&self, entities: &[S]) -> Result<Vec<SyncReport>> {
        let mut reports = Vec::with_capacity(entities.len());
        for entity in entities {
            reports.push(self.check_sync(entity.as_ref()).await?);
        }
        let drifting = reports.iter().filter(|r| !r.is_sync).count();
        tracing::info!(
            "Checked {} entities, {} drifting",
            reports.len(),
            drifting
        );
        Ok(reports)
    }

    /// Copy the Primary row `id` onto Secondary, inserting it when absent
    /// and overwriting it otherwise.
    pub async fn repair_record(&self, entity: &str, id: Id) -> Result<EntityRecord> {
        let pair = self.stores.pair(entity)?;
        let source = pair
            .primary
            .find(&Filter::by_id(id), Page::default())
            .await
            .map_err(|e| e.context(entity, Operation::Repair))?
            .into_iter()
            .next()
            .ok_or_else(|| {
                Error::NotFound {
                    entity: entity.to_string(),
                    id,
                }
                .context(entity, Operation::Repair)
            })?;

        let mut tx = self
            .stores
            .secondary()
            .begin()
            .await
            .map_err(|e| e.context(entity, Operation::Repair))?;

        let outcome = async {
            let existing = pair.secondary.find_by_id_in(tx.as_mut(), id).await?;
            match existing {
                Some(_) => {
                    pair.secondary
                        .update(tx.as_mut(), &Filter::by_id(id), &source.fields)
                        .await?;
                }
                None => {
                    pair.secondary.create(tx.as_mut(), &source).await?;
                }
            }
            Ok::<(), Error>(())
        }
        .await;

        match outcome {
            Ok(()) => {
                tx.commit()
                    .await
                    .map_err(crate::registry::tag(crate::StoreRole::Secondary))
                    .map_err(|e| e.context(entity, Operation::Repair))?;
                tracing::info!("Repaired {} id {} in secondary", entity, id);
                Ok(source)
            }
            Err(e) => {
                if let Err(rb) = tx.rollback().await {
                    tracing::error!("Rollback of secondary transaction failed: {}", rb);
                }
                Err(e.context(entity, Operation::Repair))
            }
        }
    }

    /// Repair every Primary row of `entity`, continuing past failures.
    pub async fn repair_all(&self, entity: &str) -> Result<RepairSummary> {
        let pair = self.stores.pair(entity)?;
        let rows = pair
            .primary
            .find(&Filter::all(), Page::default())
            .await
            .map_err(|e| e.context(entity, Operation::Repair))?;

        let mut summary = RepairSummary::default();
        for id in rows.iter().filter_map(|r| r.id) {
            match self.repair_record(entity, id).await {
                Ok(_) => summary.synced += 1,
                Err(e) => {
                    tracing::warn!("Repair of {} id {} failed: {}", entity, id, e);
                    summary.failed += 1;
                }
            }
        }
        tracing::info!(
            "Repair of {}: {} synced, {} failed",
            entity,
            summary.synced,
            summary.failed
        );
        Ok(summary)
    }
}
