//! Drift checks and repair between the two stores.

use super::entities::lookup;
use crate::entities::ENTITIES;
use crate::error::Result;
use duplex_engine::{DriftDetector, EntityRecord, Id, RepairSummary, Stores, SyncReport};
use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckAllResponse {
    pub all_in_sync: bool,
    pub details: Vec<SyncReport>,
}

pub async fn handle_check_all(stores: &Stores) -> Result<CheckAllResponse> {
    let names: Vec<&str> = ENTITIES.iter().map(|info| info.name).collect();
    let details = DriftDetector::new(stores.clone())
        .check_all_sync(&names)
        .await?;
    Ok(CheckAllResponse {
        all_in_sync: details.iter().all(|report| report.is_sync),
        details,
    })
}

pub async fn handle_check(stores: &Stores, entity: &str) -> Result<SyncReport> {
    let info = lookup(entity)?;
    Ok(DriftDetector::new(stores.clone()).check_sync(info.name).await?)
}

/// Copy one primary row onto the secondary store.
pub async fn handle_repair_record(stores: &Stores, entity: &str, id: Id) -> Result<EntityRecord> {
    let info = lookup(entity)?;
    Ok(DriftDetector::new(stores.clone())
        .repair_record(info.name, id)
        .await?)
}

/// Copy every primary row of an entity onto the secondary store.
pub async fn handle_repair_all(stores: &Stores, entity: &str) -> Result<RepairSummary> {
    let info = lookup(entity)?;
    Ok(DriftDetector::new(stores.clone()).repair_all(info.name).await?)
}
