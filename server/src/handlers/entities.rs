//! Flat CRUD over any registered entity.

use crate::entities::{self, EntityInfo};
use crate::error::{AppError, Result};
use duplex_engine::{
    BulkResult, EntityRecord, Error as EngineError, Filter, Id, Page, ReplicatedService, Stores,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Default page size for list reads.
const DEFAULT_LIMIT: u64 = 100;

/// Maximum page size for list reads.
const MAX_LIMIT: u64 = 1000;

/// Query parameters shared by every write and single-row read.
#[derive(Debug, Default, Deserialize)]
pub struct ModeQuery {
    /// `false` restricts the call to the primary store
    pub dual: Option<bool>,
}

impl ModeQuery {
    pub fn dual(&self) -> bool {
        self.dual.unwrap_or(true)
    }
}

/// Parsed list query: mode, page, and equality filters on every other key.
#[derive(Debug, Clone, PartialEq)]
pub struct ListQuery {
    pub dual: bool,
    pub page: Page,
    pub filter: Filter,
}

impl ListQuery {
    /// Parse raw query parameters.
    ///
    /// Filter values are read as JSON scalars when they parse as one
    /// (`5`, `true`, `null`) and as strings otherwise.
    pub fn parse(params: HashMap<String, String>) -> Result<Self> {
        let mut dual = true;
        let mut limit = DEFAULT_LIMIT;
        let mut offset = 0;
        let mut filters: Vec<(String, Value)> = Vec::new();

        for (key, raw) in params {
            match key.as_str() {
                "dual" => dual = parse_param(&key, &raw)?,
                "limit" => limit = parse_param::<u64>(&key, &raw)?.clamp(1, MAX_LIMIT),
                "offset" => offset = parse_param(&key, &raw)?,
                _ => {
                    let value = match serde_json::from_str::<Value>(&raw) {
                        Ok(v) if !v.is_object() && !v.is_array() => v,
                        _ => Value::String(raw),
                    };
                    filters.push((key, value));
                }
            }
        }

        // Stable order so equal queries build equal statements
        filters.sort_by(|a, b| a.0.cmp(&b.0));
        let filter = filters
            .into_iter()
            .fold(Filter::all(), |filter, (key, value)| filter.eq(key, value));

        Ok(Self {
            dual,
            page: Page {
                limit: Some(limit),
                offset,
            },
            filter,
        })
    }
}

fn parse_param<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.parse()
        .map_err(|_| AppError::BadRequest(format!("invalid value '{}' for '{}'", raw, key)))
}

/// A page of rows with the total number of matches.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResponse {
    pub count: u64,
    pub rows: Vec<EntityRecord>,
    pub limit: u64,
    pub offset: u64,
    pub has_more: bool,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub id: Id,
    pub deleted: bool,
}

/// Resolve a URL key to a registered entity.
pub fn lookup(key: &str) -> Result<&'static EntityInfo> {
    entities::resolve(key).ok_or_else(|| EngineError::UnknownEntity(key.to_string()).into())
}

/// Turn a request body into a record. Only JSON objects are accepted.
pub fn record_from_body(body: Value) -> Result<EntityRecord> {
    match body {
        Value::Object(fields) => Ok(EntityRecord::parse(fields)?),
        other => Err(AppError::BadRequest(format!(
            "expected a JSON object, got {}",
            json_kind(&other)
        ))),
    }
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn service(stores: &Stores, key: &str) -> Result<ReplicatedService> {
    let info = lookup(key)?;
    Ok(ReplicatedService::new(info.name, stores.clone())?)
}

pub async fn handle_list(stores: &Stores, entity: &str, query: ListQuery) -> Result<ListResponse> {
    let service = service(stores, entity)?;
    let counted = service
        .find_and_count_all(&query.filter, query.page, query.dual)
        .await?;

    let limit = query.page.limit.unwrap_or(DEFAULT_LIMIT);
    let offset = query.page.offset;
    let has_more = offset + (counted.rows.len() as u64) < counted.count;
    Ok(ListResponse {
        count: counted.count,
        rows: counted.rows,
        limit,
        offset,
        has_more,
    })
}

pub async fn handle_get(stores: &Stores, entity: &str, id: Id, dual: bool) -> Result<EntityRecord> {
    let service = service(stores, entity)?;
    service
        .find_by_id(id, dual)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("{} with id {} not found", service.entity(), id)))
}

pub async fn handle_create(
    stores: &Stores,
    entity: &str,
    body: Value,
    dual: bool,
) -> Result<EntityRecord> {
    let service = service(stores, entity)?;
    let record = record_from_body(body)?;
    Ok(service.create(record, dual).await?)
}

/// `None` when only the secondary store had the row; the update is
/// committed there and the response body is `null`.
pub async fn handle_update(
    stores: &Stores,
    entity: &str,
    id: Id,
    body: Value,
    dual: bool,
) -> Result<Option<EntityRecord>> {
    let service = service(stores, entity)?;
    let record = record_from_body(body)?;
    Ok(service.update(id, record, dual).await?)
}

pub async fn handle_delete(
    stores: &Stores,
    entity: &str,
    id: Id,
    dual: bool,
) -> Result<DeleteResponse> {
    let service = service(stores, entity)?;
    let deleted = service.delete(id, dual).await?;
    Ok(DeleteResponse { id, deleted })
}

/// Create id-less items and update items that carry an id, in one
/// transaction pair.
pub async fn handle_bulk(
    stores: &Stores,
    entity: &str,
    body: Value,
    dual: bool,
) -> Result<BulkResult> {
    let service = service(stores, entity)?;
    let items = match body {
        Value::Array(items) => items,
        other => {
            return Err(AppError::BadRequest(format!(
                "expected a JSON array, got {}",
                json_kind(&other)
            )))
        }
    };
    let records = items
        .into_iter()
        .map(record_from_body)
        .collect::<Result<Vec<_>>>()?;
    Ok(service.bulk_create_or_update(records, dual).await?)
}
