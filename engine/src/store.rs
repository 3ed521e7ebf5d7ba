//! Store abstraction.
//!
//! A [`Store`] is one physical relational database. Writes go through a
//! [`StoreTx`] opened with [`Store::begin`]; reads that need no isolation
//! can go straight to the store.

use crate::{EntityRecord, Id, ID_FIELD};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

/// Which of the two stores a handle or error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreRole {
    Primary,
    Secondary,
}

impl fmt::Display for StoreRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreRole::Primary => f.write_str("primary"),
            StoreRole::Secondary => f.write_str("secondary"),
        }
    }
}

/// Backend-level failure, before it is tagged with a store role.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A constraint rejected the write.
    #[error("constraint violation: {0}")]
    Constraint(String),
    #[error("backend error: {0}")]
    Backend(String),
}

/// A single column condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(String, Value),
    In(String, Vec<Value>),
}

impl Condition {
    pub fn field(&self) -> &str {
        match self {
            Condition::Eq(field, _) | Condition::In(field, _) => field,
        }
    }

    /// Evaluate against a row; used by in-process backends. A missing
    /// column reads as null.
    pub fn matches(&self, row: &Map<String, Value>) -> bool {
        match self {
            Condition::Eq(field, Value::Null) => row.get(field).map_or(true, Value::is_null),
            Condition::Eq(field, value) => row.get(field) == Some(value),
            Condition::In(field, values) => row
                .get(field)
                .map(|v| values.contains(v))
                .unwrap_or(false),
        }
    }
}

/// A conjunction of conditions. An empty filter matches every row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub conditions: Vec<Condition>,
}

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_id(id: Id) -> Self {
        Self::all().eq(ID_FIELD, id)
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions
            .push(Condition::Eq(field.into(), value.into()));
        self
    }

    pub fn is_in<V: Into<Value>>(
        mut self,
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.conditions.push(Condition::In(
            field.into(),
            values.into_iter().map(Into::into).collect(),
        ));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn matches(&self, row: &Map<String, Value>) -> bool {
        self.conditions.iter().all(|c| c.matches(row))
    }
}

/// Pagination for list reads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Page {
    pub limit: Option<u64>,
    pub offset: u64,
}

/// A physical store.
#[async_trait]
pub trait Store: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Open a transaction.
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError>;

    /// Read matching rows outside any transaction, ordered by id.
    async fn select(
        &self,
        table: &str,
        filter: &Filter,
        page: Page,
    ) -> Result<Vec<EntityRecord>, StoreError>;

    async fn count(&self, table: &str, filter: &Filter) -> Result<u64, StoreError>;
}

/// An open transaction on one store.
#[async_trait]
pub trait StoreTx: Send {
    /// Insert a row and return it as stored.
    ///
    /// If `record.id` is set, the row is written with that identity instead
    /// of a generated one.
    async fn insert(&mut self, table: &str, record: &EntityRecord)
        -> Result<EntityRecord, StoreError>;

    /// Insert rows in order. The returned rows correspond positionally to
    /// `records`.
    async fn insert_many(
        &mut self,
        table: &str,
        records: &[EntityRecord],
    ) -> Result<Vec<EntityRecord>, StoreError> {
        let mut stored = Vec::with_capacity(records.len());
        for record in records {
            stored.push(self.insert(table, record).await?);
        }
        Ok(stored)
    }

    /// Set `fields` on every matching row. Returns the affected row count.
    async fn update(
        &mut self,
        table: &str,
        filter: &Filter,
        fields: &Map<String, Value>,
    ) -> Result<u64, StoreError>;

    /// Delete every matching row. Returns the affected row count.
    async fn delete(&mut self, table: &str, filter: &Filter) -> Result<u64, StoreError>;

    /// Read matching rows inside the transaction, ordered by id.
    async fn select(&mut self, table: &str, filter: &Filter)
        -> Result<Vec<EntityRecord>, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
