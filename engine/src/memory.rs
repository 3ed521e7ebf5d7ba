//! In-memory store backend.
//!
//! Each transaction works on a private copy of the tables and publishes it
//! on commit, so an uncommitted transaction leaves no trace. Faults can be
//! injected to exercise rollback and partial-replication paths.

use crate::store::{Filter, Page, Store, StoreError, StoreTx};
use crate::{EntityRecord, Id, ID_FIELD};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// A failure to inject into a [`MemoryStore`]. Faults stay armed until
/// [`MemoryStore::clear_faults`] is called.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Every insert into `table` fails.
    Insert { table: String },
    /// Any insert or update touching row `id` of `table` fails.
    WriteRow { table: String, id: Id },
    /// Every commit fails.
    Commit,
    /// Opening a transaction fails.
    Begin,
}

#[derive(Debug, Clone, Default)]
struct Table {
    rows: BTreeMap<Id, Map<String, Value>>,
    next_id: Id,
}

impl Table {
    fn allocate(&mut self, requested: Option<Id>) -> Id {
        let next = self.next_id.max(1);
        let id = requested.unwrap_or(next);
        self.next_id = next.max(id + 1);
        id
    }
}

#[derive(Debug, Clone, Default)]
struct Tables(HashMap<String, Table>);

impl Tables {
    fn table(&self, name: &str) -> Option<&Table> {
        self.0.get(name)
    }

    fn table_mut(&mut self, name: &str) -> &mut Table {
        self.0.entry(name.to_string()).or_default()
    }

    fn select(&self, table: &str, filter: &Filter) -> Vec<EntityRecord> {
        self.table(table)
            .map(|t| {
                t.rows
                    .values()
                    .filter(|row| filter.matches(row))
                    .map(|row| EntityRecord::new(row.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

struct Inner {
    name: String,
    tables: Mutex<Tables>,
    faults: Mutex<Vec<Fault>>,
    unique: Vec<(String, String)>,
}

impl Inner {
    fn check(&self, predicate: impl Fn(&Fault) -> bool, what: &str) -> Result<(), StoreError> {
        if self.faults.lock().iter().any(predicate) {
            return Err(StoreError::Backend(format!(
                "injected fault in {}: {}",
                self.name, what
            )));
        }
        Ok(())
    }

    fn check_row_write(&self, table: &str, id: Id) -> Result<(), StoreError> {
        self.check(
            |f| matches!(f, Fault::WriteRow { table: t, id: i } if t == table && *i == id),
            &format!("write to {}#{}", table, id),
        )
    }

    fn check_unique(
        &self,
        tables: &Tables,
        table: &str,
        id: Id,
        row: &Map<String, Value>,
    ) -> Result<(), StoreError> {
        let Some(existing) = tables.table(table) else {
            return Ok(());
        };
        for (t, column) in &self.unique {
            if t != table {
                continue;
            }
            let Some(value) = row.get(column).filter(|v| !v.is_null()) else {
                continue;
            };
            let clash = existing
                .rows
                .iter()
                .any(|(other, r)| *other != id && r.get(column) == Some(value));
            if clash {
                return Err(StoreError::Constraint(format!(
                    "duplicate value {} for {}.{}",
                    value, table, column
                )));
            }
        }
        Ok(())
    }
}

/// A process-local store. Cloning yields another handle to the same data.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_unique(name, Vec::<(String, String)>::new())
    }

    /// Create a store enforcing `UNIQUE (column)` on the given tables.
    pub fn with_unique<T, C>(
        name: impl Into<String>,
        unique: impl IntoIterator<Item = (T, C)>,
    ) -> Self
    where
        T: Into<String>,
        C: Into<String>,
    {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                tables: Mutex::new(Tables::default()),
                faults: Mutex::new(Vec::new()),
                unique: unique
                    .into_iter()
                    .map(|(t, c)| (t.into(), c.into()))
                    .collect(),
            }),
        }
    }

    pub fn inject(&self, fault: Fault) {
        self.inner.faults.lock().push(fault);
    }

    pub fn clear_faults(&self) {
        self.inner.faults.lock().clear();
    }

    /// Committed rows of a table, ordered by id.
    pub fn rows(&self, table: &str) -> Vec<EntityRecord> {
        self.inner.tables.lock().select(table, &Filter::all())
    }

    /// Committed row by id.
    pub fn row(&self, table: &str, id: Id) -> Option<EntityRecord> {
        self.inner
            .tables
            .lock()
            .table(table)
            .and_then(|t| t.rows.get(&id))
            .map(|row| EntityRecord::new(row.clone()))
    }

    /// Write a row directly, bypassing transactions and faults.
    pub fn put_raw(&self, table: &str, record: EntityRecord) -> Id {
        let mut tables = self.inner.tables.lock();
        let t = tables.table_mut(table);
        let id = t.allocate(record.id);
        let mut row = record.to_map();
        row.insert(ID_FIELD.to_string(), Value::from(id));
        t.rows.insert(id, row);
        id
    }

    /// Remove a row directly, bypassing transactions and faults.
    pub fn remove_raw(&self, table: &str, id: Id) -> bool {
        self.inner
            .tables
            .lock()
            .table_mut(table)
            .rows
            .remove(&id)
            .is_some()
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn name(&self) -> &str {
        &self.inner.name
    }

    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        self.inner.check(|f| matches!(f, Fault::Begin), "begin")?;
        let working = self.inner.tables.lock().clone();
        Ok(Box::new(MemoryTx {
            inner: Arc::clone(&self.inner),
            working,
        }))
    }

    async fn select(
        &self,
        table: &str,
        filter: &Filter,
        page: Page,
    ) -> Result<Vec<EntityRecord>, StoreError> {
        let rows = self.inner.tables.lock().select(table, filter);
        let limit = page.limit.map(|l| l as usize).unwrap_or(usize::MAX);
        Ok(rows
            .into_iter()
            .skip(page.offset as usize)
            .take(limit)
            .collect())
    }

    async fn count(&self, table: &str, filter: &Filter) -> Result<u64, StoreError> {
        Ok(self.inner.tables.lock().select(table, filter).len() as u64)
    }
}

struct MemoryTx {
    inner: Arc<Inner>,
    working: Tables,
}

fn now() -> Value {
    Value::from(chrono::Utc::now().to_rfc3339())
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn insert(
        &mut self,
        table: &str,
        record: &EntityRecord,
    ) -> Result<EntityRecord, StoreError> {
        self.inner.check(
            |f| matches!(f, Fault::Insert { table: t } if t == table),
            &format!("insert into {}", table),
        )?;

        if let Some(id) = record.id {
            let exists = self
                .working
                .table(table)
                .map(|t| t.rows.contains_key(&id))
                .unwrap_or(false);
            if exists {
                return Err(StoreError::Constraint(format!(
                    "duplicate key {}.id = {}",
                    table, id
                )));
            }
        }

        let id = self.working.table_mut(table).allocate(record.id);
        self.inner.check_row_write(table, id)?;

        let mut row = record.to_map();
        row.insert(ID_FIELD.to_string(), Value::from(id));
        let stamp = now();
        row.entry("created_at").or_insert_with(|| stamp.clone());
        row.entry("updated_at").or_insert(stamp);
        self.inner.check_unique(&self.working, table, id, &row)?;

        self.working.table_mut(table).rows.insert(id, row.clone());
        Ok(EntityRecord::new(row))
    }

    async fn update(
        &mut self,
        table: &str,
        filter: &Filter,
        fields: &Map<String, Value>,
    ) -> Result<u64, StoreError> {
        let ids: Vec<Id> = self
            .working
            .select(table, filter)
            .into_iter()
            .filter_map(|r| r.id)
            .collect();

        let stamp = now();
        for id in &ids {
            self.inner.check_row_write(table, *id)?;
            let mut row = self.working.table_mut(table).rows[id].clone();
            for (k, v) in fields {
                if k != ID_FIELD {
                    row.insert(k.clone(), v.clone());
                }
            }
            row.insert("updated_at".to_string(), stamp.clone());
            self.inner.check_unique(&self.working, table, *id, &row)?;
            self.working.table_mut(table).rows.insert(*id, row);
        }
        Ok(ids.len() as u64)
    }

    async fn delete(&mut self, table: &str, filter: &Filter) -> Result<u64, StoreError> {
        let t = self.working.table_mut(table);
        let before = t.rows.len();
        t.rows.retain(|_, row| !filter.matches(row));
        Ok((before - t.rows.len()) as u64)
    }

    async fn select(
        &mut self,
        table: &str,
        filter: &Filter,
    ) -> Result<Vec<EntityRecord>, StoreError> {
        Ok(self.working.select(table, filter))
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.inner.check(|f| matches!(f, Fault::Commit), "commit")?;
        *self.inner.tables.lock() = self.working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}
