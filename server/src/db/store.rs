//! `Store` implementation over a PostgreSQL pool.

use super::pool::Pool;
use super::sql::{self, Statement};
use async_trait::async_trait;
use duplex_engine::{EntityRecord, Filter, Page, Store, StoreError, StoreTx};
use serde_json::{Map, Value};
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{PgExecutor, Postgres, Row, Transaction};

/// SQLSTATE classes reported as rejected writes rather than backend faults:
/// data exceptions (22) and integrity constraint violations (23).
const REJECTED_WRITE_CLASSES: [&str; 2] = ["22", "23"];

/// Undefined column: the payload named a column the table does not have.
const UNDEFINED_COLUMN: &str = "42703";

/// Map a sqlx error onto the engine's store error.
pub fn store_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        let code = db.code();
        let code = code.as_deref().unwrap_or_default();
        let rejected = REJECTED_WRITE_CLASSES
            .iter()
            .any(|class| code.starts_with(class))
            || code == UNDEFINED_COLUMN;
        if rejected {
            return StoreError::Constraint(db.message().to_string());
        }
    }
    StoreError::Backend(err.to_string())
}

fn prepare(stmt: &Statement) -> Query<'_, Postgres, PgArguments> {
    let mut query = sqlx::query(&stmt.sql);
    for param in &stmt.params {
        query = query.bind(param);
    }
    query
}

fn decode(row: &PgRow) -> Result<EntityRecord, StoreError> {
    let value: Value = row.try_get("row").map_err(store_error)?;
    match value {
        Value::Object(fields) => Ok(EntityRecord::new(fields)),
        other => Err(StoreError::Backend(format!(
            "expected a row object, got {}",
            other
        ))),
    }
}

async fn fetch_rows<'e, E: PgExecutor<'e>>(
    executor: E,
    stmt: &Statement,
) -> Result<Vec<EntityRecord>, StoreError> {
    let rows = prepare(stmt)
        .fetch_all(executor)
        .await
        .map_err(store_error)?;
    rows.iter().map(decode).collect()
}

async fn execute<'e, E: PgExecutor<'e>>(executor: E, stmt: &Statement) -> Result<u64, StoreError> {
    let result = prepare(stmt).execute(executor).await.map_err(store_error)?;
    Ok(result.rows_affected())
}

/// One PostgreSQL database acting as Primary or Secondary.
#[derive(Clone)]
pub struct PgStore {
    name: String,
    pool: Pool,
}

impl PgStore {
    pub fn new(name: impl Into<String>, pool: Pool) -> Self {
        Self {
            name: name.into(),
            pool,
        }
    }
}

#[async_trait]
impl Store for PgStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let tx = self.pool.begin().await.map_err(store_error)?;
        Ok(Box::new(PgTx { tx }))
    }

    async fn select(
        &self,
        table: &str,
        filter: &Filter,
        page: Page,
    ) -> Result<Vec<EntityRecord>, StoreError> {
        let stmt = sql::select(table, filter, page)?;
        fetch_rows(&self.pool, &stmt).await
    }

    async fn count(&self, table: &str, filter: &Filter) -> Result<u64, StoreError> {
        let stmt = sql::count(table, filter)?;
        let row = prepare(&stmt)
            .fetch_one(&self.pool)
            .await
            .map_err(store_error)?;
        let count: i64 = row.try_get("count").map_err(store_error)?;
        Ok(count.max(0) as u64)
    }
}

/// An open PostgreSQL transaction.
pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgTx {
    async fn insert(
        &mut self,
        table: &str,
        record: &EntityRecord,
    ) -> Result<EntityRecord, StoreError> {
        let stmt = sql::insert(table, record)?;
        let row = prepare(&stmt)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(store_error)?;
        decode(&row)
    }

    async fn update(
        &mut self,
        table: &str,
        filter: &Filter,
        fields: &Map<String, Value>,
    ) -> Result<u64, StoreError> {
        let stmt = sql::update(table, filter, fields)?;
        execute(&mut *self.tx, &stmt).await
    }

    async fn delete(&mut self, table: &str, filter: &Filter) -> Result<u64, StoreError> {
        let stmt = sql::delete(table, filter)?;
        execute(&mut *self.tx, &stmt).await
    }

    async fn select(
        &mut self,
        table: &str,
        filter: &Filter,
    ) -> Result<Vec<EntityRecord>, StoreError> {
        let stmt = sql::select(table, filter, Page::default())?;
        fetch_rows(&mut *self.tx, &stmt).await
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(store_error)
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await.map_err(store_error)
    }
}
