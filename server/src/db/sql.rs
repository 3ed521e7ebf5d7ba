//! Dynamic SQL for record-shaped tables.
//!
//! Rows travel as JSONB: inserts and updates decode the payload with
//! `jsonb_populate_record`, reads return `to_jsonb(row)`. Identifiers are
//! validated and quoted, values are always bound.
//!
//! Filter values are converted to the column's type through the same
//! record decoding, so conditions compare the bare column and can use its
//! index.

use duplex_engine::{Condition, EntityRecord, Filter, Page, StoreError, ID_FIELD};
use serde_json::{Map, Value};

/// Postgres truncates identifiers beyond this length.
const MAX_IDENTIFIER_LEN: usize = 63;

/// A statement and its JSONB parameters, in `$n` order.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Accept lowercase snake_case identifiers only.
pub fn check_identifier(name: &str) -> Result<(), StoreError> {
    let mut chars = name.chars();
    let valid_start = matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if valid_start && valid_rest && name.len() <= MAX_IDENTIFIER_LEN {
        Ok(())
    } else {
        Err(StoreError::Constraint(format!("invalid column name '{}'", name)))
    }
}

fn quote(name: &str) -> Result<String, StoreError> {
    check_identifier(name)?;
    Ok(format!("\"{}\"", name))
}

/// Builds the WHERE clause while numbering parameters.
struct Builder {
    params: Vec<Value>,
}

impl Builder {
    fn new() -> Self {
        Self { params: Vec::new() }
    }

    fn bind(&mut self, value: Value) -> String {
        self.params.push(value);
        format!("${}", self.params.len())
    }

    /// `value` (a JSONB expression) decoded as the type of `column`.
    fn typed(table: &str, column: &str, value: &str) -> String {
        format!(
            "(jsonb_populate_record(NULL::{}, jsonb_build_object('{}', {})))",
            table, column, value
        )
    }

    fn where_clause(&mut self, table: &str, filter: &Filter) -> Result<String, StoreError> {
        if filter.is_empty() {
            return Ok(String::new());
        }
        let mut parts = Vec::with_capacity(filter.conditions.len());
        for condition in &filter.conditions {
            let name = condition.field();
            let column = quote(name)?;
            let part = match condition {
                Condition::Eq(_, Value::Null) => format!("tgt.{} IS NULL", column),
                Condition::Eq(_, value) => {
                    let param = format!("{}::jsonb", self.bind(value.clone()));
                    format!(
                        "tgt.{c} = {r}.{c}",
                        c = column,
                        r = Self::typed(table, name, &param)
                    )
                }
                Condition::In(_, values) if values.is_empty() => "FALSE".to_string(),
                Condition::In(_, values) => {
                    let param = self.bind(Value::Array(values.clone()));
                    format!(
                        "tgt.{c} = ANY(ARRAY(SELECT {r}.{c} \
                         FROM jsonb_array_elements({p}::jsonb) AS v))",
                        c = column,
                        r = Self::typed(table, name, "v"),
                        p = param
                    )
                }
            };
            parts.push(part);
        }
        Ok(format!(" WHERE {}", parts.join(" AND ")))
    }

    fn finish(self, sql: String) -> Statement {
        Statement {
            sql,
            params: self.params,
        }
    }
}

/// Column names of a payload in a stable order, without the id.
fn sorted_keys(fields: &Map<String, Value>) -> Vec<&str> {
    let mut keys: Vec<&str> = fields
        .keys()
        .map(String::as_str)
        .filter(|k| *k != ID_FIELD)
        .collect();
    keys.sort_unstable();
    keys
}

/// `INSERT` returning the stored row. An explicit `id` is written as given.
pub fn insert(table: &str, record: &EntityRecord) -> Result<Statement, StoreError> {
    let table = quote(table)?;
    let mut builder = Builder::new();

    let mut columns = Vec::new();
    if record.id.is_some() {
        columns.push(quote(ID_FIELD)?);
    }
    for key in sorted_keys(&record.fields) {
        columns.push(quote(key)?);
    }

    let sql = if columns.is_empty() {
        format!(
            "INSERT INTO {} AS tgt DEFAULT VALUES RETURNING to_jsonb(tgt.*) AS row",
            table
        )
    } else {
        let columns = columns.join(", ");
        let payload = builder.bind(Value::Object(record.to_map()));
        format!(
            "INSERT INTO {t} AS tgt ({c}) SELECT {c} FROM jsonb_populate_record(NULL::{t}, {p}) \
             RETURNING to_jsonb(tgt.*) AS row",
            t = table,
            c = columns,
            p = payload
        )
    };
    Ok(builder.finish(sql))
}

/// `UPDATE` of the given columns on every matching row. `updated_at` is
/// refreshed unless the payload sets it.
pub fn update(
    table: &str,
    filter: &Filter,
    fields: &Map<String, Value>,
) -> Result<Statement, StoreError> {
    let table = quote(table)?;
    let mut builder = Builder::new();

    let mut assignments = Vec::new();
    let keys = sorted_keys(fields);
    for key in &keys {
        let column = quote(key)?;
        assignments.push(format!("{c} = src.{c}", c = column));
    }
    if !fields.contains_key("updated_at") {
        assignments.push("\"updated_at\" = now()".to_string());
    }

    let source = if !keys.is_empty() {
        let payload = builder.bind(Value::Object(fields.clone()));
        format!(
            " FROM jsonb_populate_record(NULL::{}, {}) AS src",
            table, payload
        )
    } else {
        String::new()
    };
    let where_clause = builder.where_clause(&table, filter)?;

    let sql = format!(
        "UPDATE {} AS tgt SET {}{}{}",
        table,
        assignments.join(", "),
        source,
        where_clause
    );
    Ok(builder.finish(sql))
}

pub fn delete(table: &str, filter: &Filter) -> Result<Statement, StoreError> {
    let table = quote(table)?;
    let mut builder = Builder::new();
    let where_clause = builder.where_clause(&table, filter)?;
    let sql = format!("DELETE FROM {} AS tgt{}", table, where_clause);
    Ok(builder.finish(sql))
}

/// `SELECT` of whole rows as JSONB, ordered by id.
pub fn select(table: &str, filter: &Filter, page: Page) -> Result<Statement, StoreError> {
    let table = quote(table)?;
    let mut builder = Builder::new();
    let where_clause = builder.where_clause(&table, filter)?;

    let mut sql = format!(
        "SELECT to_jsonb(tgt.*) AS row FROM {} AS tgt{} ORDER BY tgt.\"id\"",
        table, where_clause
    );
    if let Some(limit) = page.limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }
    if page.offset > 0 {
        sql.push_str(&format!(" OFFSET {}", page.offset));
    }
    Ok(builder.finish(sql))
}

pub fn count(table: &str, filter: &Filter) -> Result<Statement, StoreError> {
    let table = quote(table)?;
    let mut builder = Builder::new();
    let where_clause = builder.where_clause(&table, filter)?;
    let sql = format!("SELECT COUNT(*) AS count FROM {} AS tgt{}", table, where_clause);
    Ok(builder.finish(sql))
}
