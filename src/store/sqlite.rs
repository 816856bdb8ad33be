//! Local SQLite backend with the same query surface as the hosted store.

use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Column, Row, Sqlite, SqlitePool, TypeInfo, ValueRef};

use super::{ensure_collection, ensure_column, op_context, RecordStore, Select};
use crate::error::AppResult;
use crate::model::RecordId;

type Query<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

const EMBED_ID: &str = "__embed_id";
const EMBED_VALUE: &str = "__embed_value";

#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn row_to_value(row: SqliteRow) -> Map<String, Value> {
    let mut map = Map::new();
    for col in row.columns() {
        let idx = col.ordinal();
        let val = match row.try_get_raw(idx).ok() {
            Some(raw) if raw.is_null() => Value::Null,
            Some(raw) => match raw.type_info().name() {
                "INTEGER" => row
                    .try_get::<i64, _>(idx)
                    .map(Value::from)
                    .unwrap_or(Value::Null),
                "REAL" => row
                    .try_get::<f64, _>(idx)
                    .map(Value::from)
                    .unwrap_or(Value::Null),
                _ => row
                    .try_get::<String, _>(idx)
                    .map(Value::from)
                    .unwrap_or(Value::Null),
            },
            None => Value::Null,
        };
        map.insert(col.name().to_string(), val);
    }
    map
}

fn bind_value<'q>(q: Query<'q>, v: &Value) -> Query<'q> {
    match v {
        Value::Null => q.bind(Option::<i64>::None),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                q.bind(i)
            } else if let Some(f) = n.as_f64() {
                q.bind(f)
            } else {
                q.bind(Option::<i64>::None)
            }
        }
        Value::Bool(b) => q.bind(*b as i64),
        Value::String(s) => q.bind(s.clone()),
        _ => q.bind(v.to_string()),
    }
}

/// Fold the joined helper columns back into `{ alias: { column: value } }`.
fn fold_embed(mut row: Map<String, Value>, query: &Select) -> Value {
    if let Some(embed) = &query.embed {
        let id = row.remove(EMBED_ID).unwrap_or(Value::Null);
        let value = row.remove(EMBED_VALUE).unwrap_or(Value::Null);
        let folded = if id.is_null() {
            Value::Null
        } else {
            let mut obj = Map::new();
            obj.insert(embed.column.clone(), value);
            Value::Object(obj)
        };
        row.insert(embed.alias.clone(), folded);
    }
    Value::Object(row)
}

fn select_sql(query: &Select) -> String {
    let projection = if query.columns.is_empty() {
        String::from("t.*")
    } else {
        query
            .columns
            .iter()
            .map(|c| format!("t.{c}"))
            .collect::<Vec<_>>()
            .join(", ")
    };

    let mut sql = match &query.embed {
        Some(embed) => format!(
            "SELECT {projection}, e.id AS {EMBED_ID}, e.{col} AS {EMBED_VALUE} \
             FROM {table} t LEFT JOIN {etable} e ON e.id = t.{fk}",
            col = embed.column,
            table = query.collection,
            etable = embed.table,
            fk = embed.foreign_key,
        ),
        None => format!("SELECT {projection} FROM {} t", query.collection),
    };

    if !query.filters.is_empty() {
        let clauses: Vec<String> = query
            .filters
            .iter()
            .map(|(column, _)| format!("t.{column} = ?"))
            .collect();
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }

    let mut order: Vec<String> = query
        .order
        .iter()
        .map(|o| {
            if o.ascending {
                format!("t.{} ASC NULLS LAST", o.column)
            } else {
                format!("t.{} DESC NULLS FIRST", o.column)
            }
        })
        .collect();
    order.push(String::from("t.rowid ASC"));
    sql.push_str(" ORDER BY ");
    sql.push_str(&order.join(", "));

    if query.range.is_some() {
        sql.push_str(" LIMIT ? OFFSET ?");
    }
    sql
}

fn checked_columns(row: &Map<String, Value>) -> AppResult<Vec<String>> {
    let cols: Vec<String> = row.keys().cloned().collect();
    for c in &cols {
        ensure_column(c)?;
    }
    Ok(cols)
}

fn insert_sql(collection: &str, cols: &[String]) -> String {
    if cols.is_empty() {
        return format!("INSERT INTO {collection} DEFAULT VALUES RETURNING *");
    }
    let placeholders: Vec<&str> = cols.iter().map(|_| "?").collect();
    format!(
        "INSERT INTO {collection} ({}) VALUES ({}) RETURNING *",
        cols.join(","),
        placeholders.join(",")
    )
}

fn upsert_sql(collection: &str, cols: &[String]) -> String {
    let placeholders: Vec<&str> = cols.iter().map(|_| "?").collect();
    let mut updates: Vec<String> = cols
        .iter()
        .filter(|c| c.as_str() != "id")
        .map(|c| format!("{c} = excluded.{c}"))
        .collect();
    if updates.is_empty() {
        updates.push(String::from("id = excluded.id"));
    }
    format!(
        "INSERT INTO {collection} ({}) VALUES ({}) ON CONFLICT(id) DO UPDATE SET {} RETURNING *",
        cols.join(","),
        placeholders.join(","),
        updates.join(", ")
    )
}

impl SqliteStore {
    async fn write_rows(
        &self,
        collection: &str,
        rows: Vec<Map<String, Value>>,
        merge: bool,
    ) -> AppResult<Vec<Value>> {
        ensure_collection(collection)?;
        let mut tx = self.pool.begin().await?;
        let mut stored = Vec::with_capacity(rows.len());
        for row in rows {
            let cols = checked_columns(&row)?;
            let sql = if merge && row.contains_key("id") {
                upsert_sql(collection, &cols)
            } else {
                insert_sql(collection, &cols)
            };
            let mut query = sqlx::query(&sql);
            for c in &cols {
                if let Some(value) = row.get(c) {
                    query = bind_value(query, value);
                }
            }
            let written = query.fetch_one(&mut *tx).await?;
            stored.push(Value::Object(row_to_value(written)));
        }
        tx.commit().await?;
        Ok(stored)
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    async fn select(&self, query: &Select) -> AppResult<Vec<Value>> {
        query.validate()?;
        let sql = select_sql(query);
        let mut q = sqlx::query(&sql);
        for (_, value) in &query.filters {
            q = bind_value(q, value);
        }
        if let Some(range) = query.range {
            q = q.bind(range.len() as i64).bind(range.from as i64);
        }
        let rows = q
            .fetch_all(&self.pool)
            .await
            .map_err(|err| op_context(err.into(), "select", &query.collection))?;
        Ok(rows
            .into_iter()
            .map(|row| fold_embed(row_to_value(row), query))
            .collect())
    }

    async fn insert(
        &self,
        collection: &str,
        rows: Vec<Map<String, Value>>,
    ) -> AppResult<Vec<Value>> {
        self.write_rows(collection, rows, false)
            .await
            .map_err(|err| op_context(err, "insert", collection))
    }

    async fn upsert(
        &self,
        collection: &str,
        rows: Vec<Map<String, Value>>,
    ) -> AppResult<Vec<Value>> {
        self.write_rows(collection, rows, true)
            .await
            .map_err(|err| op_context(err, "upsert", collection))
    }

    async fn update(
        &self,
        collection: &str,
        id: &RecordId,
        mut patch: Map<String, Value>,
    ) -> AppResult<()> {
        ensure_collection(collection)?;
        patch.remove("id");
        if patch.is_empty() {
            return Ok(());
        }
        let cols = checked_columns(&patch)?;
        let set_clause: Vec<String> = cols.iter().map(|c| format!("{c} = ?")).collect();
        let sql = format!("UPDATE {collection} SET {} WHERE id = ?", set_clause.join(","));
        let mut query = sqlx::query(&sql);
        for c in &cols {
            if let Some(value) = patch.get(c) {
                query = bind_value(query, value);
            }
        }
        query = bind_value(query, &id.to_value());
        query.execute(&self.pool).await.map_err(|err| {
            op_context(err.into(), "update", collection).with_context("id", id.to_string())
        })?;
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &RecordId) -> AppResult<()> {
        ensure_collection(collection)?;
        let sql = format!("DELETE FROM {collection} WHERE id = ?");
        bind_value(sqlx::query(&sql), &id.to_value())
            .execute(&self.pool)
            .await
            .map_err(|err| {
                op_context(err.into(), "delete", collection).with_context("id", id.to_string())
            })?;
        Ok(())
    }
}
