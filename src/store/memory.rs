//! In-process record store.
//!
//! Used by tests and by the CLI's `memory` backend. It counts requests and can
//! be told to fail specific calls so that paging and resync paths can be
//! exercised without a network.

use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::{ensure_collection, op_context, RecordStore, Select};
use crate::error::{AppError, AppResult, STORE_ERROR};
use crate::model::RecordId;
use crate::time::{now_utc, to_rfc3339};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Select,
    Insert,
    Upsert,
    Update,
    Delete,
}

#[derive(Debug, Default)]
struct Inner {
    tables: HashMap<String, Vec<Map<String, Value>>>,
    next_id: HashMap<String, i64>,
    calls: HashMap<StoreOp, usize>,
    /// Rows returned by each select, in call order.
    page_sizes: Vec<usize>,
    /// Per-operation queue of call numbers (1-based, counted from the start)
    /// that should fail.
    failures: HashMap<StoreOp, VecDeque<(usize, AppError)>>,
    embed_as_list: bool,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return embedded lookups as one-element lists instead of objects.
    pub fn embed_as_list(self, on: bool) -> Self {
        self.lock().embed_as_list = on;
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Seed rows directly, bypassing request counting. Missing ids are assigned.
    pub fn seed(&self, collection: &str, rows: Vec<Value>) {
        let mut inner = self.lock();
        for row in rows {
            if let Value::Object(map) = row {
                let map = inner.prepare_row(collection, map);
                inner
                    .tables
                    .entry(collection.to_string())
                    .or_default()
                    .push(map);
            }
        }
    }

    /// Make the `nth` call of `op` fail (1-based, counted over the store's
    /// lifetime) with `error`.
    pub fn fail_call(&self, op: StoreOp, nth: usize, error: AppError) {
        self.lock()
            .failures
            .entry(op)
            .or_default()
            .push_back((nth, error));
    }

    /// Make the next call of `op` fail.
    pub fn fail_next(&self, op: StoreOp, message: &str) {
        let mut inner = self.lock();
        let nth = inner.calls.get(&op).copied().unwrap_or(0) + 1;
        inner
            .failures
            .entry(op)
            .or_default()
            .push_back((nth, AppError::new(STORE_ERROR, message)));
    }

    pub fn calls(&self, op: StoreOp) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    pub fn page_sizes(&self) -> Vec<usize> {
        self.lock().page_sizes.clone()
    }

    pub fn rows(&self, collection: &str) -> Vec<Value> {
        self.lock()
            .tables
            .get(collection)
            .map(|rows| rows.iter().cloned().map(Value::Object).collect())
            .unwrap_or_default()
    }

    /// Overwrite columns of a stored row without counting a request; simulates
    /// another session writing to the backend.
    pub fn patch_row(&self, collection: &str, id: &RecordId, patch: Map<String, Value>) -> bool {
        let mut inner = self.lock();
        match inner.find_mut(collection, id) {
            Some(row) => {
                row.extend(patch);
                true
            }
            None => false,
        }
    }
}

impl Inner {
    fn begin(&mut self, op: StoreOp) -> AppResult<()> {
        let count = self.calls.entry(op).or_insert(0);
        *count += 1;
        let current = *count;
        if let Some(queue) = self.failures.get_mut(&op) {
            if let Some(pos) = queue.iter().position(|(nth, _)| *nth == current) {
                if let Some((_, err)) = queue.remove(pos) {
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    fn prepare_row(&mut self, collection: &str, mut row: Map<String, Value>) -> Map<String, Value> {
        let next = self.next_id.entry(collection.to_string()).or_insert(1);
        match row.get("id").and_then(Value::as_i64) {
            Some(id) => {
                if id >= *next {
                    *next = id + 1;
                }
            }
            None if !row.contains_key("id") => {
                row.insert("id".into(), Value::from(*next));
                *next += 1;
            }
            None => {}
        }
        row.entry(String::from("created_at"))
            .or_insert_with(|| Value::String(to_rfc3339(now_utc())));
        row
    }

    fn find_mut(&mut self, collection: &str, id: &RecordId) -> Option<&mut Map<String, Value>> {
        self.tables
            .get_mut(collection)?
            .iter_mut()
            .find(|row| row.get("id").is_some_and(|v| loosely_equal(v, &id.to_value())))
    }

    fn embed_value(&self, query: &Select, row: &Map<String, Value>) -> Option<(String, Value)> {
        let embed = query.embed.as_ref()?;
        let fk = row.get(&embed.foreign_key).cloned().unwrap_or(Value::Null);
        let found = self.tables.get(&embed.table).and_then(|rows| {
            rows.iter()
                .find(|r| r.get("id").is_some_and(|id| !fk.is_null() && loosely_equal(id, &fk)))
        });
        let value = match found {
            Some(target) => {
                let mut obj = Map::new();
                obj.insert(
                    embed.column.clone(),
                    target.get(&embed.column).cloned().unwrap_or(Value::Null),
                );
                if self.embed_as_list {
                    Value::Array(vec![Value::Object(obj)])
                } else {
                    Value::Object(obj)
                }
            }
            None if self.embed_as_list => Value::Array(Vec::new()),
            None => Value::Null,
        };
        Some((embed.alias.clone(), value))
    }
}

/// Equality as the backend applies it to `eq.` filters: values compare by
/// their text form, so `3` matches `"3"`.
fn loosely_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::String(x), other) | (other, Value::String(x)) => *x == other.to_string(),
        (x, y) => x == y,
    }
}

/// Nulls sort after everything else in ascending order.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn select(&self, query: &Select) -> AppResult<Vec<Value>> {
        query.validate()?;
        let mut inner = self.lock();
        inner
            .begin(StoreOp::Select)
            .map_err(|err| op_context(err, "select", &query.collection))?;

        let mut rows: Vec<&Map<String, Value>> = inner
            .tables
            .get(&query.collection)
            .map(|rows| rows.iter().collect())
            .unwrap_or_default();

        rows.retain(|row| {
            query.filters.iter().all(|(column, expected)| {
                row.get(column)
                    .is_some_and(|actual| loosely_equal(actual, expected))
            })
        });

        if !query.order.is_empty() {
            rows.sort_by(|a, b| {
                for order in &query.order {
                    let ord = compare_values(a.get(&order.column), b.get(&order.column));
                    let ord = if order.ascending { ord } else { ord.reverse() };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
        }

        let window: Vec<&Map<String, Value>> = match query.range {
            Some(range) => rows
                .into_iter()
                .skip(range.from)
                .take(range.len())
                .collect(),
            None => rows,
        };

        let out: Vec<Value> = window
            .into_iter()
            .map(|row| {
                let mut projected = if query.columns.is_empty() {
                    row.clone()
                } else {
                    query
                        .columns
                        .iter()
                        .map(|c| (c.clone(), row.get(c).cloned().unwrap_or(Value::Null)))
                        .collect()
                };
                if let Some((alias, value)) = inner.embed_value(query, row) {
                    projected.insert(alias, value);
                }
                Value::Object(projected)
            })
            .collect();

        inner.page_sizes.push(out.len());
        Ok(out)
    }

    async fn insert(
        &self,
        collection: &str,
        rows: Vec<Map<String, Value>>,
    ) -> AppResult<Vec<Value>> {
        ensure_collection(collection)?;
        let mut inner = self.lock();
        inner
            .begin(StoreOp::Insert)
            .map_err(|err| op_context(err, "insert", collection))?;
        let mut stored = Vec::with_capacity(rows.len());
        for row in rows {
            let row = inner.prepare_row(collection, row);
            stored.push(Value::Object(row.clone()));
            inner
                .tables
                .entry(collection.to_string())
                .or_default()
                .push(row);
        }
        Ok(stored)
    }

    async fn upsert(
        &self,
        collection: &str,
        rows: Vec<Map<String, Value>>,
    ) -> AppResult<Vec<Value>> {
        ensure_collection(collection)?;
        let mut inner = self.lock();
        inner
            .begin(StoreOp::Upsert)
            .map_err(|err| op_context(err, "upsert", collection))?;
        let mut stored = Vec::with_capacity(rows.len());
        for row in rows {
            let existing = row
                .get("id")
                .and_then(RecordId::from_value)
                .and_then(|id| inner.find_mut(collection, &id).map(|found| {
                    found.extend(row.clone());
                    found.clone()
                }));
            let merged = match existing {
                Some(found) => found,
                None => {
                    let row = inner.prepare_row(collection, row);
                    inner
                        .tables
                        .entry(collection.to_string())
                        .or_default()
                        .push(row.clone());
                    row
                }
            };
            stored.push(Value::Object(merged));
        }
        Ok(stored)
    }

    async fn update(
        &self,
        collection: &str,
        id: &RecordId,
        patch: Map<String, Value>,
    ) -> AppResult<()> {
        ensure_collection(collection)?;
        let mut inner = self.lock();
        inner
            .begin(StoreOp::Update)
            .map_err(|err| op_context(err, "update", collection))?;
        // Matching zero rows is not an error, same as the hosted backend.
        if let Some(row) = inner.find_mut(collection, id) {
            row.extend(patch);
        }
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &RecordId) -> AppResult<()> {
        ensure_collection(collection)?;
        let mut inner = self.lock();
        inner
            .begin(StoreOp::Delete)
            .map_err(|err| op_context(err, "delete", collection))?;
        let target = id.to_value();
        if let Some(table) = inner.tables.get_mut(collection) {
            table.retain(|row| !row.get("id").is_some_and(|v| loosely_equal(v, &target)));
        }
        Ok(())
    }
}
