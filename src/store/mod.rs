//! Remote record store seam.
//!
//! Every backend exposes the same collection-level operations and reports
//! failures as `AppError` values. Rows travel as JSON objects; views decode
//! them into typed records.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use crate::error::{AppError, AppResult, STORE_INVALID_COLLECTION};
use crate::model::{RecordId, KELURAHAN, PENGAJUAN, PROFILES, STUDENTS};

pub mod memory;
pub mod rest;
pub mod sqlite;

pub use memory::MemoryStore;
pub use rest::RestStore;
pub use sqlite::SqliteStore;

pub const COLLECTIONS: &[&str] = &[STUDENTS, PENGAJUAN, KELURAHAN, PROFILES];

static IDENT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z_][a-z0-9_]*$").expect("identifier validation pattern to compile")
});

pub fn ensure_collection(collection: &str) -> AppResult<()> {
    if COLLECTIONS.contains(&collection) {
        Ok(())
    } else {
        Err(AppError::new(STORE_INVALID_COLLECTION, "Unknown collection")
            .with_context("collection", collection.to_string()))
    }
}

pub fn ensure_column(column: &str) -> AppResult<()> {
    if IDENT_PATTERN.is_match(column) {
        Ok(())
    } else {
        Err(AppError::new("STORE/INVALID_COLUMN", "Invalid column name")
            .with_context("column", column.to_string()))
    }
}

/// Foreign-key lookup materialised under `alias` as `{ column: value }`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Embed {
    pub alias: String,
    pub foreign_key: String,
    pub table: String,
    pub column: String,
}

impl Embed {
    /// `kelurahan:kelurahan_id (name)`
    pub fn kelurahan_name() -> Self {
        Self {
            alias: "kelurahan".into(),
            foreign_key: "kelurahan_id".into(),
            table: KELURAHAN.into(),
            column: "name".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

/// Inclusive row window, `from..=to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowRange {
    pub from: usize,
    pub to: usize,
}

impl RowRange {
    pub fn len(&self) -> usize {
        self.to.saturating_sub(self.from) + 1
    }

    pub fn is_empty(&self) -> bool {
        self.to < self.from
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub collection: String,
    /// Empty means every column.
    pub columns: Vec<String>,
    pub embed: Option<Embed>,
    /// Equality filters, all must match.
    pub filters: Vec<(String, Value)>,
    pub order: Vec<Order>,
    pub range: Option<RowRange>,
}

impl Select {
    pub fn from(collection: &str) -> Self {
        Self {
            collection: collection.to_string(),
            columns: Vec::new(),
            embed: None,
            filters: Vec::new(),
            order: Vec::new(),
            range: None,
        }
    }

    pub fn columns(mut self, columns: &[&str]) -> Self {
        self.columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn embed(mut self, embed: Embed) -> Self {
        self.embed = Some(embed);
        self
    }

    pub fn eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters.push((column.to_string(), value.into()));
        self
    }

    pub fn order(mut self, column: &str, ascending: bool) -> Self {
        self.order.push(Order {
            column: column.to_string(),
            ascending,
        });
        self
    }

    pub fn range(mut self, from: usize, to: usize) -> Self {
        self.range = Some(RowRange { from, to });
        self
    }

    /// Validate every identifier before it reaches a backend.
    pub fn validate(&self) -> AppResult<()> {
        ensure_collection(&self.collection)?;
        for column in &self.columns {
            ensure_column(column)?;
        }
        for (column, _) in &self.filters {
            ensure_column(column)?;
        }
        for order in &self.order {
            ensure_column(&order.column)?;
        }
        if let Some(embed) = &self.embed {
            ensure_collection(&embed.table)?;
            ensure_column(&embed.alias)?;
            ensure_column(&embed.foreign_key)?;
            ensure_column(&embed.column)?;
        }
        Ok(())
    }
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Short backend name for logs.
    fn backend(&self) -> &'static str;

    async fn select(&self, query: &Select) -> AppResult<Vec<Value>>;

    /// Insert one or more rows, returning them as stored.
    async fn insert(&self, collection: &str, rows: Vec<Map<String, Value>>)
        -> AppResult<Vec<Value>>;

    /// Insert or merge by `id`.
    async fn upsert(&self, collection: &str, rows: Vec<Map<String, Value>>)
        -> AppResult<Vec<Value>>;

    /// Partial update of the row with the given identity.
    async fn update(
        &self,
        collection: &str,
        id: &RecordId,
        patch: Map<String, Value>,
    ) -> AppResult<()>;

    async fn delete(&self, collection: &str, id: &RecordId) -> AppResult<()>;
}

/// Attach operation context the way every store call site reports failures.
pub(crate) fn op_context(err: AppError, operation: &str, collection: &str) -> AppError {
    err.with_context("operation", operation.to_string())
        .with_context("collection", collection.to_string())
}
