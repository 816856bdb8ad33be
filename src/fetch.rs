//! Paged collection reads.
//!
//! The backend caps every response, so a full collection is read in fixed
//! windows until a short page comes back. Pages are requested one at a time.

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::AppError;
use crate::store::{RecordStore, Select};

/// Backend response cap.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Rows gathered by [`fetch_all`]. When `error` is set the rows are the
/// pages that arrived before the failure.
#[derive(Debug)]
pub struct FetchOutcome<T> {
    pub rows: Vec<T>,
    pub requests: usize,
    pub error: Option<AppError>,
}

impl<T> FetchOutcome<T> {
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }

    /// Discard partial rows and surface the failure, if any.
    pub fn into_result(self) -> Result<Vec<T>, AppError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.rows),
        }
    }
}

pub async fn fetch_all(
    store: &dyn RecordStore,
    query: &Select,
    page_size: usize,
) -> FetchOutcome<Value> {
    let page_size = page_size.max(1);
    let mut rows = Vec::new();
    let mut requests = 0usize;
    let mut from = 0usize;

    loop {
        let page_query = query.clone().range(from, from + page_size - 1);
        requests += 1;
        match store.select(&page_query).await {
            Ok(page) => {
                let received = page.len();
                debug!(
                    target: "pipadmin",
                    event = "fetch_page",
                    collection = %query.collection,
                    from,
                    received
                );
                rows.extend(page);
                if received < page_size {
                    break;
                }
                from += page_size;
            }
            Err(err) => {
                warn!(
                    target: "pipadmin",
                    event = "fetch_page_failed",
                    collection = %query.collection,
                    from,
                    kept = rows.len(),
                    code = %err.code(),
                    error = %err.message()
                );
                return FetchOutcome {
                    rows,
                    requests,
                    error: Some(err.with_context("from", from.to_string())),
                };
            }
        }
    }

    FetchOutcome {
        rows,
        requests,
        error: None,
    }
}

/// [`fetch_all`] followed by typed decoding. A row that fails to decode ends
/// the outcome the same way a failed page does.
pub async fn fetch_all_as<T: DeserializeOwned>(
    store: &dyn RecordStore,
    query: &Select,
    page_size: usize,
) -> FetchOutcome<T> {
    let raw = fetch_all(store, query, page_size).await;
    let mut rows = Vec::with_capacity(raw.rows.len());
    let mut error = raw.error;
    for (index, row) in raw.rows.into_iter().enumerate() {
        match serde_json::from_value::<T>(row) {
            Ok(decoded) => rows.push(decoded),
            Err(err) => {
                let err = AppError::from(err)
                    .with_context("collection", query.collection.clone())
                    .with_context("row", index.to_string());
                error.get_or_insert(err);
                break;
            }
        }
    }
    FetchOutcome {
        rows,
        requests: raw.requests,
        error,
    }
}
