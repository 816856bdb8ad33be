//! View controllers. Each owns the local copy of the collections it shows
//! and changes it only through the reconciliation paths.

use std::sync::Arc;

use crate::error::AppResult;
use crate::fetch::{fetch_all_as, FetchOutcome, DEFAULT_PAGE_SIZE};
use crate::join::KelurahanIndex;
use crate::model::{decode_rows, Kelurahan, KELURAHAN};
use crate::store::{RecordStore, Select};

mod dashboard;
mod kelurahan;
mod search;
mod students;
mod submissions;
mod users;

pub use dashboard::DashboardView;
pub use kelurahan::KelurahanView;
pub use search::SearchView;
pub use students::StudentsView;
pub use submissions::SubmissionsView;
pub use users::UsersView;

/// Store handle shared by the views of one session.
#[derive(Clone)]
pub struct ViewContext {
    pub store: Arc<dyn RecordStore>,
    pub page_size: usize,
}

impl ViewContext {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn store(&self) -> &dyn RecordStore {
        self.store.as_ref()
    }

    pub(crate) async fn fetch<T: serde::de::DeserializeOwned>(&self, query: &Select) -> FetchOutcome<T> {
        fetch_all_as(self.store(), query, self.page_size).await
    }

    /// Reference list for dropdowns, ordered by name. Small enough for one read.
    pub(crate) async fn kelurahan_list(&self) -> AppResult<Vec<Kelurahan>> {
        let rows = self
            .store()
            .select(&Select::from(KELURAHAN).columns(&["id", "name"]).order("name", true))
            .await?;
        decode_rows(rows)
    }

    /// Refresh a view's kelurahan list together with its name index.
    pub(crate) async fn reload_kelurahan(
        &self,
        list: &mut Vec<Kelurahan>,
        index: &mut KelurahanIndex,
    ) -> AppResult<()> {
        let fresh = self.kelurahan_list().await?;
        *index = KelurahanIndex::new(&fresh);
        *list = fresh;
        Ok(())
    }
}

/// Keep what arrived and hand back the failure, if any.
pub(crate) fn settle<T>(outcome: FetchOutcome<T>, slot: &mut Vec<T>) -> AppResult<()> {
    *slot = outcome.rows;
    match outcome.error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
