use tracing::info;

use super::{settle, ViewContext};
use crate::aggregate::{available_years, dashboard_recap, DashboardFilter, DashboardRecap};
use crate::error::{AppError, AppResult};
use crate::join::KelurahanIndex;
use crate::model::{Kelurahan, Student, Submission, PENGAJUAN, STUDENTS};
use crate::store::Select;

pub struct DashboardView {
    ctx: ViewContext,
    students: Vec<Student>,
    submissions: Vec<Submission>,
    kelurahan: Vec<Kelurahan>,
    index: KelurahanIndex,
    filter: DashboardFilter,
}

impl DashboardView {
    pub fn new(ctx: ViewContext) -> Self {
        Self {
            ctx,
            students: Vec::new(),
            submissions: Vec::new(),
            kelurahan: Vec::new(),
            index: KelurahanIndex::default(),
            filter: DashboardFilter::default(),
        }
    }

    /// Load the three collections concurrently. Each keeps whatever arrived;
    /// the first failure is returned.
    pub async fn load(&mut self) -> AppResult<()> {
        let students_q = Select::from(STUDENTS).order("created_at", false);
        let submissions_q = Select::from(PENGAJUAN).order("created_at", false);
        let (students, submissions, kelurahan) = futures::join!(
            self.ctx.fetch::<Student>(&students_q),
            self.ctx.fetch::<Submission>(&submissions_q),
            self.ctx.kelurahan_list(),
        );
        info!(
            target: "pipadmin",
            event = "dashboard_loaded",
            students = students.rows.len(),
            pengajuan = submissions.rows.len(),
            requests = students.requests + submissions.requests + 1
        );

        let mut first_error: Option<AppError> = None;
        if let Err(err) = settle(students, &mut self.students) {
            first_error.get_or_insert(err);
        }
        if let Err(err) = settle(submissions, &mut self.submissions) {
            first_error.get_or_insert(err);
        }
        match kelurahan {
            Ok(list) => {
                self.index = KelurahanIndex::new(&list);
                self.kelurahan = list;
            }
            Err(err) => {
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn kelurahan(&self) -> &[Kelurahan] {
        &self.kelurahan
    }

    pub fn filter(&self) -> &DashboardFilter {
        &self.filter
    }

    pub fn set_filter(&mut self, filter: DashboardFilter) {
        self.filter = filter;
    }

    pub fn years(&self) -> Vec<String> {
        available_years(&self.students, &self.submissions)
    }

    pub fn recap(&self) -> DashboardRecap {
        dashboard_recap(&self.students, &self.submissions, &self.index, &self.filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::STORE_ERROR;
    use crate::model::{Status, KELURAHAN};
    use crate::store::memory::{MemoryStore, StoreOp};
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn recap_follows_filter() {
        let store = MemoryStore::new();
        store.seed(KELURAHAN, vec![json!({"id": 1, "name": "Pasirjati"}), json!({"id": 2, "name": "Cigending"})]);
        store.seed(
            STUDENTS,
            vec![
                json!({"nama_ayah": "A", "nama_ibu": "B", "kelurahan_id": 1, "created_at": "2024-01-01T00:00:00Z"}),
                json!({"nama_ayah": "A", "nama_ibu": "C", "kelurahan_id": 2, "created_at": "2025-01-01T00:00:00Z"}),
            ],
        );
        store.seed(
            PENGAJUAN,
            vec![
                json!({"status_pengajuan": "Diinput", "kelurahan_id": 1, "created_at": "2024-06-01T00:00:00Z"}),
                json!({"status_pengajuan": "diinput ", "kelurahan_id": 2, "created_at": "2025-06-01T00:00:00Z"}),
            ],
        );
        let mut view = DashboardView::new(ViewContext::new(Arc::new(store)));
        view.load().await.expect("load");
        assert_eq!(view.years(), vec!["2025", "2024"]);

        let all = view.recap();
        assert_eq!(all.students.total, 2);
        assert_eq!(all.students.unique_fathers, 1);
        assert_eq!(all.submissions.histogram.get(Status::Diinput), 2);

        view.set_filter(DashboardFilter {
            year: "2024".into(),
            kelurahan: "all".into(),
        });
        let recap = view.recap();
        assert_eq!(recap.students.total, 1);
        assert_eq!(recap.submissions.total, 1);
    }

    #[tokio::test]
    async fn one_failed_collection_does_not_hide_the_others() {
        let store = MemoryStore::new();
        store.seed(STUDENTS, vec![json!({"nama_ayah": "A", "created_at": "2024-01-01T00:00:00Z"})]);
        store.fail_call(StoreOp::Select, 3, AppError::new(STORE_ERROR, "timeout"));
        let mut view = DashboardView::new(ViewContext::new(Arc::new(store)));
        let err = view.load().await.expect_err("one read failed");
        assert_eq!(err.message(), "timeout");
        assert_eq!(view.years(), vec!["2024"]);
    }
}
