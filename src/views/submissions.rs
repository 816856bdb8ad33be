use std::collections::HashSet;

use tracing::{info, warn};

use super::{settle, ViewContext};
use crate::error::{AppError, AppResult, STORE_NOT_FOUND};
use crate::filter::{suggest_students, Page, SubmissionFilter, SUBMISSIONS_PER_PAGE};
use crate::join::KelurahanIndex;
use crate::model::{Kelurahan, RecordId, Status, Student, Submission, PENGAJUAN, STUDENTS};
use crate::reconcile::{self, Confirmation, LiveField};
use crate::store::{Embed, Select};

/// Submission table of the admin panel, with in-place status and note edits.
pub struct SubmissionsView {
    ctx: ViewContext,
    submissions: Vec<Submission>,
    students: Vec<Student>,
    kelurahan: Vec<Kelurahan>,
    index: KelurahanIndex,
    filter: SubmissionFilter,
    page: Page,
    pending: HashSet<(RecordId, LiveField)>,
}

impl SubmissionsView {
    pub fn new(ctx: ViewContext) -> Self {
        Self {
            ctx,
            submissions: Vec::new(),
            students: Vec::new(),
            kelurahan: Vec::new(),
            index: KelurahanIndex::default(),
            filter: SubmissionFilter::default(),
            page: Page::new(SUBMISSIONS_PER_PAGE),
            pending: HashSet::new(),
        }
    }

    pub fn query() -> Select {
        Select::from(PENGAJUAN)
            .embed(Embed::kelurahan_name())
            .order("created_at", false)
    }

    pub async fn load(&mut self) -> AppResult<()> {
        let resynced = self.resync().await;
        let students = self
            .ctx
            .fetch::<Student>(&Select::from(STUDENTS).order("nama_siswa", true))
            .await;
        let listed = settle(students, &mut self.students);
        let joined = self
            .ctx
            .reload_kelurahan(&mut self.kelurahan, &mut self.index)
            .await;
        resynced.and(listed).and(joined)
    }

    /// Replace the local submissions with the store's current rows.
    pub async fn resync(&mut self) -> AppResult<()> {
        let outcome = self.ctx.fetch::<Submission>(&Self::query()).await;
        info!(
            target: "pipadmin",
            event = "pengajuan_resync",
            rows = outcome.rows.len(),
            requests = outcome.requests
        );
        self.pending.clear();
        settle(outcome, &mut self.submissions)
    }

    pub fn submissions(&self) -> &[Submission] {
        &self.submissions
    }

    pub fn kelurahan(&self) -> &[Kelurahan] {
        &self.kelurahan
    }

    pub fn students(&self) -> &[Student] {
        &self.students
    }

    pub fn find_student(&self, id: &RecordId) -> Option<&Student> {
        self.students.iter().find(|s| &s.id == id)
    }

    pub fn find(&self, id: &RecordId) -> Option<&Submission> {
        self.submissions.iter().find(|s| &s.id == id)
    }

    pub fn is_pending(&self, id: &RecordId) -> bool {
        self.pending.iter().any(|(pending, _)| pending == id)
    }

    pub fn set_filter(&mut self, filter: SubmissionFilter) {
        if filter != self.filter {
            self.filter = filter;
            self.page.reset();
        }
    }

    pub fn filtered(&self) -> Vec<&Submission> {
        self.filter.to_filter_set().apply_ref(&self.submissions)
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    pub fn total_pages(&self) -> usize {
        self.page.total_pages(self.filtered().len())
    }

    pub fn change_page(&mut self, page: usize) -> bool {
        let len = self.filtered().len();
        self.page.change(page, len)
    }

    pub fn current_page(&self) -> Vec<&Submission> {
        let filtered = self.filtered();
        self.page.slice(&filtered).to_vec()
    }

    /// Student typeahead for a new pengajuan.
    pub fn suggest(&self, query: &str) -> Vec<&Student> {
        suggest_students(&self.students, query)
    }

    pub async fn add(&mut self, student: &Student, tahun: &str) -> AppResult<Submission> {
        let created = reconcile::submit_pengajuan(self.ctx.store(), student, tahun, &self.index)
            .await
            .inspect_err(|err| reconcile::report_failure(err, "pengajuan_add_failed"))?;
        self.submissions.insert(0, created.clone());
        Ok(created)
    }

    pub async fn set_status(&mut self, id: &RecordId, status: Status) -> AppResult<()> {
        self.live_edit(id, LiveField::Status, status.label()).await
    }

    pub async fn set_deskripsi(&mut self, id: &RecordId, text: &str) -> AppResult<()> {
        self.live_edit(id, LiveField::Deskripsi, text).await
    }

    /// Local-only note edit while the user is typing. The row stays pending
    /// until [`Self::commit_deskripsi`] runs.
    pub fn edit_deskripsi_local(&mut self, id: &RecordId, text: &str) -> AppResult<()> {
        self.stage(id, LiveField::Deskripsi, text)
    }

    pub async fn commit_deskripsi(&mut self, id: &RecordId) -> AppResult<()> {
        let text = self
            .find(id)
            .and_then(|s| s.deskripsi.clone())
            .unwrap_or_default();
        self.live_edit(id, LiveField::Deskripsi, &text).await
    }

    fn stage(&mut self, id: &RecordId, field: LiveField, value: &str) -> AppResult<()> {
        let row = self
            .submissions
            .iter_mut()
            .find(|s| &s.id == id)
            .ok_or_else(|| {
                AppError::new(STORE_NOT_FOUND, "Pengajuan tidak ditemukan")
                    .with_context("id", id.to_string())
            })?;
        field.apply(row, value);
        self.pending.insert((id.clone(), field));
        Ok(())
    }

    /// Patch locally first, then write. On a remote error the whole
    /// collection is refetched so the row shows the store's value again.
    async fn live_edit(&mut self, id: &RecordId, field: LiveField, value: &str) -> AppResult<()> {
        self.stage(id, field, value)?;
        match self
            .ctx
            .store()
            .update(PENGAJUAN, id, field.patch(value))
            .await
        {
            Ok(()) => {
                self.pending.remove(&(id.clone(), field));
                Ok(())
            }
            Err(err) => {
                reconcile::report_failure(&err, "live_edit_failed");
                if let Err(resync_err) = self.resync().await {
                    warn!(
                        target: "pipadmin",
                        event = "live_edit_resync_failed",
                        code = %resync_err.code(),
                        error = %resync_err.message()
                    );
                    return Err(err.with_cause(resync_err));
                }
                Err(err)
            }
        }
    }

    pub async fn delete(&mut self, id: &RecordId, confirm: Option<Confirmation>) -> AppResult<()> {
        reconcile::delete_record(self.ctx.store(), PENGAJUAN, id, confirm)
            .await
            .inspect_err(|err| reconcile::report_failure(err, "pengajuan_delete_failed"))?;
        self.resync().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CONFIRM_REQUIRED, DUPLICATE_PENGAJUAN, STORE_ERROR};
    use crate::model::KELURAHAN;
    use crate::store::memory::{MemoryStore, StoreOp};
    use serde_json::json;
    use std::sync::Arc;

    fn seeded() -> Arc<MemoryStore> {
        let store = MemoryStore::new();
        store.seed(KELURAHAN, vec![json!({"id": 1, "name": "Pasirjati"})]);
        store.seed(
            STUDENTS,
            vec![json!({"id": 1, "nama_siswa": "ANI", "nama_ibu": "SARI", "kelurahan_id": 1, "keterangan": ""})],
        );
        store.seed(
            PENGAJUAN,
            (1..=12)
                .map(|i| json!({"tahun": "2024", "nama_siswa": format!("P{i}"), "nama_ibu": "X",
                    "status_pengajuan": "Menunggu", "kelurahan_id": 1,
                    "created_at": format!("2024-02-{:02}T00:00:00Z", i)}))
                .collect(),
        );
        Arc::new(store)
    }

    #[tokio::test]
    async fn add_rejects_duplicate_year() {
        let store = seeded();
        let mut view = SubmissionsView::new(ViewContext::new(store.clone()));
        view.load().await.expect("load");
        let student = view.suggest("an")[0].clone();

        let created = view.add(&student, "2025").await.expect("first");
        assert_eq!(created.display_status(), Status::Menunggu);
        assert_eq!(created.deskripsi.as_deref(), Some(""));
        assert_eq!(created.keterangan, None);
        assert_eq!(created.kelurahan_name(), Some("Pasirjati"));
        assert_eq!(view.submissions()[0].id, created.id);

        let err = view.add(&student, "2025").await.expect_err("duplicate");
        assert_eq!(err.code(), DUPLICATE_PENGAJUAN);
        assert_eq!(view.submissions().len(), 13);
        assert_eq!(store.calls(StoreOp::Insert), 1);
    }

    #[tokio::test]
    async fn failed_resync_still_loads_students_and_kelurahan() {
        let store = seeded();
        store.fail_call(StoreOp::Select, 1, AppError::new(STORE_ERROR, "JWT expired"));
        let mut view = SubmissionsView::new(ViewContext::new(store.clone()));
        let err = view.load().await.expect_err("pengajuan read fails");
        assert_eq!(err.message(), "JWT expired");
        assert!(view.submissions().is_empty());
        assert_eq!(view.students().len(), 1);
        assert_eq!(view.kelurahan().len(), 1);

        let student = view.students()[0].clone();
        let created = view.add(&student, "2026").await.expect("submit");
        assert_eq!(created.kelurahan_name(), Some("Pasirjati"));
    }

    #[tokio::test]
    async fn status_edit_commits_and_clears_pending() {
        let store = seeded();
        let mut view = SubmissionsView::new(ViewContext::new(store.clone()));
        view.load().await.expect("load");
        let id = view.submissions()[0].id.clone();
        view.set_status(&id, Status::SudahSk).await.expect("edit");
        assert!(!view.is_pending(&id));
        assert_eq!(view.find(&id).map(|s| s.display_status()), Some(Status::SudahSk));
        let stored = store
            .rows(PENGAJUAN)
            .into_iter()
            .find(|r| r["id"] == id.to_value())
            .expect("row");
        assert_eq!(stored["status_pengajuan"], json!("Sudah SK"));
    }

    #[tokio::test]
    async fn deskripsi_is_staged_then_committed() {
        let store = seeded();
        let mut view = SubmissionsView::new(ViewContext::new(store.clone()));
        view.load().await.expect("load");
        let id = view.submissions()[1].id.clone();
        view.edit_deskripsi_local(&id, "berkas kurang").expect("stage");
        assert!(view.is_pending(&id));
        assert_eq!(store.calls(StoreOp::Update), 0);
        view.commit_deskripsi(&id).await.expect("commit");
        assert!(!view.is_pending(&id));
        assert_eq!(store.calls(StoreOp::Update), 1);
    }

    #[tokio::test]
    async fn delete_requires_confirmation_then_resyncs() {
        let store = seeded();
        let mut view = SubmissionsView::new(ViewContext::new(store.clone()));
        view.load().await.expect("load");
        let id = view.submissions()[0].id.clone();
        let err = view.delete(&id, None).await.expect_err("unconfirmed");
        assert_eq!(err.code(), CONFIRM_REQUIRED);
        assert_eq!(view.submissions().len(), 12);
        view.delete(&id, Some(Confirmation::granted())).await.expect("delete");
        assert_eq!(view.submissions().len(), 11);
        assert!(view.find(&id).is_none());
    }

    #[tokio::test]
    async fn filters_page_by_ten() {
        let store = seeded();
        let mut view = SubmissionsView::new(ViewContext::new(store));
        view.load().await.expect("load");
        assert_eq!(view.total_pages(), 2);
        assert!(view.change_page(2));
        assert_eq!(view.current_page().len(), 2);
        view.set_filter(SubmissionFilter {
            nama_siswa: "p1".into(),
            ..SubmissionFilter::default()
        });
        assert_eq!(view.page().current(), 1);
        // P1, P10, P11, P12
        assert_eq!(view.filtered().len(), 4);
    }
}
