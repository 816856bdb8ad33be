use serde_json::{Map, Value};
use tracing::info;

use super::{settle, ViewContext};
use crate::error::{AppError, AppResult, STORE_NOT_FOUND};
use crate::filter::{Page, StudentFilter, STUDENTS_PER_PAGE};
use crate::import::{self, ImportOutcome};
use crate::join::KelurahanIndex;
use crate::model::{Kelurahan, RecordId, Student, StudentForm, STUDENTS};
use crate::reconcile::{self, Confirmation};
use crate::store::{Embed, Select};

/// Student table of the admin panel.
pub struct StudentsView {
    ctx: ViewContext,
    students: Vec<Student>,
    kelurahan: Vec<Kelurahan>,
    index: KelurahanIndex,
    filter: StudentFilter,
    page: Page,
}

impl StudentsView {
    pub fn new(ctx: ViewContext) -> Self {
        Self {
            ctx,
            students: Vec::new(),
            kelurahan: Vec::new(),
            index: KelurahanIndex::default(),
            filter: StudentFilter::default(),
            page: Page::new(STUDENTS_PER_PAGE),
        }
    }

    pub fn query() -> Select {
        Select::from(STUDENTS)
            .embed(Embed::kelurahan_name())
            .order("created_at", false)
    }

    /// Reload students (newest first) and the kelurahan dropdown. Students
    /// that arrived before a failed page are kept and the dropdown is still
    /// refreshed.
    pub async fn load(&mut self) -> AppResult<()> {
        let outcome = self.ctx.fetch::<Student>(&Self::query()).await;
        info!(
            target: "pipadmin",
            event = "students_loaded",
            rows = outcome.rows.len(),
            requests = outcome.requests
        );
        let listed = settle(outcome, &mut self.students);
        let joined = self
            .ctx
            .reload_kelurahan(&mut self.kelurahan, &mut self.index)
            .await;
        listed.and(joined)
    }

    pub fn students(&self) -> &[Student] {
        &self.students
    }

    pub fn kelurahan(&self) -> &[Kelurahan] {
        &self.kelurahan
    }

    pub fn filter(&self) -> &StudentFilter {
        &self.filter
    }

    /// Changing any filter input returns to the first page.
    pub fn set_filter(&mut self, filter: StudentFilter) {
        if filter != self.filter {
            self.filter = filter;
            self.page.reset();
        }
    }

    pub fn filtered(&self) -> Vec<&Student> {
        self.filter.to_filter_set().apply_ref(&self.students)
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

    pub fn current_page(&self) -> Vec<&Student> {
        let filtered = self.filtered();
        self.page.slice(&filtered).to_vec()
    }

    pub fn find(&self, id: &RecordId) -> Option<&Student> {
        self.students.iter().find(|s| &s.id == id)
    }

    /// Add (`editing == None`) or update a student.
    pub async fn save(&mut self, editing: Option<&RecordId>, form: StudentForm) -> AppResult<Student> {
        let existing = match editing {
            Some(id) => Some(self.find(id).cloned().ok_or_else(|| {
                AppError::new(STORE_NOT_FOUND, "Siswa tidak ditemukan")
                    .with_context("id", id.to_string())
            })?),
            None => None,
        };
        let saved = reconcile::save_student(self.ctx.store(), existing.as_ref(), &form, &self.index)
            .await
            .inspect_err(|err| reconcile::report_failure(err, "student_save_failed"))?;
        match self.students.iter_mut().find(|s| s.id == saved.id) {
            Some(slot) => *slot = saved.clone(),
            None => self.students.insert(0, saved.clone()),
        }
        Ok(saved)
    }

    pub async fn delete(&mut self, id: &RecordId, confirm: Option<Confirmation>) -> AppResult<()> {
        reconcile::delete_record(self.ctx.store(), STUDENTS, id, confirm)
            .await
            .inspect_err(|err| reconcile::report_failure(err, "student_delete_failed"))?;
        self.students.retain(|s| &s.id != id);
        Ok(())
    }

    /// Bulk import from header-keyed rows, then reload.
    pub async fn import(&mut self, rows: &[Map<String, Value>]) -> AppResult<ImportOutcome> {
        let plan = import::plan_import(rows, &self.kelurahan);
        let outcome = import::execute_import(self.ctx.store(), &plan).await?;
        if outcome.inserted > 0 {
            self.load().await?;
        }
        Ok(outcome)
    }
}
