use tracing::info;

use super::{settle, ViewContext};
use crate::error::{AppError, AppResult, STORE_NOT_FOUND};
use crate::filter::suggest_students;
use crate::join::KelurahanIndex;
use crate::model::{
    decode_rows, Kelurahan, RecordId, Student, StudentForm, Submission, SubmissionHistory,
    PENGAJUAN, STUDENTS,
};
use crate::reconcile;
use crate::session::{load_identity, Identity, SessionProvider};
use crate::store::{Embed, Select};

/// Public pengajuan page: find a student, review their history, edit the
/// record and submit for a year.
pub struct SearchView {
    ctx: ViewContext,
    students: Vec<Student>,
    kelurahan: Vec<Kelurahan>,
    index: KelurahanIndex,
    identity: Option<Identity>,
    selected: Option<Student>,
    history: Vec<SubmissionHistory>,
}

impl SearchView {
    pub fn new(ctx: ViewContext) -> Self {
        Self {
            ctx,
            students: Vec::new(),
            kelurahan: Vec::new(),
            index: KelurahanIndex::default(),
            identity: None,
            selected: None,
            history: Vec::new(),
        }
    }

    pub async fn load(&mut self, session: &dyn SessionProvider) -> AppResult<()> {
        let query = Select::from(STUDENTS)
            .embed(Embed::kelurahan_name())
            .order("nama_siswa", true);
        let outcome = self.ctx.fetch::<Student>(&query).await;
        info!(
            target: "pipadmin",
            event = "search_students_loaded",
            rows = outcome.rows.len(),
            requests = outcome.requests
        );
        let listed = settle(outcome, &mut self.students);
        let joined = self
            .ctx
            .reload_kelurahan(&mut self.kelurahan, &mut self.index)
            .await;
        let identified = load_identity(self.ctx.store(), session)
            .await
            .map(|identity| self.identity = identity);
        listed.and(joined).and(identified)
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn students(&self) -> &[Student] {
        &self.students
    }

    pub fn kelurahan(&self) -> &[Kelurahan] {
        &self.kelurahan
    }

    pub fn suggest(&self, query: &str) -> Vec<&Student> {
        suggest_students(&self.students, query)
    }

    pub fn selected(&self) -> Option<&Student> {
        self.selected.as_ref()
    }

    pub fn history(&self) -> &[SubmissionHistory] {
        &self.history
    }

    /// Select a student and load their submission history.
    pub async fn select(&mut self, id: &RecordId) -> AppResult<&[SubmissionHistory]> {
        let student = self
            .students
            .iter()
            .find(|s| &s.id == id)
            .cloned()
            .ok_or_else(|| {
                AppError::new(STORE_NOT_FOUND, "Siswa tidak ditemukan")
                    .with_context("id", id.to_string())
            })?;
        self.history.clear();
        self.selected = Some(student);
        self.refresh_history().await?;
        Ok(&self.history)
    }

    async fn refresh_history(&mut self) -> AppResult<()> {
        let Some(student) = &self.selected else {
            return Ok(());
        };
        let query = Select::from(PENGAJUAN)
            .columns(&["id", "created_at", "tahun", "status_pengajuan", "deskripsi"])
            .eq("nama_siswa", student.nama_siswa.clone())
            .eq("nama_ibu", student.nama_ibu.clone())
            .order("created_at", false);
        let rows = self.ctx.store().select(&query).await?;
        self.history = decode_rows(rows)?;
        Ok(())
    }

    /// Save edits to the selected student and patch it everywhere it is shown.
    pub async fn save_selected(&mut self, form: &StudentForm) -> AppResult<Student> {
        let current = self.selected.clone().ok_or_else(|| {
            AppError::new(STORE_NOT_FOUND, "Belum ada siswa yang dipilih")
        })?;
        let saved = reconcile::save_student(self.ctx.store(), Some(&current), form, &self.index)
            .await
            .inspect_err(|err| reconcile::report_failure(err, "student_save_failed"))?;
        if let Some(slot) = self.students.iter_mut().find(|s| s.id == saved.id) {
            *slot = saved.clone();
        }
        self.selected = Some(saved.clone());
        Ok(saved)
    }

    /// Submit the selected student for `tahun`, then reload the history.
    pub async fn submit(&mut self, tahun: &str) -> AppResult<Submission> {
        let student = self.selected.clone().ok_or_else(|| {
            AppError::new(STORE_NOT_FOUND, "Belum ada siswa yang dipilih")
        })?;
        let created = reconcile::submit_pengajuan(self.ctx.store(), &student, tahun, &self.index)
            .await
            .inspect_err(|err| reconcile::report_failure(err, "pengajuan_submit_failed"))?;
        self.refresh_history().await?;
        Ok(created)
    }

    /// New-student entry. Names are stored upper case and the record is
    /// placed in name order so it shows up in suggestions right away.
    pub async fn add_new(&mut self, form: StudentForm) -> AppResult<Student> {
        let form = form.uppercased();
        let created = reconcile::save_student(self.ctx.store(), None, &form, &self.index)
            .await
            .inspect_err(|err| reconcile::report_failure(err, "student_add_failed"))?;
        let at = self
            .students
            .partition_point(|s| s.nama_siswa <= created.nama_siswa);
        self.students.insert(at, created.clone());
        Ok(created)
    }
}
