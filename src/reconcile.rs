//! Writes that keep a view's local copy in step with the remote store.
//!
//! Full-record writes validate locally, run a duplicate-check read, write,
//! and only then touch local state. A failure at any step leaves local state
//! as it was and hands back the store's error unchanged.

use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::error::{
    AppError, AppResult, CONFIRM_REQUIRED, DUPLICATE_PENGAJUAN, DUPLICATE_STUDENT,
    STORE_DECODE,
};
use crate::join::KelurahanIndex;
use crate::model::{
    submission_payload, RecordId, Student, StudentForm, Submission, PENGAJUAN, STUDENTS,
};
use crate::store::{RecordStore, Select};
use crate::validate;

/// Proof that the user confirmed a destructive action. Deletes take an
/// `Option<Confirmation>` and send nothing without one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Confirmation(());

impl Confirmation {
    pub fn granted() -> Self {
        Confirmation(())
    }
}

pub fn require_confirmation(confirm: Option<Confirmation>, what: &str) -> AppResult<Confirmation> {
    confirm.ok_or_else(|| {
        AppError::new(CONFIRM_REQUIRED, "Tindakan ini memerlukan konfirmasi")
            .with_context("target", what.to_string())
    })
}

/// Rows of `collection` whose columns equal all of `keys`.
async fn matching_ids(
    store: &dyn RecordStore,
    collection: &str,
    keys: &[(&str, &str)],
) -> AppResult<Vec<RecordId>> {
    let mut query = Select::from(collection).columns(&["id"]);
    for (column, value) in keys {
        query = query.eq(column, value.to_string());
    }
    let rows = store.select(&query).await?;
    Ok(rows
        .iter()
        .filter_map(|row| row.get("id").and_then(RecordId::from_value))
        .collect())
}

/// A student is identified by (nama_siswa, nama_ibu). While editing, the
/// edited record itself is not a conflict.
pub async fn check_duplicate_student(
    store: &dyn RecordStore,
    nama_siswa: &str,
    nama_ibu: &str,
    editing: Option<&RecordId>,
) -> AppResult<()> {
    let ids = matching_ids(
        store,
        STUDENTS,
        &[("nama_siswa", nama_siswa), ("nama_ibu", nama_ibu)],
    )
    .await?;
    let conflict = ids.iter().any(|id| Some(id) != editing);
    if conflict {
        return Err(AppError::new(
            DUPLICATE_STUDENT,
            format!(
                "Data siswa dengan nama \"{nama_siswa}\" dan nama ibu \"{nama_ibu}\" sudah ada."
            ),
        )
        .with_context("nama_siswa", nama_siswa.to_string())
        .with_context("nama_ibu", nama_ibu.to_string()));
    }
    Ok(())
}

/// One pengajuan per (nama_siswa, nama_ibu, tahun).
pub async fn check_duplicate_pengajuan(
    store: &dyn RecordStore,
    nama_siswa: &str,
    nama_ibu: &str,
    tahun: &str,
) -> AppResult<()> {
    let ids = matching_ids(
        store,
        PENGAJUAN,
        &[
            ("nama_siswa", nama_siswa),
            ("nama_ibu", nama_ibu),
            ("tahun", tahun),
        ],
    )
    .await?;
    if !ids.is_empty() {
        return Err(AppError::new(
            DUPLICATE_PENGAJUAN,
            format!("Siswa {nama_siswa} sudah terdaftar di pengajuan tahun {tahun}."),
        )
        .with_context("nama_siswa", nama_siswa.to_string())
        .with_context("nama_ibu", nama_ibu.to_string())
        .with_context("tahun", tahun.to_string()));
    }
    Ok(())
}

fn apply_form(student: &mut Student, form: &StudentForm, index: &KelurahanIndex) {
    student.nama_siswa = form.nama_siswa.clone();
    student.nama_sekolah = form.nama_sekolah.clone();
    student.kelas = form.kelas.clone();
    student.nama_ayah = form.nama_ayah.clone();
    student.nama_ibu = form.nama_ibu.clone();
    student.rt = form.rt.clone();
    student.rw = form.rw.clone();
    student.no_wa = form.no_wa.clone();
    student.keterangan = if form.keterangan.is_empty() {
        None
    } else {
        Some(form.keterangan.clone())
    };
    student.kelurahan_id = RecordId::parse(&form.kelurahan_id);
    student.kelurahan = index.resolve(student.kelurahan_id.as_ref());
}

fn first_row<T: serde::de::DeserializeOwned>(rows: Vec<Value>, collection: &str) -> AppResult<T> {
    let row = rows.into_iter().next().ok_or_else(|| {
        AppError::new(STORE_DECODE, "Store returned no row for the write")
            .with_context("collection", collection.to_string())
    })?;
    Ok(serde_json::from_value(row)?)
}

/// Create (`existing == None`) or update a student. Returns the record as it
/// should now appear locally, with its kelurahan name resolved.
pub async fn save_student(
    store: &dyn RecordStore,
    existing: Option<&Student>,
    form: &StudentForm,
    index: &KelurahanIndex,
) -> AppResult<Student> {
    validate::student_form(form)?;
    check_duplicate_student(
        store,
        &form.nama_siswa,
        &form.nama_ibu,
        existing.map(|s| &s.id),
    )
    .await?;

    match existing {
        Some(current) => {
            store
                .update(STUDENTS, &current.id, form.to_payload())
                .await?;
            let mut updated = current.clone();
            apply_form(&mut updated, form, index);
            info!(target: "pipadmin", event = "student_updated", id = %updated.id);
            Ok(updated)
        }
        None => {
            let rows = store.insert(STUDENTS, vec![form.to_payload()]).await?;
            let mut created: Student = first_row(rows, STUDENTS)?;
            created.kelurahan = index.resolve(created.kelurahan_id.as_ref());
            info!(target: "pipadmin", event = "student_created", id = %created.id);
            Ok(created)
        }
    }
}

/// New pengajuan for `student` in `tahun`, copied from the student record.
pub async fn submit_pengajuan(
    store: &dyn RecordStore,
    student: &Student,
    tahun: &str,
    index: &KelurahanIndex,
) -> AppResult<Submission> {
    validate::required("tahun", tahun)?;
    check_duplicate_pengajuan(store, &student.nama_siswa, &student.nama_ibu, tahun).await?;
    let rows = store
        .insert(PENGAJUAN, vec![submission_payload(student, tahun)])
        .await?;
    let mut created: Submission = first_row(rows, PENGAJUAN)?;
    created.kelurahan = index.resolve(created.kelurahan_id.as_ref());
    info!(
        target: "pipadmin",
        event = "pengajuan_created",
        id = %created.id,
        tahun = %tahun
    );
    Ok(created)
}

pub async fn delete_record(
    store: &dyn RecordStore,
    collection: &str,
    id: &RecordId,
    confirm: Option<Confirmation>,
) -> AppResult<()> {
    require_confirmation(confirm, collection)?;
    store.delete(collection, id).await?;
    info!(target: "pipadmin", event = "record_deleted", collection = %collection, id = %id);
    Ok(())
}

/// Column edited in place on a submission row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LiveField {
    Status,
    Deskripsi,
}

impl LiveField {
    pub fn column(self) -> &'static str {
        match self {
            LiveField::Status => "status_pengajuan",
            LiveField::Deskripsi => "deskripsi",
        }
    }

    pub fn apply(self, submission: &mut Submission, value: &str) {
        let slot = match self {
            LiveField::Status => &mut submission.status_pengajuan,
            LiveField::Deskripsi => &mut submission.deskripsi,
        };
        *slot = Some(value.to_string());
    }

    pub fn patch(self, value: &str) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert(self.column().into(), Value::String(value.to_string()));
        map
    }
}

/// Log a write failure before it is handed back to the caller.
pub(crate) fn report_failure(err: &AppError, event: &'static str) {
    if err.is_validation() || err.is_duplicate() {
        warn!(target: "pipadmin", event = event, code = %err.code(), message = %err.message());
    } else {
        err.log_with_event(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Kelurahan;
    use crate::store::memory::{MemoryStore, StoreOp};
    use serde_json::json;

    fn index() -> KelurahanIndex {
        KelurahanIndex::new(&[Kelurahan {
            id: RecordId::Int(1),
            name: "Pasirjati".into(),
        }])
    }

    fn form(nama: &str, ibu: &str) -> StudentForm {
        StudentForm {
            nama_siswa: nama.into(),
            nama_sekolah: "SDN 1".into(),
            kelas: "3".into(),
            nama_ayah: "AYAH".into(),
            nama_ibu: ibu.into(),
            rt: "2".into(),
            rw: "4".into(),
            kelurahan_id: "1".into(),
            no_wa: "081234".into(),
            ..StudentForm::default()
        }
    }

    #[tokio::test]
    async fn validation_failures_never_reach_the_store() {
        let store = MemoryStore::new();
        let mut bad = form("ANI", "SARI");
        bad.rt = "02".into();
        let err = save_student(&store, None, &bad, &index())
            .await
            .expect_err("invalid rt");
        assert!(err.is_validation());
        assert_eq!(store.calls(StoreOp::Select), 0);
        assert_eq!(store.calls(StoreOp::Insert), 0);
    }

    #[tokio::test]
    async fn duplicate_student_is_named_but_self_match_is_not() {
        let store = MemoryStore::new();
        store.seed(STUDENTS, vec![json!({"id": 9, "nama_siswa": "ANI", "nama_ibu": "SARI", "kelurahan_id": 1})]);

        let err = save_student(&store, None, &form("ANI", "SARI"), &index())
            .await
            .expect_err("duplicate");
        assert_eq!(err.code(), DUPLICATE_STUDENT);
        assert_eq!(store.calls(StoreOp::Insert), 0);

        let existing: Student =
            serde_json::from_value(store.rows(STUDENTS)[0].clone()).expect("decode");
        let mut edit = form("ANI", "SARI");
        edit.kelas = "5".into();
        let saved = save_student(&store, Some(&existing), &edit, &index())
            .await
            .expect("self match allowed");
        assert_eq!(saved.kelas, "5");
        assert_eq!(saved.kelurahan_name(), Some("Pasirjati"));
    }

    #[tokio::test]
    async fn insert_returns_stored_row_with_kelurahan() {
        let store = MemoryStore::new();
        let created = save_student(&store, None, &form("BUDI", "RINA"), &index())
            .await
            .expect("insert");
        assert_eq!(created.id, RecordId::Int(1));
        assert_eq!(created.kelurahan_name(), Some("Pasirjati"));
        assert_eq!(store.rows(STUDENTS)[0]["keterangan"], Value::Null);
    }

    #[tokio::test]
    async fn delete_without_confirmation_sends_nothing() {
        let store = MemoryStore::new();
        let err = delete_record(&store, STUDENTS, &RecordId::Int(1), None)
            .await
            .expect_err("needs confirmation");
        assert_eq!(err.code(), CONFIRM_REQUIRED);
        assert_eq!(store.calls(StoreOp::Delete), 0);
        delete_record(&store, STUDENTS, &RecordId::Int(1), Some(Confirmation::granted()))
            .await
            .expect("confirmed");
        assert_eq!(store.calls(StoreOp::Delete), 1);
    }

    #[test]
    fn live_fields_patch_their_column() {
        let mut submission: Submission =
            serde_json::from_value(json!({"id": 1, "status_pengajuan": null})).expect("decode");
        LiveField::Status.apply(&mut submission, "Diinput");
        assert_eq!(submission.status_pengajuan.as_deref(), Some("Diinput"));
        assert_eq!(
            LiveField::Deskripsi.patch("catatan").get("deskripsi"),
            Some(&json!("catatan"))
        );
    }
}
