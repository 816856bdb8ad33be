use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{AppError, AppResult, VALIDATION_NUMERIC, VALIDATION_REQUIRED};
use crate::model::{RecordId, Role, StudentForm};

/// Whole number without a leading zero.
static POSITIVE_NUMBER_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[1-9][0-9]*$").expect("positive number validation pattern to compile")
});

pub fn is_positive_number(value: &str) -> bool {
    POSITIVE_NUMBER_PATTERN.is_match(value)
}

/// Empty is allowed; anything else must be a positive whole number.
pub fn numeric_field(field: &str, value: &str) -> AppResult<()> {
    if value.is_empty() || is_positive_number(value) {
        Ok(())
    } else {
        Err(
            AppError::new(VALIDATION_NUMERIC, format!("{field} harus berupa angka tanpa awalan 0"))
                .with_context("field", field.to_string())
                .with_context("value", value.to_string()),
        )
    }
}

pub fn required(field: &str, value: &str) -> AppResult<()> {
    if value.trim().is_empty() {
        Err(AppError::new(VALIDATION_REQUIRED, format!("{field} wajib diisi"))
            .with_context("field", field.to_string()))
    } else {
        Ok(())
    }
}

pub fn required_kelurahan(kelurahan_id: &str) -> AppResult<RecordId> {
    RecordId::parse(kelurahan_id).ok_or_else(|| {
        AppError::new(VALIDATION_REQUIRED, "Silakan pilih kelurahan")
            .with_context("field", "kelurahan_id")
    })
}

/// Checks run before any student write reaches the store. Only the note
/// may be left blank.
pub fn student_form(form: &StudentForm) -> AppResult<()> {
    for (field, value) in [
        ("nama_siswa", &form.nama_siswa),
        ("nama_sekolah", &form.nama_sekolah),
        ("kelas", &form.kelas),
        ("no_wa", &form.no_wa),
        ("nama_ayah", &form.nama_ayah),
        ("nama_ibu", &form.nama_ibu),
        ("rt", &form.rt),
        ("rw", &form.rw),
    ] {
        required(field, value)?;
    }
    required_kelurahan(&form.kelurahan_id)?;
    numeric_field("kelas", &form.kelas)?;
    numeric_field("rt", &form.rt)?;
    numeric_field("rw", &form.rw)?;
    Ok(())
}

/// Profile fields collected by the user management form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileForm {
    pub nama: String,
    pub email: String,
    pub role: String,
    pub kelurahan_id: String,
}

impl ProfileForm {
    pub fn validate(&self) -> AppResult<Role> {
        required("nama", &self.nama)?;
        required("email", &self.email)?;
        required("role", &self.role)?;
        self.role.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_rule_rejects_leading_zero_and_text() {
        assert!(is_positive_number("12"));
        assert!(!is_positive_number("012"));
        assert!(!is_positive_number("0"));
        assert!(!is_positive_number("3a"));
        assert!(numeric_field("rt", "").is_ok());
        let err = numeric_field("rw", "05").expect_err("leading zero");
        assert_eq!(err.code(), VALIDATION_NUMERIC);
        assert_eq!(err.context().get("field"), Some(&"rw".to_string()));
    }

    fn complete_form() -> StudentForm {
        StudentForm {
            nama_siswa: "ANI".into(),
            nama_sekolah: "SDN 2".into(),
            kelas: "4".into(),
            nama_ayah: "DEDI".into(),
            nama_ibu: "SARI".into(),
            rt: "3".into(),
            rw: "1".into(),
            kelurahan_id: "2".into(),
            no_wa: "0812".into(),
            keterangan: String::new(),
        }
    }

    #[test]
    fn complete_form_passes_with_blank_note() {
        assert!(student_form(&complete_form()).is_ok());
    }

    #[test]
    fn every_required_student_field_is_checked() {
        let blanks: [(&str, fn(&mut StudentForm)); 8] = [
            ("nama_siswa", |f| f.nama_siswa.clear()),
            ("nama_sekolah", |f| f.nama_sekolah.clear()),
            ("kelas", |f| f.kelas.clear()),
            ("no_wa", |f| f.no_wa = "  ".into()),
            ("nama_ayah", |f| f.nama_ayah.clear()),
            ("nama_ibu", |f| f.nama_ibu.clear()),
            ("rt", |f| f.rt.clear()),
            ("rw", |f| f.rw.clear()),
        ];
        for (field, blank) in blanks {
            let mut form = complete_form();
            blank(&mut form);
            let err = student_form(&form).expect_err(field);
            assert_eq!(err.code(), VALIDATION_REQUIRED);
            assert_eq!(err.context().get("field").map(String::as_str), Some(field));
        }
        let err = student_form(&StudentForm::default()).expect_err("blank form");
        assert_eq!(err.context().get("field").map(String::as_str), Some("nama_siswa"));
    }

    #[test]
    fn kelurahan_is_required() {
        let form = StudentForm {
            kelurahan_id: String::new(),
            ..complete_form()
        };
        let err = student_form(&form).expect_err("missing kelurahan");
        assert!(err.is_validation());
        assert_eq!(err.context().get("field").map(String::as_str), Some("kelurahan_id"));
    }

    #[test]
    fn numbers_are_checked_after_presence() {
        let form = StudentForm {
            kelas: "04".into(),
            ..complete_form()
        };
        let err = student_form(&form).expect_err("leading zero");
        assert_eq!(err.code(), VALIDATION_NUMERIC);
    }

    #[test]
    fn profile_form_needs_known_role() {
        let form = ProfileForm {
            nama: "Rina".into(),
            email: "rina@example.org".into(),
            role: "bendahara".into(),
            kelurahan_id: String::new(),
        };
        assert!(form.validate().is_err());
        let form = ProfileForm {
            role: "admin kelurahan".into(),
            ..form
        };
        assert_eq!(form.validate().ok(), Some(Role::AdminKelurahan));
    }
}
