//! Record types shared by the views. Field names follow the backend columns.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::{AppError, AppResult, VALIDATION_ROLE, VALIDATION_STATUS};
use crate::join::{self, KelurahanRef};

pub const STUDENTS: &str = "students";
pub const PENGAJUAN: &str = "pengajuan";
pub const KELURAHAN: &str = "kelurahan";
pub const PROFILES: &str = "profiles";

/// Identity of a stored row. Domain tables use integer keys, profiles use the
/// auth user's uuid. Legacy rows sometimes carry a kelurahan *name* in the
/// foreign key column, which also lands in `Text`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    Int(i64),
    Text(String),
}

impl RecordId {
    pub fn to_value(&self) -> Value {
        match self {
            RecordId::Int(id) => Value::from(*id),
            RecordId::Text(id) => Value::String(id.clone()),
        }
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(RecordId::Int),
            Value::String(s) if !s.trim().is_empty() => Some(RecordId::Text(s.clone())),
            _ => None,
        }
    }

    /// Form inputs deliver ids as text; numeric text becomes `Int`.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        Some(
            raw.parse::<i64>()
                .map(RecordId::Int)
                .unwrap_or_else(|_| RecordId::Text(raw.to_string())),
        )
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Int(id) => write!(f, "{id}"),
            RecordId::Text(id) => f.write_str(id),
        }
    }
}

impl From<i64> for RecordId {
    fn from(value: i64) -> Self {
        RecordId::Int(value)
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        RecordId::Text(value.to_string())
    }
}

/// Text columns occasionally come back as numbers or null.
pub(crate) fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s,
        Some(other) => other.to_string(),
    })
}

fn lenient_optional_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

fn lenient_record_id<'de, D>(deserializer: D) -> Result<Option<RecordId>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(RecordId::from_value))
}

/// Fixed submission vocabulary, in display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Status {
    Menunggu,
    Diinput,
    SudahSk,
    DiajukanLain,
    TidakTerdaftar,
    TidakDiajukan,
}

impl Status {
    pub const ALL: [Status; 6] = [
        Status::Menunggu,
        Status::Diinput,
        Status::SudahSk,
        Status::DiajukanLain,
        Status::TidakTerdaftar,
        Status::TidakDiajukan,
    ];

    /// Shown, and written, for a submission whose status is unset.
    pub const DEFAULT: Status = Status::Menunggu;

    pub fn label(self) -> &'static str {
        match self {
            Status::Menunggu => "Menunggu",
            Status::Diinput => "Diinput",
            Status::SudahSk => "Sudah SK",
            Status::DiajukanLain => "Diajukan Lain",
            Status::TidakTerdaftar => "Tidak Terdaftar",
            Status::TidakDiajukan => "Tidak Diajukan",
        }
    }

    /// Case-insensitive lookup after trimming. Anything outside the
    /// vocabulary, including empty text, is `None`.
    pub fn normalize(raw: &str) -> Option<Status> {
        let key = raw.trim().to_lowercase();
        Status::ALL
            .into_iter()
            .find(|status| status.label().to_lowercase() == key)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Status {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Status::normalize(s).ok_or_else(|| {
            AppError::new(VALIDATION_STATUS, "Status pengajuan tidak dikenal")
                .with_context("status", s.to_string())
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    SuperAdmin,
    AdminKecamatan,
    AdminKelurahan,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::SuperAdmin => "super admin",
            Role::AdminKecamatan => "admin kecamatan",
            Role::AdminKelurahan => "admin kelurahan",
        }
    }

    /// District-wide roles see the admin panel.
    pub fn can_open_admin(self) -> bool {
        matches!(self, Role::SuperAdmin | Role::AdminKecamatan)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Written as the label stored in `profiles.role`.
impl Serialize for Role {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "super admin" => Ok(Role::SuperAdmin),
            "admin kecamatan" => Ok(Role::AdminKecamatan),
            "admin kelurahan" => Ok(Role::AdminKelurahan),
            other => Err(AppError::new(VALIDATION_ROLE, "Role tidak dikenal")
                .with_context("role", other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Kelurahan {
    pub id: RecordId,
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    pub id: RecordId,
    #[serde(default, deserialize_with = "lenient_string")]
    pub created_at: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub nama_siswa: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub nama_sekolah: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub kelas: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub nama_ayah: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub nama_ibu: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub rt: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub rw: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub no_wa: String,
    #[serde(default, deserialize_with = "lenient_optional_string")]
    pub keterangan: Option<String>,
    #[serde(default, deserialize_with = "lenient_record_id")]
    pub kelurahan_id: Option<RecordId>,
    #[serde(
        default,
        deserialize_with = "join::deserialize_embedded",
        skip_serializing_if = "Option::is_none"
    )]
    pub kelurahan: Option<KelurahanRef>,
}

impl Student {
    pub fn kelurahan_name(&self) -> Option<&str> {
        self.kelurahan.as_ref().map(|k| k.name.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub id: RecordId,
    #[serde(default, deserialize_with = "lenient_string")]
    pub created_at: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub tahun: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub nama_siswa: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub nama_sekolah: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub kelas: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub nama_ayah: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub nama_ibu: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub rt: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub rw: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub no_wa: String,
    #[serde(default, deserialize_with = "lenient_optional_string")]
    pub status_pengajuan: Option<String>,
    #[serde(default, deserialize_with = "lenient_optional_string")]
    pub deskripsi: Option<String>,
    #[serde(default, deserialize_with = "lenient_optional_string")]
    pub keterangan: Option<String>,
    #[serde(default, deserialize_with = "lenient_record_id")]
    pub kelurahan_id: Option<RecordId>,
    #[serde(
        default,
        deserialize_with = "join::deserialize_embedded",
        skip_serializing_if = "Option::is_none"
    )]
    pub kelurahan: Option<KelurahanRef>,
}

impl Submission {
    /// Normalized status, `None` when the raw value is outside the vocabulary.
    pub fn status(&self) -> Option<Status> {
        self.status_pengajuan.as_deref().and_then(Status::normalize)
    }

    /// Status as presented to the user: unset or unknown values show the default.
    pub fn display_status(&self) -> Status {
        self.status().unwrap_or(Status::DEFAULT)
    }

    pub fn kelurahan_name(&self) -> Option<&str> {
        self.kelurahan.as_ref().map(|k| k.name.as_str())
    }
}

/// Row of the submission history shown for one student.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionHistory {
    pub id: RecordId,
    #[serde(default, deserialize_with = "lenient_string")]
    pub created_at: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub tahun: String,
    #[serde(default, deserialize_with = "lenient_optional_string")]
    pub status_pengajuan: Option<String>,
    #[serde(default, deserialize_with = "lenient_optional_string")]
    pub deskripsi: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: RecordId,
    #[serde(default, deserialize_with = "lenient_string")]
    pub nama: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub email: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub role: String,
    #[serde(default, deserialize_with = "lenient_record_id")]
    pub kelurahan_id: Option<RecordId>,
    #[serde(
        default,
        deserialize_with = "join::deserialize_embedded",
        skip_serializing_if = "Option::is_none"
    )]
    pub kelurahan: Option<KelurahanRef>,
}

impl UserProfile {
    pub fn role(&self) -> Option<Role> {
        self.role.parse().ok()
    }
}

/// Editable student fields, as collected by a form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentForm {
    pub nama_siswa: String,
    pub nama_sekolah: String,
    pub kelas: String,
    pub nama_ayah: String,
    pub nama_ibu: String,
    pub rt: String,
    pub rw: String,
    pub kelurahan_id: String,
    pub no_wa: String,
    pub keterangan: String,
}

impl StudentForm {
    pub fn from_student(student: &Student) -> Self {
        Self {
            nama_siswa: student.nama_siswa.clone(),
            nama_sekolah: student.nama_sekolah.clone(),
            kelas: student.kelas.clone(),
            nama_ayah: student.nama_ayah.clone(),
            nama_ibu: student.nama_ibu.clone(),
            rt: student.rt.clone(),
            rw: student.rw.clone(),
            kelurahan_id: student
                .kelurahan_id
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default(),
            no_wa: student.no_wa.clone(),
            keterangan: student.keterangan.clone().unwrap_or_default(),
        }
    }

    /// Column payload for insert/update. An empty note is stored as null.
    pub fn to_payload(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("nama_siswa".into(), Value::String(self.nama_siswa.clone()));
        map.insert(
            "nama_sekolah".into(),
            Value::String(self.nama_sekolah.clone()),
        );
        map.insert("kelas".into(), Value::String(self.kelas.clone()));
        map.insert("nama_ayah".into(), Value::String(self.nama_ayah.clone()));
        map.insert("nama_ibu".into(), Value::String(self.nama_ibu.clone()));
        map.insert("rt".into(), Value::String(self.rt.clone()));
        map.insert("rw".into(), Value::String(self.rw.clone()));
        map.insert(
            "kelurahan_id".into(),
            RecordId::parse(&self.kelurahan_id)
                .map(|id| id.to_value())
                .unwrap_or(Value::Null),
        );
        map.insert("no_wa".into(), Value::String(self.no_wa.clone()));
        map.insert("keterangan".into(), non_empty(&self.keterangan));
        map
    }

    /// Names are kept upper case on new-student entry.
    pub fn uppercased(mut self) -> Self {
        self.nama_siswa = self.nama_siswa.to_uppercase();
        self.nama_sekolah = self.nama_sekolah.to_uppercase();
        self.nama_ayah = self.nama_ayah.to_uppercase();
        self.nama_ibu = self.nama_ibu.to_uppercase();
        self
    }
}

pub(crate) fn non_empty(value: &str) -> Value {
    if value.is_empty() {
        Value::Null
    } else {
        Value::String(value.to_string())
    }
}

/// Insert payload for a new pengajuan copied from the student record.
pub fn submission_payload(student: &Student, tahun: &str) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("tahun".into(), Value::String(tahun.to_string()));
    map.insert("nama_siswa".into(), Value::String(student.nama_siswa.clone()));
    map.insert(
        "nama_sekolah".into(),
        Value::String(student.nama_sekolah.clone()),
    );
    map.insert("kelas".into(), Value::String(student.kelas.clone()));
    map.insert("nama_ayah".into(), Value::String(student.nama_ayah.clone()));
    map.insert("nama_ibu".into(), Value::String(student.nama_ibu.clone()));
    map.insert("rt".into(), Value::String(student.rt.clone()));
    map.insert("rw".into(), Value::String(student.rw.clone()));
    map.insert(
        "kelurahan_id".into(),
        student
            .kelurahan_id
            .as_ref()
            .map(RecordId::to_value)
            .unwrap_or(Value::Null),
    );
    map.insert("no_wa".into(), Value::String(student.no_wa.clone()));
    map.insert(
        "status_pengajuan".into(),
        Value::String(Status::DEFAULT.label().to_string()),
    );
    map.insert("deskripsi".into(), Value::String(String::new()));
    map.insert(
        "keterangan".into(),
        non_empty(student.keterangan.as_deref().unwrap_or("")),
    );
    map
}

/// Decode store rows into typed records.
pub fn decode_rows<T: serde::de::DeserializeOwned>(rows: Vec<Value>) -> AppResult<Vec<T>> {
    rows.into_iter()
        .map(|row| serde_json::from_value(row).map_err(AppError::from))
        .collect()
}
