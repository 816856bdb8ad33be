//! Client-side predicate filtering and pagination over loaded collections.
//!
//! Filtering is a pure function of the record list and the active predicate
//! set. Nothing is cached between evaluations.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::model::{Student, Submission};
use crate::time::year_of;

pub const STUDENTS_PER_PAGE: usize = 100;
pub const SUBMISSIONS_PER_PAGE: usize = 10;

/// Field lookup by column name. Unknown names read as absent.
pub trait Filterable {
    fn field(&self, name: &str) -> Option<Cow<'_, str>>;
}

impl Filterable for Student {
    fn field(&self, name: &str) -> Option<Cow<'_, str>> {
        let text = match name {
            "nama_siswa" => &self.nama_siswa,
            "nama_sekolah" => &self.nama_sekolah,
            "kelas" => &self.kelas,
            "nama_ayah" => &self.nama_ayah,
            "nama_ibu" => &self.nama_ibu,
            "rt" => &self.rt,
            "rw" => &self.rw,
            "no_wa" => &self.no_wa,
            "created_at" => &self.created_at,
            "keterangan" => return self.keterangan.as_deref().map(Cow::Borrowed),
            "kelurahan_id" => {
                return self.kelurahan_id.as_ref().map(|id| Cow::Owned(id.to_string()))
            }
            _ => return None,
        };
        Some(Cow::Borrowed(text.as_str()))
    }
}

impl Filterable for Submission {
    fn field(&self, name: &str) -> Option<Cow<'_, str>> {
        let text = match name {
            "tahun" => &self.tahun,
            "nama_siswa" => &self.nama_siswa,
            "nama_sekolah" => &self.nama_sekolah,
            "kelas" => &self.kelas,
            "nama_ayah" => &self.nama_ayah,
            "nama_ibu" => &self.nama_ibu,
            "rt" => &self.rt,
            "rw" => &self.rw,
            "no_wa" => &self.no_wa,
            "created_at" => &self.created_at,
            "keterangan" => return self.keterangan.as_deref().map(Cow::Borrowed),
            "deskripsi" => return self.deskripsi.as_deref().map(Cow::Borrowed),
            "status_pengajuan" => {
                return self.status_pengajuan.as_deref().map(Cow::Borrowed)
            }
            "kelurahan_id" => {
                return self.kelurahan_id.as_ref().map(|id| Cow::Owned(id.to_string()))
            }
            _ => return None,
        };
        Some(Cow::Borrowed(text.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    /// Case-insensitive substring. An empty needle always passes.
    Contains { field: &'static str, needle: String },
    /// Exact text match. An empty value always passes.
    Equals { field: &'static str, value: String },
    /// Field holds non-empty text.
    Present { field: &'static str },
    /// Year of a timestamp field. `"all"` or empty always passes.
    CreatedInYear { field: &'static str, year: String },
}

impl Predicate {
    pub fn contains(field: &'static str, needle: impl Into<String>) -> Self {
        Predicate::Contains {
            field,
            needle: needle.into(),
        }
    }

    pub fn equals(field: &'static str, value: impl Into<String>) -> Self {
        Predicate::Equals {
            field,
            value: value.into(),
        }
    }

    pub fn present(field: &'static str) -> Self {
        Predicate::Present { field }
    }

    pub fn created_in_year(year: impl Into<String>) -> Self {
        Predicate::CreatedInYear {
            field: "created_at",
            year: year.into(),
        }
    }

    /// True when the predicate cannot reject anything.
    pub fn is_inert(&self) -> bool {
        match self {
            Predicate::Contains { needle, .. } => needle.is_empty(),
            Predicate::Equals { value, .. } => value.is_empty(),
            Predicate::Present { .. } => false,
            Predicate::CreatedInYear { year, .. } => is_all(year),
        }
    }

    pub fn matches<T: Filterable + ?Sized>(&self, record: &T) -> bool {
        if self.is_inert() {
            return true;
        }
        match self {
            Predicate::Contains { field, needle } => record
                .field(field)
                .is_some_and(|v| v.to_lowercase().contains(&needle.to_lowercase())),
            Predicate::Equals { field, value } => {
                record.field(field).is_some_and(|v| v == value.as_str())
            }
            Predicate::Present { field } => record.field(field).is_some_and(|v| !v.is_empty()),
            Predicate::CreatedInYear { field, year } => record
                .field(field)
                .and_then(|v| year_of(&v))
                .is_some_and(|y| &y == year),
        }
    }
}

pub(crate) fn is_all(value: &str) -> bool {
    value.is_empty() || value.eq_ignore_ascii_case("all")
}

/// Conjunction of predicates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterSet {
    predicates: Vec<Predicate>,
}

impl FilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn push(&mut self, predicate: Predicate) {
        self.predicates.push(predicate);
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.iter().all(Predicate::is_inert)
    }

    pub fn matches<T: Filterable + ?Sized>(&self, record: &T) -> bool {
        self.predicates.iter().all(|p| p.matches(record))
    }

    pub fn apply<T: Filterable + Clone>(&self, records: &[T]) -> Vec<T> {
        records
            .iter()
            .filter(|r| self.matches(*r))
            .cloned()
            .collect()
    }

    pub fn apply_ref<'a, T: Filterable>(&self, records: &'a [T]) -> Vec<&'a T> {
        records.iter().filter(|r| self.matches(*r)).collect()
    }
}

/// Filter inputs of the student table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentFilter {
    pub nama: String,
    pub nama_ayah: String,
    pub nama_ibu: String,
    pub rt: String,
    pub rw: String,
    pub kelurahan_id: String,
}

impl StudentFilter {
    pub fn to_filter_set(&self) -> FilterSet {
        FilterSet::new()
            .with(Predicate::contains("nama_siswa", self.nama.clone()))
            .with(Predicate::contains("nama_ayah", self.nama_ayah.clone()))
            .with(Predicate::contains("nama_ibu", self.nama_ibu.clone()))
            .with(Predicate::equals("rt", self.rt.clone()))
            .with(Predicate::equals("rw", self.rw.clone()))
            .with(Predicate::equals("kelurahan_id", self.kelurahan_id.clone()))
    }
}

/// Filter inputs of the submission table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionFilter {
    pub tahun: String,
    pub nama_siswa: String,
    pub nama_ayah: String,
    pub nama_ibu: String,
    pub nama_sekolah: String,
    pub kelurahan_id: String,
    pub has_keterangan: bool,
}

impl SubmissionFilter {
    pub fn to_filter_set(&self) -> FilterSet {
        let mut set = FilterSet::new()
            .with(Predicate::contains("tahun", self.tahun.clone()))
            .with(Predicate::contains("nama_siswa", self.nama_siswa.clone()))
            .with(Predicate::contains("nama_ayah", self.nama_ayah.clone()))
            .with(Predicate::contains("nama_ibu", self.nama_ibu.clone()))
            .with(Predicate::contains("nama_sekolah", self.nama_sekolah.clone()))
            .with(Predicate::equals("kelurahan_id", self.kelurahan_id.clone()));
        if self.has_keterangan {
            set.push(Predicate::present("keterangan"));
        }
        set
    }
}

/// Typeahead over student names. An empty query suggests nothing.
pub fn suggest_students<'a>(students: &'a [Student], query: &str) -> Vec<&'a Student> {
    if query.is_empty() {
        return Vec::new();
    }
    let needle = query.to_lowercase();
    students
        .iter()
        .filter(|s| s.nama_siswa.to_lowercase().contains(&needle))
        .collect()
}

/// 1-based client-side page cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    per_page: usize,
    current: usize,
}

impl Page {
    pub fn new(per_page: usize) -> Self {
        Self {
            per_page: per_page.max(1),
            current: 1,
        }
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn per_page(&self) -> usize {
        self.per_page
    }

    pub fn total_pages(&self, len: usize) -> usize {
        len.div_ceil(self.per_page)
    }

    /// Move to `page` if it lies within `1..=total_pages`; returns whether
    /// the cursor moved.
    pub fn change(&mut self, page: usize, len: usize) -> bool {
        if page >= 1 && page <= self.total_pages(len) {
            self.current = page;
            true
        } else {
            false
        }
    }

    pub fn reset(&mut self) {
        self.current = 1;
    }

    pub fn slice<'a, T>(&self, items: &'a [T]) -> &'a [T] {
        let start = (self.current - 1).saturating_mul(self.per_page);
        if start >= items.len() {
            return &[];
        }
        let end = (start + self.per_page).min(items.len());
        &items[start..end]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn students() -> Vec<Student> {
        serde_json::from_value(json!([
            {"id": 1, "nama_siswa": "ANI LESTARI", "nama_ayah": "BUDI", "nama_ibu": "SARI", "rt": "1", "rw": "2", "kelurahan_id": 3, "created_at": "2024-02-01T00:00:00Z"},
            {"id": 2, "nama_siswa": "Dani", "nama_ayah": "Joko", "nama_ibu": "Rina", "rt": "11", "rw": "2", "kelurahan_id": 4, "created_at": "2025-02-01T00:00:00Z"},
            {"id": 3, "nama_siswa": "rani", "nama_ayah": "Budiman", "nama_ibu": "Sarinah", "rt": "1", "rw": "3", "kelurahan_id": 3, "keterangan": "yatim"}
        ]))
        .expect("decode")
    }

    #[test]
    fn empty_set_returns_input() {
        let list = students();
        assert_eq!(FilterSet::new().apply(&list), list);
        assert!(StudentFilter::default().to_filter_set().is_empty());
        assert_eq!(StudentFilter::default().to_filter_set().apply(&list), list);
    }

    #[test]
    fn substring_is_case_insensitive_and_rt_is_exact() {
        let list = students();
        let filter = StudentFilter {
            nama_ayah: "budi".into(),
            rt: "1".into(),
            ..StudentFilter::default()
        };
        let ids: Vec<_> = filter
            .to_filter_set()
            .apply(&list)
            .into_iter()
            .map(|s| s.id.to_string())
            .collect();
        assert_eq!(ids, vec!["1", "3"]);
    }

    #[test]
    fn kelurahan_matches_as_text() {
        let list = students();
        let set = FilterSet::new().with(Predicate::equals("kelurahan_id", "4"));
        assert_eq!(set.apply_ref(&list).len(), 1);
    }

    #[test]
    fn presence_and_year() {
        let list = students();
        assert_eq!(
            FilterSet::new().with(Predicate::present("keterangan")).apply(&list).len(),
            1
        );
        assert_eq!(
            FilterSet::new().with(Predicate::created_in_year("2025")).apply(&list).len(),
            1
        );
        assert_eq!(
            FilterSet::new().with(Predicate::created_in_year("all")).apply(&list).len(),
            3
        );
    }

    #[test]
    fn suggestions_need_a_query() {
        let list = students();
        assert!(suggest_students(&list, "").is_empty());
        assert_eq!(suggest_students(&list, "ANI").len(), 3);
        assert_eq!(suggest_students(&list, "lestari").len(), 1);
    }

    #[test]
    fn page_cursor_ignores_out_of_range_moves() {
        let items: Vec<usize> = (0..25).collect();
        let mut page = Page::new(SUBMISSIONS_PER_PAGE);
        assert_eq!(page.total_pages(items.len()), 3);
        assert!(!page.change(0, items.len()));
        assert!(!page.change(4, items.len()));
        assert!(page.change(3, items.len()));
        assert_eq!(page.slice(&items), &[20, 21, 22, 23, 24]);
        page.reset();
        assert_eq!(page.slice(&items).len(), 10);
        assert_eq!(Page::new(STUDENTS_PER_PAGE).total_pages(0), 0);
    }
}
