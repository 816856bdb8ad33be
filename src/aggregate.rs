//! Dashboard recaps computed from loaded collections.

use std::collections::{BTreeSet, HashSet};

use serde::Serialize;

use crate::filter::is_all;
use crate::join::KelurahanIndex;
use crate::model::{RecordId, Status, Student, Submission};
use crate::time::year_of;

/// Counts per status in vocabulary order. Every status is present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusHistogram {
    counts: [usize; 6],
    /// Rows whose raw status is unset, empty or outside the vocabulary.
    pub excluded: usize,
}

impl StatusHistogram {
    pub fn from_raw<'a, I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = Option<&'a str>>,
    {
        let mut histogram = Self::default();
        for raw in statuses {
            match raw.and_then(Status::normalize) {
                Some(status) => histogram.counts[slot(status)] += 1,
                None => histogram.excluded += 1,
            }
        }
        histogram
    }

    pub fn get(&self, status: Status) -> usize {
        self.counts[slot(status)]
    }

    pub fn iter(&self) -> impl Iterator<Item = (Status, usize)> + '_ {
        Status::ALL.into_iter().map(|s| (s, self.get(s)))
    }

    pub fn counted(&self) -> usize {
        self.counts.iter().sum()
    }
}

fn slot(status: Status) -> usize {
    Status::ALL
        .iter()
        .position(|s| *s == status)
        .unwrap_or_default()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StudentRecap {
    pub total: usize,
    pub unique_fathers: usize,
    pub unique_mothers: usize,
}

impl StudentRecap {
    pub fn compute<'a, I>(students: I) -> Self
    where
        I: IntoIterator<Item = &'a Student>,
    {
        let mut total = 0;
        let mut fathers = HashSet::new();
        let mut mothers = HashSet::new();
        for s in students {
            total += 1;
            fathers.insert(s.nama_ayah.as_str());
            mothers.insert(s.nama_ibu.as_str());
        }
        Self {
            total,
            unique_fathers: fathers.len(),
            unique_mothers: mothers.len(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SubmissionRecap {
    pub total: usize,
    pub histogram: StatusHistogram,
}

impl SubmissionRecap {
    pub fn compute<'a, I>(submissions: I) -> Self
    where
        I: IntoIterator<Item = &'a Submission>,
    {
        let mut total = 0;
        let histogram = StatusHistogram::from_raw(submissions.into_iter().map(|s| {
            total += 1;
            s.status_pengajuan.as_deref()
        }));
        Self { total, histogram }
    }
}

/// Year and kelurahan selection of the dashboard. `"all"` (or empty)
/// disables either part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DashboardFilter {
    pub year: String,
    pub kelurahan: String,
}

impl Default for DashboardFilter {
    fn default() -> Self {
        Self {
            year: "all".into(),
            kelurahan: "all".into(),
        }
    }
}

impl DashboardFilter {
    fn year_matches(&self, created_at: &str) -> bool {
        is_all(&self.year) || year_of(created_at).is_some_and(|y| y == self.year)
    }

    /// Legacy student rows may hold the kelurahan name instead of its id.
    fn student_kelurahan_matches(&self, student: &Student, index: &KelurahanIndex) -> bool {
        if is_all(&self.kelurahan) {
            return true;
        }
        let stored = student
            .kelurahan_id
            .as_ref()
            .map(|id| id.to_string())
            .unwrap_or_default();
        let stored = stored.trim();
        if stored == self.kelurahan {
            return true;
        }
        let selected = RecordId::parse(&self.kelurahan);
        index
            .name_of(selected.as_ref())
            .is_some_and(|name| stored.to_lowercase() == name.to_lowercase())
    }

    fn submission_kelurahan_matches(&self, submission: &Submission) -> bool {
        is_all(&self.kelurahan)
            || submission
                .kelurahan_id
                .as_ref()
                .is_some_and(|id| id.to_string() == self.kelurahan)
    }

    pub fn students<'a>(&self, students: &'a [Student], index: &KelurahanIndex) -> Vec<&'a Student> {
        students
            .iter()
            .filter(|s| self.student_kelurahan_matches(s, index))
            .filter(|s| self.year_matches(&s.created_at))
            .collect()
    }

    pub fn submissions<'a>(&self, submissions: &'a [Submission]) -> Vec<&'a Submission> {
        submissions
            .iter()
            .filter(|p| self.year_matches(&p.created_at))
            .filter(|p| self.submission_kelurahan_matches(p))
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DashboardRecap {
    pub students: StudentRecap,
    pub submissions: SubmissionRecap,
}

pub fn dashboard_recap(
    students: &[Student],
    submissions: &[Submission],
    index: &KelurahanIndex,
    filter: &DashboardFilter,
) -> DashboardRecap {
    DashboardRecap {
        students: StudentRecap::compute(filter.students(students, index)),
        submissions: SubmissionRecap::compute(filter.submissions(submissions)),
    }
}

/// Years present in either collection's `created_at`, newest first.
pub fn available_years(students: &[Student], submissions: &[Submission]) -> Vec<String> {
    let years: BTreeSet<i32> = students
        .iter()
        .map(|s| s.created_at.as_str())
        .chain(submissions.iter().map(|p| p.created_at.as_str()))
        .filter_map(year_of)
        .filter_map(|y| y.parse().ok())
        .collect();
    years.into_iter().rev().map(|y| y.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Kelurahan;
    use serde_json::json;

    fn submissions() -> Vec<Submission> {
        serde_json::from_value(json!([
            {"id": 1, "status_pengajuan": "  sudah sk ", "kelurahan_id": 1, "created_at": "2024-05-01T00:00:00Z"},
            {"id": 2, "status_pengajuan": "Menunggu", "kelurahan_id": 2, "created_at": "2025-05-01T00:00:00Z"},
            {"id": 3, "status_pengajuan": null, "kelurahan_id": 1, "created_at": "2025-01-01T00:00:00Z"},
            {"id": 4, "status_pengajuan": "ditolak", "kelurahan_id": 1, "created_at": "2025-01-01T00:00:00Z"},
            {"id": 5, "status_pengajuan": "", "kelurahan_id": 2, "created_at": "2023-01-01T00:00:00Z"}
        ]))
        .expect("decode")
    }

    fn students() -> Vec<Student> {
        serde_json::from_value(json!([
            {"id": 1, "nama_ayah": "BUDI", "nama_ibu": "SARI", "kelurahan_id": 1, "created_at": "2024-01-01T00:00:00Z"},
            {"id": 2, "nama_ayah": "BUDI", "nama_ibu": "RINA", "kelurahan_id": "Cigending", "created_at": "2024-03-01T00:00:00Z"},
            {"id": 3, "nama_ayah": "JOKO", "nama_ibu": "RINA", "kelurahan_id": 2, "created_at": "2025-03-01T00:00:00Z"}
        ]))
        .expect("decode")
    }

    fn index() -> KelurahanIndex {
        KelurahanIndex::new(&[
            Kelurahan { id: RecordId::Int(1), name: "Pasanggrahan".into() },
            Kelurahan { id: RecordId::Int(2), name: "Cigending".into() },
        ])
    }

    #[test]
    fn histogram_normalizes_and_excludes_unknowns() {
        let recap = SubmissionRecap::compute(&submissions());
        assert_eq!(recap.total, 5);
        assert_eq!(recap.histogram.get(Status::SudahSk), 1);
        assert_eq!(recap.histogram.get(Status::Menunggu), 1);
        assert_eq!(recap.histogram.excluded, 3);
        assert_eq!(recap.histogram.counted() + recap.histogram.excluded, recap.total);
        assert_eq!(recap.histogram.iter().count(), 6);
    }

    #[test]
    fn student_recap_counts_distinct_parents() {
        let recap = StudentRecap::compute(&students());
        assert_eq!(recap, StudentRecap { total: 3, unique_fathers: 2, unique_mothers: 2 });
    }

    #[test]
    fn kelurahan_filter_matches_id_or_legacy_name() {
        let filter = DashboardFilter { year: "all".into(), kelurahan: "2".into() };
        let list = students();
        let ids: Vec<String> = filter
            .students(&list, &index())
            .iter()
            .map(|s| s.id.to_string())
            .collect();
        assert_eq!(ids, vec!["2", "3"]);
    }

    #[test]
    fn dashboard_combines_year_and_kelurahan() {
        let filter = DashboardFilter { year: "2025".into(), kelurahan: "1".into() };
        let recap = dashboard_recap(&students(), &submissions(), &index(), &filter);
        assert_eq!(recap.students.total, 0);
        assert_eq!(recap.submissions.total, 2);
        assert_eq!(recap.submissions.histogram.excluded, 2);
    }

    #[test]
    fn years_are_unioned_and_descending() {
        assert_eq!(
            available_years(&students(), &submissions()),
            vec!["2025", "2024", "2023"]
        );
    }
}
