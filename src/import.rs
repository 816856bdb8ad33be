//! Bulk student import from spreadsheet-shaped rows.
//!
//! Rows arrive as header → cell maps with the header on sheet row 1, so the
//! first data row is reported as row 2. Invalid rows are skipped with a
//! message; the valid ones go to the store in a single batch insert.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::error::AppResult;
use crate::model::{Kelurahan, RecordId, STUDENTS};
use crate::store::RecordStore;

/// Errors listed before the rest are folded into a trailer line.
const SUMMARY_LIMIT: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRowError {
    pub row: usize,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportPlan {
    pub rows: Vec<Map<String, Value>>,
    pub errors: Vec<ImportRowError>,
}

impl ImportPlan {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportOutcome {
    pub inserted: usize,
    pub errors: Vec<ImportRowError>,
}

impl ImportOutcome {
    /// First few row errors, one per line, or `None` when every row passed.
    pub fn error_summary(&self) -> Option<String> {
        if self.errors.is_empty() {
            return None;
        }
        let mut lines: Vec<String> = self
            .errors
            .iter()
            .take(SUMMARY_LIMIT)
            .map(|e| format!("Baris {}: {}", e.row, e.message))
            .collect();
        if self.errors.len() > SUMMARY_LIMIT {
            lines.push("...dan lainnya.".to_string());
        }
        Some(lines.join("\n"))
    }

    pub fn success_message(&self) -> String {
        format!("Berhasil mengimport {} data siswa.", self.inserted)
    }
}

/// Case- and whitespace-insensitive header lookup.
fn cell<'a>(row: &'a Map<String, Value>, header: &str) -> Option<&'a Value> {
    row.iter()
        .find(|(key, _)| key.trim().eq_ignore_ascii_case(header))
        .map(|(_, value)| value)
}

/// Cell as text. Blank cells and nulls count as missing.
fn cell_text(row: &Map<String, Value>, header: &str) -> Option<String> {
    let text = match cell(row, header)? {
        Value::Null => return None,
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn text_or_empty(row: &Map<String, Value>, header: &str) -> Value {
    Value::String(cell_text(row, header).unwrap_or_default())
}

fn plan_row(
    row: &Map<String, Value>,
    kelurahan: &HashMap<String, RecordId>,
) -> Result<Map<String, Value>, String> {
    let kelurahan_name =
        cell_text(row, "kelurahan").ok_or_else(|| "Nama Kelurahan kosong.".to_string())?;
    let kelurahan_id = kelurahan
        .get(&kelurahan_name.trim().to_lowercase())
        .ok_or_else(|| format!("Kelurahan '{kelurahan_name}' tidak ditemukan di sistem."))?;
    let nama_siswa = cell_text(row, "nama siswa").ok_or_else(|| "Nama Siswa kosong.".to_string())?;

    let mut payload = Map::new();
    payload.insert("nama_siswa".into(), Value::String(nama_siswa));
    payload.insert("nama_sekolah".into(), text_or_empty(row, "nama sekolah"));
    payload.insert("kelas".into(), text_or_empty(row, "kelas"));
    payload.insert("nama_ayah".into(), text_or_empty(row, "nama ayah"));
    payload.insert("nama_ibu".into(), text_or_empty(row, "nama ibu"));
    payload.insert("rt".into(), text_or_empty(row, "rt"));
    payload.insert("rw".into(), text_or_empty(row, "rw"));
    payload.insert("kelurahan_id".into(), kelurahan_id.to_value());
    let no_wa = cell_text(row, "no. wa").or_else(|| cell_text(row, "no wa"));
    payload.insert("no_wa".into(), Value::String(no_wa.unwrap_or_default()));
    payload.insert(
        "keterangan".into(),
        cell_text(row, "keterangan").map_or(Value::Null, Value::String),
    );
    Ok(payload)
}

/// Split the sheet into insertable payloads and row-numbered rejections.
pub fn plan_import(rows: &[Map<String, Value>], kelurahan: &[Kelurahan]) -> ImportPlan {
    let lookup: HashMap<String, RecordId> = kelurahan
        .iter()
        .map(|k| (k.name.trim().to_lowercase(), k.id.clone()))
        .collect();

    let mut plan = ImportPlan::default();
    for (index, row) in rows.iter().enumerate() {
        match plan_row(row, &lookup) {
            Ok(payload) => plan.rows.push(payload),
            Err(message) => plan.errors.push(ImportRowError {
                row: index + 2,
                message,
            }),
        }
    }
    plan
}

/// Insert every planned row in one call. Nothing is sent for an empty plan.
pub async fn execute_import(store: &dyn RecordStore, plan: &ImportPlan) -> AppResult<ImportOutcome> {
    if !plan.errors.is_empty() {
        warn!(
            target: "pipadmin",
            event = "import_rows_rejected",
            rejected = plan.errors.len(),
            accepted = plan.rows.len()
        );
    }
    if plan.is_empty() {
        return Ok(ImportOutcome {
            inserted: 0,
            errors: plan.errors.clone(),
        });
    }
    let stored = store.insert(STUDENTS, plan.rows.clone()).await?;
    info!(target: "pipadmin", event = "import_completed", inserted = stored.len());
    Ok(ImportOutcome {
        inserted: stored.len(),
        errors: plan.errors.clone(),
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ImportReportFile<'a> {
    generated_at: String,
    source_path: String,
    outcome: &'a ImportOutcome,
}

/// Write a timestamped JSON report of an import run into `reports_dir`.
pub fn write_import_report(
    reports_dir: &Path,
    source_path: &Path,
    outcome: &ImportOutcome,
) -> Result<PathBuf> {
    fs::create_dir_all(reports_dir)
        .with_context(|| format!("create reports directory {}", reports_dir.display()))?;

    let timestamp = Utc::now().format("import-%Y%m%d-%H%M%S.json");
    let path = reports_dir.join(timestamp.to_string());
    let payload = ImportReportFile {
        generated_at: Utc::now().to_rfc3339(),
        source_path: source_path.display().to_string(),
        outcome,
    };
    let json = serde_json::to_string_pretty(&payload).context("serialize import report")?;
    fs::write(&path, json).with_context(|| format!("write import report {}", path.display()))?;
    Ok(path)
}
