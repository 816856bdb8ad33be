use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Utc};

pub fn now_utc() -> DateTime<Utc> {
    Utc::now()
}

/// Current calendar year as text, the default for a new pengajuan.
pub fn current_year() -> String {
    now_utc().year().to_string()
}

/// Parse a backend timestamp. Accepts RFC 3339 (`2024-03-01T08:00:00+07:00`),
/// Postgres text output (`2024-03-01 08:00:00.123+00`) and naive forms, which
/// are read as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f%#z", "%Y-%m-%dT%H:%M:%S%.f%#z"] {
        if let Ok(dt) = DateTime::parse_from_str(raw, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Calendar year of a timestamp, computed at call time.
pub fn year_of(raw: &str) -> Option<String> {
    parse_timestamp(raw).map(|dt| dt.year().to_string())
}

/// RFC 3339 text for `created_at` columns written by local stores.
pub fn to_rfc3339(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Date shown in tables, `dd/mm/yyyy`.
pub fn display_date(raw: &str) -> String {
    parse_timestamp(raw)
        .map(|dt| dt.format("%d/%m/%Y").to_string())
        .unwrap_or_else(|| "-".to_string())
}
