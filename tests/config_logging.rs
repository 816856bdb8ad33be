#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::{Arc, Mutex as StdMutex};

use serde_json::{json, Value};
use tempfile::TempDir;
use tracing::subscriber::{self, DefaultGuard};
use tracing_subscriber::{fmt, EnvFilter};

use pipadmin_lib::error::{CONFIRM_REQUIRED, STORE_HTTP, VALIDATION_REQUIRED};
use pipadmin_lib::{AppConfig, AppError, Backend, ConfigError, LogScope, RecordStore};

struct BufferWriter(Arc<StdMutex<Vec<u8>>>);

impl std::io::Write for BufferWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn init_buffer_subscriber() -> (Arc<StdMutex<Vec<u8>>>, DefaultGuard) {
    let buffer: Arc<StdMutex<Vec<u8>>> = Arc::new(StdMutex::new(Vec::new()));
    let writer = buffer.clone();
    let subscriber = fmt()
        .with_env_filter(EnvFilter::new("pipadmin=debug"))
        .with_writer(move || BufferWriter(writer.clone()))
        .json()
        .finish();
    let guard = subscriber::set_default(subscriber);
    (buffer, guard)
}

fn log_lines(buffer: &Arc<StdMutex<Vec<u8>>>) -> Vec<Value> {
    let text = String::from_utf8(buffer.lock().unwrap().clone()).expect("log utf8");
    text.lines()
        .map(|line| serde_json::from_str(line).expect("json log line"))
        .collect()
}

fn find_event<'a>(lines: &'a [Value], event: &str) -> &'a Value {
    lines
        .iter()
        .find(|line| line["fields"]["event"] == event)
        .unwrap_or_else(|| panic!("missing {event} in {lines:?}"))
}

#[test]
fn config_file_overrides_defaults() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("pipadmin.json");
    let db = dir.path().join("local.sqlite3");
    std::fs::write(
        &path,
        serde_json::to_vec(&json!({"backend": "sqlite", "db_path": db, "page_size": 250}))
            .expect("encode"),
    )
    .expect("write config");

    let config = AppConfig::from_file(&path).expect("config");
    assert_eq!(config.backend, Backend::Sqlite);
    assert_eq!(config.resolved_db_path(), db);
    assert_eq!(config.page_size, 250);
    assert_eq!(config.http_timeout_secs, 30);
}

#[test]
fn unreadable_or_invalid_config_file_is_rejected() {
    let dir = TempDir::new().expect("tempdir");
    let missing = dir.path().join("absent.json");
    let err = AppConfig::from_file(&missing).expect_err("missing file");
    assert_eq!(err.code(), "CONFIG/FILE");

    let broken = dir.path().join("broken.json");
    std::fs::write(&broken, "{ backend: ").expect("write");
    let err: AppError = AppConfig::from_file(&broken).expect_err("bad json").into();
    assert_eq!(err.code(), "CONFIG/FILE");

    let zero = dir.path().join("zero.json");
    std::fs::write(&zero, r#"{"backend": "memory", "page_size": 0}"#).expect("write");
    assert_eq!(
        AppConfig::from_file(&zero).expect_err("zero page"),
        ConfigError::PageSize(0)
    );
}

#[tokio::test]
async fn memory_backend_connects_without_credentials() {
    let config = AppConfig {
        backend: Backend::Memory,
        ..AppConfig::default()
    };
    let connection = config.connect().await.expect("connect");
    let rows = connection
        .store
        .select(&pipadmin_lib::Select::from("kelurahan"))
        .await
        .expect("select");
    assert!(rows.is_empty());
}

#[test]
fn user_errors_log_as_rejections() {
    let (buffer, _guard) = init_buffer_subscriber();

    let scope = LogScope::new("students_add", Some("students"));
    scope.fail(
        &AppError::new(VALIDATION_REQUIRED, "Nama Siswa wajib diisi.")
            .with_context("field", "nama_siswa"),
    );
    LogScope::new("kelurahan_delete", Some("kelurahan"))
        .fail(&AppError::new(CONFIRM_REQUIRED, "Konfirmasi diperlukan"));

    let lines = log_lines(&buffer);
    let enter = find_event(&lines, "command_enter");
    assert_eq!(enter["level"], "DEBUG");
    assert_eq!(enter["fields"]["cmd"], "students_add");

    let rejected: Vec<&Value> = lines
        .iter()
        .filter(|line| line["fields"]["event"] == "command_rejected")
        .collect();
    assert_eq!(rejected.len(), 2);
    assert!(rejected.iter().all(|line| line["level"] == "WARN"));
    let details = rejected[0]["fields"]["details"].as_str().expect("details");
    assert!(details.contains("VALIDATION/REQUIRED"));
    assert!(details.contains("nama_siswa"));
}

#[test]
fn store_errors_log_as_failures_and_success_carries_details() {
    let (buffer, _guard) = init_buffer_subscriber();

    let scope = LogScope::new("students_list", Some("students"));
    scope.fail(&AppError::new(STORE_HTTP, "backend returned 503").with_context("from", "1000"));
    LogScope::new("kelurahan_list", Some("kelurahan")).success(json!(12));

    let lines = log_lines(&buffer);
    let failed = find_event(&lines, "command_failed");
    assert_eq!(failed["level"], "ERROR");
    assert_eq!(failed["fields"]["collection"], "students");
    assert!(failed["fields"]["duration_ms"].is_u64());

    let ok = find_event(&lines, "command_ok");
    assert_eq!(ok["level"], "INFO");
    let details = ok["fields"]["details"].as_str().expect("details");
    assert_eq!(details, r#"{"value":12}"#);
}
