#![allow(clippy::unwrap_used, clippy::expect_used)]

use assert_cmd::Command;
use serde_json::Value;
use tempfile::TempDir;

fn pipadmin() -> Command {
    let mut cmd = Command::cargo_bin("pipadmin").expect("binary");
    for key in [
        "PIPADMIN_BACKEND",
        "PIPADMIN_DB_PATH",
        "PIPADMIN_PAGE_SIZE",
        "PIPADMIN_LOG_DIR",
        "SUPABASE_URL",
        "SUPABASE_ANON_KEY",
    ] {
        cmd.env_remove(key);
    }
    cmd
}

#[test]
fn memory_backend_lists_empty_kelurahan() {
    let output = pipadmin()
        .env("PIPADMIN_BACKEND", "memory")
        .args(["kelurahan", "list"])
        .output()
        .expect("run");
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let listed: Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(listed, Value::Array(Vec::new()));
}

#[test]
fn db_init_creates_sqlite_file_and_students_round_trip() {
    let dir = TempDir::new().expect("tempdir");
    let db = dir.path().join("nested").join("pip.sqlite3");

    pipadmin()
        .env("PIPADMIN_BACKEND", "sqlite")
        .env("PIPADMIN_DB_PATH", &db)
        .args(["db", "init"])
        .assert()
        .success();
    assert!(db.exists());

    pipadmin()
        .env("PIPADMIN_BACKEND", "sqlite")
        .env("PIPADMIN_DB_PATH", &db)
        .args(["kelurahan", "add", "Pasirjati"])
        .assert()
        .success();

    let output = pipadmin()
        .env("PIPADMIN_BACKEND", "sqlite")
        .env("PIPADMIN_DB_PATH", &db)
        .args(["kelurahan", "list"])
        .output()
        .expect("run");
    assert!(output.status.success());
    let listed: Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(listed[0]["name"], "Pasirjati");
}

#[test]
fn validation_failure_exits_with_two() {
    let dir = TempDir::new().expect("tempdir");
    let db = dir.path().join("pip.sqlite3");
    pipadmin()
        .env("PIPADMIN_BACKEND", "sqlite")
        .env("PIPADMIN_DB_PATH", &db)
        .args(["kelurahan", "add", "   "])
        .assert()
        .code(2);
}

#[test]
fn rest_backend_without_url_fails() {
    let output = pipadmin().args(["kelurahan", "list"]).output().expect("run");
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("SUPABASE_URL"), "stderr: {stderr}");
}

#[test]
fn db_init_refuses_other_backends() {
    pipadmin()
        .env("PIPADMIN_BACKEND", "memory")
        .args(["db", "init"])
        .assert()
        .failure();
}
