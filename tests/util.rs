#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use serde_json::{json, Value};

use pipadmin_lib::store::memory::MemoryStore;
use pipadmin_lib::SqliteStore;

/// Fresh in-memory SQLite store with the bundled schema.
pub async fn temp_store() -> SqliteStore {
    let pool = pipadmin_lib::db::open_memory_pool()
        .await
        .expect("open sqlite::memory:");
    SqliteStore::new(pool)
}

/// `n` students, oldest first, one second apart.
pub fn students(n: usize) -> Vec<Value> {
    (0..n)
        .map(|i| {
            json!({
                "nama_siswa": format!("SISWA {i:04}"),
                "nama_ibu": "IBU",
                "kelurahan_id": 1,
                "created_at": format!("2024-01-01T{:02}:{:02}:{:02}Z", i / 3600, (i / 60) % 60, i % 60),
            })
        })
        .collect()
}

pub fn memory_with_students(n: usize) -> Arc<MemoryStore> {
    let store = MemoryStore::new();
    store.seed("kelurahan", vec![json!({"id": 1, "name": "Pasirjati"})]);
    store.seed("students", students(n));
    Arc::new(store)
}

pub fn object(value: Value) -> serde_json::Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}
