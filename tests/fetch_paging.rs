#![allow(clippy::unwrap_used, clippy::expect_used)]

mod util;

use pipadmin_lib::model::Student;
use pipadmin_lib::store::memory::{MemoryStore, StoreOp};
use pipadmin_lib::store::{Embed, RecordStore, Select};
use pipadmin_lib::{fetch_all, fetch_all_as, StudentsView, ViewContext, DEFAULT_PAGE_SIZE};
use util::{memory_with_students, object, students, temp_store};

fn newest_first() -> Select {
    Select::from("students")
        .embed(Embed::kelurahan_name())
        .order("created_at", false)
}

#[tokio::test]
async fn students_2500_take_three_requests_newest_first() {
    let store = memory_with_students(2500);
    let outcome = fetch_all_as::<Student>(store.as_ref(), &newest_first(), DEFAULT_PAGE_SIZE).await;
    assert!(outcome.is_complete());
    assert_eq!(outcome.requests, 3);
    assert_eq!(store.page_sizes(), vec![1000, 1000, 500]);
    assert_eq!(outcome.rows.len(), 2500);
    assert_eq!(outcome.rows[0].nama_siswa, "SISWA 2499");
    assert_eq!(outcome.rows[2499].nama_siswa, "SISWA 0000");
    assert!(outcome
        .rows
        .windows(2)
        .all(|pair| pair[0].created_at >= pair[1].created_at));
    assert_eq!(outcome.rows[0].kelurahan_name(), Some("Pasirjati"));
}

#[tokio::test]
async fn exact_multiple_needs_one_empty_page() {
    let store = memory_with_students(2000);
    let outcome = fetch_all(store.as_ref(), &newest_first(), 1000).await;
    assert_eq!(outcome.rows.len(), 2000);
    assert_eq!(outcome.requests, 3);
    assert_eq!(store.page_sizes(), vec![1000, 1000, 0]);
}

#[tokio::test]
async fn empty_collection_takes_one_request() {
    let store = MemoryStore::new();
    let outcome = fetch_all(&store, &newest_first(), 1000).await;
    assert!(outcome.rows.is_empty());
    assert_eq!(outcome.requests, 1);
    assert_eq!(store.calls(StoreOp::Select), 1);
}

#[tokio::test]
async fn failed_page_keeps_earlier_pages() {
    let store = memory_with_students(2500);
    store.fail_call(
        StoreOp::Select,
        2,
        pipadmin_lib::AppError::new("STORE/ERROR", "upstream timeout"),
    );
    let outcome = fetch_all(store.as_ref(), &newest_first(), 1000).await;
    assert_eq!(outcome.rows.len(), 1000);
    let err = outcome.error.expect("second page failed");
    assert_eq!(err.message(), "upstream timeout");
    assert_eq!(err.context().get("from"), Some(&"1000".to_string()));
}

#[tokio::test]
async fn sqlite_store_pages_in_the_same_order() {
    let store = temp_store().await;
    store
        .insert("kelurahan", vec![object(serde_json::json!({"id": 1, "name": "Pasirjati"}))])
        .await
        .expect("seed kelurahan");
    let rows = students(2500).into_iter().map(object).collect();
    store.insert("students", rows).await.expect("seed students");

    let outcome = fetch_all_as::<Student>(&store, &newest_first(), 1000).await;
    assert!(outcome.is_complete());
    assert_eq!(outcome.requests, 3);
    assert_eq!(outcome.rows.len(), 2500);
    assert_eq!(outcome.rows[0].nama_siswa, "SISWA 2499");
    assert_eq!(outcome.rows[0].kelurahan_name(), Some("Pasirjati"));
}

#[tokio::test]
async fn view_load_uses_configured_page_size() {
    let store = memory_with_students(250);
    let mut view = StudentsView::new(ViewContext::new(store.clone()).with_page_size(100));
    view.load().await.expect("load");
    assert_eq!(view.students().len(), 250);
    // three student pages, then the kelurahan list
    assert_eq!(store.page_sizes(), vec![100, 100, 50, 1]);
}
