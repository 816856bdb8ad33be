#![allow(clippy::unwrap_used, clippy::expect_used)]

mod util;

use serde_json::{json, Value};

use pipadmin_lib::model::{decode_rows, Student, UserProfile};
use pipadmin_lib::store::{Embed, RecordStore, Select};
use pipadmin_lib::RecordId;
use util::{object, temp_store};

#[tokio::test]
async fn embed_resolves_name_or_null() {
    let store = temp_store().await;
    store
        .insert("kelurahan", vec![object(json!({"id": 3, "name": "Cigending"}))])
        .await
        .expect("kelurahan");
    store
        .insert(
            "students",
            vec![
                object(json!({"nama_siswa": "A", "kelurahan_id": 3})),
                object(json!({"nama_siswa": "B", "kelurahan_id": null})),
            ],
        )
        .await
        .expect("students");

    let rows = store
        .select(
            &Select::from("students")
                .embed(Embed::kelurahan_name())
                .order("nama_siswa", true),
        )
        .await
        .expect("select");
    assert_eq!(rows[0]["kelurahan"], json!({"name": "Cigending"}));
    assert_eq!(rows[1]["kelurahan"], Value::Null);
    assert!(rows[0].get("__embed_id").is_none());

    let students: Vec<Student> = decode_rows(rows).expect("decode");
    assert_eq!(students[0].kelurahan_name(), Some("Cigending"));
    assert_eq!(students[1].kelurahan_name(), None);
}

#[tokio::test]
async fn ascending_order_puts_nulls_last() {
    let store = temp_store().await;
    store
        .insert(
            "pengajuan",
            vec![
                object(json!({"tahun": "2024", "nama_siswa": "X", "status_pengajuan": null})),
                object(json!({"tahun": "2024", "nama_siswa": "Y", "status_pengajuan": "Diinput"})),
                object(json!({"tahun": "2024", "nama_siswa": "Z", "status_pengajuan": "Alpha"})),
            ],
        )
        .await
        .expect("seed");
    let rows = store
        .select(&Select::from("pengajuan").order("status_pengajuan", true))
        .await
        .expect("select");
    let names: Vec<&str> = rows.iter().filter_map(|r| r["nama_siswa"].as_str()).collect();
    assert_eq!(names, vec!["Z", "Y", "X"]);

    let rows = store
        .select(&Select::from("pengajuan").order("status_pengajuan", false))
        .await
        .expect("select");
    assert_eq!(rows[0]["nama_siswa"], json!("X"));
}

#[tokio::test]
async fn upsert_merges_on_id() {
    let store = temp_store().await;
    store
        .insert("kelurahan", vec![object(json!({"id": 1, "name": "Pasirjati"}))])
        .await
        .expect("kelurahan");
    let profile = json!({"id": "8d3c", "nama": "Rina", "email": "rina@x.id", "role": "admin kelurahan", "kelurahan_id": 1});
    store.upsert("profiles", vec![object(profile)]).await.expect("insert");
    store
        .upsert(
            "profiles",
            vec![object(json!({"id": "8d3c", "nama": "Rina S", "email": "rina@x.id", "role": "super admin", "kelurahan_id": 1}))],
        )
        .await
        .expect("merge");

    let rows = store
        .select(&Select::from("profiles").eq("id", "8d3c"))
        .await
        .expect("select");
    let profiles: Vec<UserProfile> = decode_rows(rows).expect("decode");
    assert_eq!(profiles.len(), 1);
    assert_eq!(profiles[0].nama, "Rina S");
    assert_eq!(profiles[0].role, "super admin");
}

#[tokio::test]
async fn update_and_delete_by_id() {
    let store = temp_store().await;
    let rows = store
        .insert("kelurahan", vec![object(json!({"name": "Lama"}))])
        .await
        .expect("insert");
    let id = RecordId::from_value(&rows[0]["id"]).expect("id");

    store
        .update("kelurahan", &id, object(json!({"name": "Baru"})))
        .await
        .expect("update");
    let rows = store.select(&Select::from("kelurahan")).await.expect("select");
    assert_eq!(rows[0]["name"], json!("Baru"));

    store.delete("kelurahan", &id).await.expect("delete");
    let rows = store.select(&Select::from("kelurahan")).await.expect("select");
    assert!(rows.is_empty());
}

#[tokio::test]
async fn unknown_collection_is_rejected_before_sql() {
    let store = temp_store().await;
    let err = store
        .select(&Select::from("sekolah"))
        .await
        .expect_err("not a collection");
    assert_eq!(err.code(), "STORE/INVALID_COLLECTION");
}
