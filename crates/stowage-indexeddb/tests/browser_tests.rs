//! Browser tests for the IndexedDB backend
//!
//! Run with `wasm-pack test --headless --firefox crates/stowage-indexeddb`.

#![cfg(target_arch = "wasm32")]

use stowage_core::{
    fields, Attribute, Engine, EngineConfig, FindOptions, IndexConfig, OrmError, StorageError,
    StoreOptions, Value, Where,
};
use stowage_indexeddb::IndexedDbBackend;
use wasm_bindgen_test::*;

wasm_bindgen_test_configure!(run_in_browser);

/// Fresh engine over a database that is deleted first
async fn fresh(name: &str) -> Engine {
    Engine::delete_database(&IndexedDbBackend::new(), name)
        .await
        .unwrap();
    let engine = Engine::new(IndexedDbBackend::new(), EngineConfig::new(name));
    engine
        .define(
            "notes",
            vec![
                ("title", Attribute::string().not_null()),
                ("slug", Attribute::string().unique()),
                ("tags", Attribute::object()),
                ("views", Attribute::number().default_value(0)),
            ],
            StoreOptions::new().index(IndexConfig::new("tags").multi_entry()),
        )
        .unwrap();
    engine
}

#[wasm_bindgen_test]
async fn test_create_and_find() {
    let engine = fresh("stowage-test-crud").await;
    let notes = engine.model("notes").unwrap();

    let note = notes
        .create(fields! { "title" => "first", "slug" => "first", "tags" => vec!["a", "b"] })
        .await
        .unwrap();
    assert_eq!(note.primary_key().and_then(|k| k.as_f64()), Some(1.0));
    assert_eq!(note.get("views"), Some(&Value::from(0)));

    let found = notes.find_by_pk(1).await.unwrap().unwrap();
    assert_eq!(found.data(), note.data());
    assert!(notes.find_by_pk(99).await.unwrap().is_none());
    engine.close();
}

#[wasm_bindgen_test]
async fn test_migration_creates_indexes() {
    let engine = fresh("stowage-test-migrate").await;
    let conn = engine.open().await.unwrap();

    assert_eq!(conn.version(), 1);
    assert_eq!(conn.store_names(), vec!["notes"]);
    let mut indexes = conn.index_names("notes").unwrap();
    indexes.sort();
    assert_eq!(indexes, vec!["slug", "tags"]);
    engine.close();
}

#[wasm_bindgen_test]
async fn test_unique_index_rejects_duplicate() {
    let engine = fresh("stowage-test-unique").await;
    let notes = engine.model("notes").unwrap();

    notes
        .create(fields! { "title" => "a", "slug" => "same" })
        .await
        .unwrap();
    let err = notes
        .create(fields! { "title" => "b", "slug" => "same" })
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OrmError::Storage(StorageError::Constraint { .. })
    ));
    assert_eq!(notes.count().await.unwrap(), 1);
    engine.close();
}

#[wasm_bindgen_test]
async fn test_query_and_update() {
    let engine = fresh("stowage-test-query").await;
    let notes = engine.model("notes").unwrap();

    notes
        .bulk_create(vec![
            fields! { "title" => "a", "views" => 5 },
            fields! { "title" => "b", "views" => 50 },
            fields! { "title" => "c", "views" => 500 },
        ])
        .await
        .unwrap();

    let popular = FindOptions::new().filter(Where::new().gte("views", 50));
    assert_eq!(notes.find_all(&popular).await.unwrap().len(), 2);

    let updated = notes
        .update(fields! { "views" => 0 }, &popular)
        .await
        .unwrap();
    assert_eq!(updated, 2);
    assert_eq!(
        notes.where_field("views").equals(0).count().await.unwrap(),
        2
    );
    engine.close();
}

#[wasm_bindgen_test]
async fn test_failed_transaction_rolls_back() {
    let engine = fresh("stowage-test-tx").await;
    let notes = engine.model("notes").unwrap();
    notes
        .create(fields! { "title" => "kept", "slug" => "kept" })
        .await
        .unwrap();

    let err = engine
        .transaction(|scope| async move {
            let store = scope.store("notes")?;
            store.create(fields! { "title" => "new" }).await?;
            store
                .create(fields! { "title" => "dup", "slug" => "kept" })
                .await?;
            Ok::<_, OrmError>(())
        })
        .await
        .unwrap_err();

    assert!(err.is_storage());
    assert_eq!(notes.count().await.unwrap(), 1);
    engine.close();
}

#[wasm_bindgen_test]
async fn test_delete_database_blocked_while_open() {
    let engine = fresh("stowage-test-delete").await;
    engine.open().await.unwrap();

    let backend = IndexedDbBackend::new();
    let err = Engine::delete_database(&backend, "stowage-test-delete")
        .await
        .unwrap_err();
    assert!(err.is_blocked());

    engine.close();
    Engine::delete_database(&backend, "stowage-test-delete")
        .await
        .unwrap();
}
