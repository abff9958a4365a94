//! CRUD operation tests for models and records

use std::cell::Cell;
use std::rc::Rc;

use pretty_assertions::assert_eq;
use stowage_core::{
    fields, Attribute, Engine, EngineConfig, FindOptions, Key, MemoryBackend, OrmError,
    StorageError, StoreOptions, Value, ViolationKind, Where,
};

/// Helper to create an engine with a `users` store
fn users_engine() -> (Engine, MemoryBackend) {
    let backend = MemoryBackend::new();
    let engine = Engine::new(backend.clone(), EngineConfig::new("crud"));
    engine
        .define(
            "users",
            vec![
                ("id", Attribute::number().primary_key().auto_increment()),
                ("name", Attribute::string().not_null()),
                ("email", Attribute::string().unique()),
                ("age", Attribute::number()),
                ("role", Attribute::string().default_value("member")),
            ],
            StoreOptions::default(),
        )
        .unwrap();
    (engine, backend)
}

#[tokio::test]
async fn test_create_and_find_by_pk() {
    let (engine, _) = users_engine();
    let users = engine.model("users").unwrap();

    let alice = users
        .create(fields! { "name" => "Alice", "age" => 28 })
        .await
        .unwrap();
    assert_eq!(alice.primary_key(), Some(Key::from(1)));
    assert_eq!(alice.get("role"), Some(&Value::from("member")));

    let found = users.find_by_pk(1).await.unwrap().unwrap();
    assert_eq!(found.data(), alice.data());
}

#[tokio::test]
async fn test_find_by_pk_missing_is_none() {
    let (engine, _) = users_engine();
    let users = engine.model("users").unwrap();
    assert!(users.find_by_pk(42).await.unwrap().is_none());
}

#[tokio::test]
async fn test_factory_default_invoked_once_per_create() {
    let backend = MemoryBackend::new();
    let engine = Engine::new(backend, EngineConfig::new("defaults"));
    let calls = Rc::new(Cell::new(0u32));
    let counter = Rc::clone(&calls);
    let tickets = engine
        .define(
            "tickets",
            vec![(
                "serial",
                Attribute::number().default_with(move || {
                    counter.set(counter.get() + 1);
                    Value::from(counter.get() * 100)
                }),
            )],
            StoreOptions::default(),
        )
        .unwrap();

    let first = tickets.create(fields! {}).await.unwrap();
    let second = tickets.create(fields! {}).await.unwrap();
    let explicit = tickets.create(fields! { "serial" => 7 }).await.unwrap();

    assert_eq!(first.get("serial"), Some(&Value::from(100)));
    assert_eq!(second.get("serial"), Some(&Value::from(200)));
    assert_eq!(explicit.get("serial"), Some(&Value::from(7)));
    assert_eq!(calls.get(), 2);
}

#[tokio::test]
async fn test_validation_fails_without_io() {
    let (engine, backend) = users_engine();
    let users = engine.model("users").unwrap();
    backend.reset_counts();

    let err = users
        .create(fields! { "age" => "twenty" })
        .await
        .unwrap_err();

    let OrmError::Validation(validation) = err else {
        panic!("expected a validation error, got {:?}", err);
    };
    assert_eq!(validation.violations.len(), 2);
    assert_eq!(validation.violation("name").unwrap().kind, ViolationKind::NotNull);
    assert!(matches!(
        validation.violation("age").unwrap().kind,
        ViolationKind::TypeMismatch { .. }
    ));

    // not even the connection was opened
    let counts = backend.op_counts();
    assert_eq!(counts.opens, 0);
    assert_eq!(counts.requests(), 0);
}

#[tokio::test]
async fn test_manual_primary_key_required() {
    let engine = Engine::new(MemoryBackend::new(), EngineConfig::new("tags"));
    let tags = engine
        .define(
            "tags",
            vec![("slug", Attribute::string().primary_key())],
            StoreOptions::default(),
        )
        .unwrap();

    let err = tags.create(fields! {}).await.unwrap_err();
    assert!(err.is_validation());

    let rust = tags.create(fields! { "slug" => "rust" }).await.unwrap();
    assert_eq!(rust.primary_key(), Some(Key::from("rust")));

    let duplicate = tags.create(fields! { "slug" => "rust" }).await.unwrap_err();
    assert!(matches!(
        duplicate,
        OrmError::Storage(StorageError::Constraint { .. })
    ));
}

#[tokio::test]
async fn test_signed_zero_keys_collide() {
    let engine = Engine::new(MemoryBackend::new(), EngineConfig::new("zeros"));
    let points = engine
        .define(
            "points",
            vec![("n", Attribute::number().primary_key())],
            StoreOptions::default(),
        )
        .unwrap();

    points.create(fields! { "n" => 0 }).await.unwrap();
    assert!(points.find_by_pk(Key::Number(-0.0)).await.unwrap().is_some());

    let duplicate = points.create(fields! { "n" => -0.0 }).await.unwrap_err();
    assert!(matches!(
        duplicate,
        OrmError::Storage(StorageError::Constraint { .. })
    ));
    assert_eq!(points.count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_unique_attribute_enforced_by_store() {
    let (engine, _) = users_engine();
    let users = engine.model("users").unwrap();

    users
        .create(fields! { "name" => "Alice", "email" => "a@example.com" })
        .await
        .unwrap();
    let err = users
        .create(fields! { "name" => "Alicia", "email" => "a@example.com" })
        .await
        .unwrap_err();
    assert!(err.is_storage());
    assert_eq!(users.count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_record_save_and_reload() {
    let (engine, _) = users_engine();
    let users = engine.model("users").unwrap();

    let mut alice = users.create(fields! { "name" => "Alice" }).await.unwrap();
    alice.set("age", 31).unwrap();
    alice.save().await.unwrap();

    let mut stale = users.find_by_pk(1).await.unwrap().unwrap();
    assert_eq!(stale.get("age"), Some(&Value::from(31)));

    alice.set("age", 32).unwrap();
    alice.save().await.unwrap();
    assert_eq!(stale.get("age"), Some(&Value::from(31)));

    stale.reload().await.unwrap();
    assert_eq!(stale.get("age"), Some(&Value::from(32)));
}

#[tokio::test]
async fn test_save_validates() {
    let (engine, backend) = users_engine();
    let users = engine.model("users").unwrap();

    let mut alice = users.create(fields! { "name" => "Alice" }).await.unwrap();
    alice.set("name", Value::Null).unwrap();
    backend.reset_counts();

    assert!(alice.save().await.unwrap_err().is_validation());
    assert_eq!(backend.op_counts().puts, 0);
}

#[tokio::test]
async fn test_primary_key_is_immutable() {
    let (engine, _) = users_engine();
    let users = engine.model("users").unwrap();

    let mut alice = users.create(fields! { "name" => "Alice" }).await.unwrap();
    let err = alice.set("id", 99).unwrap_err();
    let OrmError::Validation(validation) = err else {
        panic!("expected a validation error");
    };
    assert_eq!(
        validation.violation("id").unwrap().kind,
        ViolationKind::PrimaryKeyImmutable
    );

    // setting the same key is not a change
    alice.set("id", 1).unwrap();

    let err = users
        .update(fields! { "id" => 5 }, &FindOptions::default())
        .await
        .unwrap_err();
    assert!(err.is_validation());
    assert!(users.find_by_pk(5).await.unwrap().is_none());
}

#[tokio::test]
async fn test_reload_missing_row_fails() {
    let (engine, _) = users_engine();
    let users = engine.model("users").unwrap();

    let mut alice = users.create(fields! { "name" => "Alice" }).await.unwrap();
    users.bulk_delete([1]).await.unwrap();

    let err = alice.reload().await.unwrap_err();
    assert!(matches!(err, OrmError::NotFound { .. }));
}

#[tokio::test]
async fn test_destroy_then_find_by_pk_is_none() {
    let (engine, _) = users_engine();
    let users = engine.model("users").unwrap();

    let alice = users.create(fields! { "name" => "Alice" }).await.unwrap();
    alice.destroy().await.unwrap();
    assert!(users.find_by_pk(1).await.unwrap().is_none());
}

#[tokio::test]
async fn test_update_and_destroy_by_where() {
    let (engine, _) = users_engine();
    let users = engine.model("users").unwrap();

    users
        .bulk_create(vec![
            fields! { "name" => "Alice", "age" => 17 },
            fields! { "name" => "Bob", "age" => 40 },
            fields! { "name" => "Carol", "age" => 15 },
        ])
        .await
        .unwrap();

    let minors = FindOptions::new().filter(Where::new().lt("age", 18));
    let updated = users
        .update(fields! { "role" => "junior" }, &minors)
        .await
        .unwrap();
    assert_eq!(updated, 2);

    let juniors = FindOptions::new().filter(Where::new().eq("role", "junior"));
    assert_eq!(users.find_all(&juniors).await.unwrap().len(), 2);

    let destroyed = users.destroy(&juniors).await.unwrap();
    assert_eq!(destroyed, 2);
    assert_eq!(users.count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_bulk_add_returns_keys() {
    let (engine, _) = users_engine();
    let users = engine.model("users").unwrap();

    let keys = users
        .bulk_add(vec![fields! { "name" => "a" }, fields! { "name" => "b" }])
        .await
        .unwrap();
    assert_eq!(keys, vec![Key::from(1), Key::from(2)]);
}

#[tokio::test]
async fn test_bulk_create_stops_at_first_failure() {
    let (engine, _) = users_engine();
    let users = engine.model("users").unwrap();

    let err = users
        .bulk_create(vec![
            fields! { "name" => "a" },
            fields! { "age" => 3 },
            fields! { "name" => "c" },
        ])
        .await
        .unwrap_err();
    assert!(err.is_validation());
    assert_eq!(users.count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_bulk_delete_in_one_transaction() {
    let (engine, backend) = users_engine();
    let users = engine.model("users").unwrap();

    users
        .bulk_create(vec![
            fields! { "name" => "a" },
            fields! { "name" => "b" },
            fields! { "name" => "c" },
        ])
        .await
        .unwrap();

    backend.reset_counts();
    let deleted = users.bulk_delete([1, 3]).await.unwrap();
    assert_eq!(deleted, 2);
    assert_eq!(backend.op_counts().transactions, 1);

    let left: Vec<Option<Key>> = users
        .to_array()
        .await
        .unwrap()
        .iter()
        .map(|r| r.primary_key())
        .collect();
    assert_eq!(left, vec![Some(Key::from(2))]);
}

#[tokio::test]
async fn test_clear_then_count_is_zero() {
    let (engine, _) = users_engine();
    let users = engine.model("users").unwrap();

    users
        .bulk_create(vec![fields! { "name" => "a" }, fields! { "name" => "b" }])
        .await
        .unwrap();
    assert_eq!(users.count().await.unwrap(), 2);

    users.clear().await.unwrap();
    assert_eq!(users.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_add_and_get_aliases() {
    let (engine, _) = users_engine();
    let users = engine.model("users").unwrap();

    let bob = users.add(fields! { "name" => "Bob" }).await.unwrap();
    let fetched = users.get(bob.primary_key().unwrap()).await.unwrap().unwrap();
    assert_eq!(fetched.get("name"), Some(&Value::from("Bob")));
}

#[tokio::test]
async fn test_record_to_json() {
    let (engine, _) = users_engine();
    let users = engine.model("users").unwrap();

    let alice = users
        .create(fields! { "name" => "Alice", "age" => 28 })
        .await
        .unwrap();
    assert_eq!(
        alice.to_json(),
        serde_json::json!({ "id": 1, "name": "Alice", "age": 28, "role": "member" })
    );
}

#[tokio::test]
async fn test_record_fails_after_engine_dropped() {
    let (engine, _) = users_engine();
    let users = engine.model("users").unwrap();
    let alice = users.create(fields! { "name" => "Alice" }).await.unwrap();

    drop(engine);
    let err = alice.destroy().await.unwrap_err();
    assert!(matches!(err, OrmError::EngineDropped(_)));
}
