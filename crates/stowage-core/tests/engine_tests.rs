//! Engine tests: lazy open, migration, versioning and lifecycle

use std::cell::RefCell;
use std::rc::Rc;

use pretty_assertions::assert_eq;
use stowage_core::logging;
use stowage_core::storage::{StorageBackend, UpgradeContext, UpgradeHandler};
use stowage_core::{
    fields, Attribute, ConnectionStatus, Engine, EngineConfig, IndexConfig, MemoryBackend,
    MigrationReport, OrmError, StorageError, StoreOptions,
};

fn define_notes(engine: &Engine) {
    logging::try_init("debug");
    engine
        .define(
            "notes",
            vec![
                ("title", Attribute::string().not_null()),
                ("slug", Attribute::string().unique()),
                ("tags", Attribute::object()),
            ],
            StoreOptions::new().index(IndexConfig::new("tags").multi_entry()),
        )
        .unwrap();
}

fn record_migrations(engine: &Engine) -> Rc<RefCell<Vec<MigrationReport>>> {
    let reports = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&reports);
    engine.on_migration(move |report| sink.borrow_mut().push(report.clone()));
    reports
}

#[tokio::test]
async fn test_define_does_no_io() {
    let backend = MemoryBackend::new();
    let engine = Engine::new(backend.clone(), EngineConfig::new("lazy"));
    define_notes(&engine);

    assert_eq!(engine.status(), ConnectionStatus::Closed);
    assert_eq!(backend.op_counts().opens, 0);
    assert!(backend.database_names().is_empty());
}

#[tokio::test]
async fn test_open_is_idempotent() {
    let backend = MemoryBackend::new();
    let engine = Engine::new(backend.clone(), EngineConfig::new("idem"));
    define_notes(&engine);
    let reports = record_migrations(&engine);

    // concurrent first callers share one open
    let (a, b) = futures::join!(engine.open(), engine.open());
    let (a, b) = (a.unwrap(), b.unwrap());
    assert!(Rc::ptr_eq(&a, &b));

    engine.open().await.unwrap();
    let notes = engine.model("notes").unwrap();
    notes.create(fields! { "title" => "hi" }).await.unwrap();

    assert_eq!(backend.op_counts().opens, 1);
    assert_eq!(reports.borrow().len(), 1);
    assert!(engine.is_initialized());
}

#[tokio::test]
async fn test_migration_creates_stores_and_indexes() {
    let backend = MemoryBackend::new();
    let engine = Engine::new(backend.clone(), EngineConfig::new("migrate"));
    define_notes(&engine);
    let reports = record_migrations(&engine);

    let conn = engine.open().await.unwrap();
    assert_eq!(conn.version(), 1);
    assert_eq!(conn.store_names(), vec!["notes"]);

    let mut indexes = conn.index_names("notes").unwrap();
    indexes.sort();
    assert_eq!(indexes, vec!["slug", "tags"]);

    let report = reports.borrow()[0].clone();
    assert_eq!(report.old_version, 0);
    assert_eq!(report.new_version, 1);
    assert_eq!(report.created_stores, vec!["notes"]);
    assert_eq!(report.created_indexes.len(), 2);
}

#[tokio::test]
async fn test_define_after_close_bumps_version() {
    let backend = MemoryBackend::new();
    let engine = Engine::new(backend.clone(), EngineConfig::new("bump"));
    define_notes(&engine);
    let reports = record_migrations(&engine);
    engine.open().await.unwrap();

    engine
        .define("labels", vec![("name", Attribute::string())], StoreOptions::default())
        .unwrap();
    engine.close();
    assert!(!engine.is_initialized());

    let conn = engine.open().await.unwrap();
    assert_eq!(conn.version(), 2);
    assert_eq!(backend.database_version("bump"), Some(2));

    let reports = reports.borrow();
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[1].created_stores, vec!["labels"]);
    assert!(reports[1].created_indexes.is_empty());
}

#[tokio::test]
async fn test_transaction_after_define_while_open() {
    let backend = MemoryBackend::new();
    let engine = Engine::new(backend.clone(), EngineConfig::new("late"));
    define_notes(&engine);
    engine.open().await.unwrap();

    engine
        .define("labels", vec![("name", Attribute::string())], StoreOptions::default())
        .unwrap();

    let id = engine
        .transaction(|scope| async move {
            let note = scope
                .store("notes")?
                .create(fields! { "title" => "inside" })
                .await?;
            // not in the catalogue until the next open
            assert!(scope.store("labels").is_err());
            Ok::<_, OrmError>(note.primary_key())
        })
        .await
        .unwrap();
    assert!(id.is_some());
    assert_eq!(engine.model("notes").unwrap().count().await.unwrap(), 1);

    engine.close();
    let labels = engine.model("labels").unwrap();
    labels.create(fields! { "name" => "red" }).await.unwrap();
    assert_eq!(backend.database_version("late"), Some(2));
}

#[tokio::test]
async fn test_logging_try_init_is_idempotent() {
    logging::try_init("debug");
    assert!(!logging::try_init("debug"));
}

#[tokio::test]
async fn test_reopen_existing_database_does_not_migrate() {
    let backend = MemoryBackend::new();
    let first = Engine::new(backend.clone(), EngineConfig::new("shared"));
    define_notes(&first);
    first
        .model("notes")
        .unwrap()
        .create(fields! { "title" => "kept" })
        .await
        .unwrap();
    first.close();

    let second = Engine::new(backend.clone(), EngineConfig::new("shared"));
    define_notes(&second);
    let reports = record_migrations(&second);

    assert_eq!(second.model("notes").unwrap().count().await.unwrap(), 1);
    assert!(reports.borrow().is_empty());
    assert_eq!(backend.database_version("shared"), Some(1));
}

#[tokio::test]
async fn test_explicit_version_below_stored_fails() {
    let backend = MemoryBackend::new();
    let engine = Engine::new(backend.clone(), EngineConfig::new("pinned").with_version(3));
    define_notes(&engine);
    assert_eq!(engine.open().await.unwrap().version(), 3);
    engine.close();

    let older = Engine::new(backend, EngineConfig::new("pinned").with_version(2));
    define_notes(&older);
    let err = older.open().await.err().unwrap();
    assert!(matches!(
        err,
        OrmError::Storage(StorageError::VersionMismatch { .. })
    ));
    assert_eq!(older.status(), ConnectionStatus::Closed);
}

#[tokio::test]
async fn test_upgrade_blocked_by_open_connection() {
    let backend = MemoryBackend::new();
    let old = Engine::new(backend.clone(), EngineConfig::new("busy").with_version(1));
    define_notes(&old);
    old.open().await.unwrap();

    let new = Engine::new(backend.clone(), EngineConfig::new("busy").with_version(2));
    define_notes(&new);
    let err = new.open().await.err().unwrap();
    assert!(err.is_blocked());
    assert_eq!(new.status(), ConnectionStatus::Closed);

    // a failed open is not memoized
    old.close();
    assert_eq!(new.open().await.unwrap().version(), 2);
    assert!(new.is_initialized());
}

#[tokio::test]
async fn test_delete_database() {
    let backend = MemoryBackend::new();
    let engine = Engine::new(backend.clone(), EngineConfig::new("doomed"));
    define_notes(&engine);
    engine.open().await.unwrap();

    let err = Engine::delete_database(&backend, "doomed").await.unwrap_err();
    assert!(err.is_blocked());

    engine.close();
    Engine::delete_database(&backend, "doomed").await.unwrap();
    assert!(backend.database_names().is_empty());

    // deleting an absent database is not an error
    Engine::delete_database(&backend, "doomed").await.unwrap();
}

#[tokio::test]
async fn test_schema_errors() {
    let engine = Engine::new(MemoryBackend::new(), EngineConfig::default());
    define_notes(&engine);

    let duplicate = engine
        .define("notes", vec![("x", Attribute::string())], StoreOptions::default())
        .unwrap_err();
    assert!(matches!(duplicate, OrmError::Schema(_)));

    let two_keys = engine
        .define(
            "pairs",
            vec![
                ("a", Attribute::number().primary_key()),
                ("b", Attribute::number().primary_key()),
            ],
            StoreOptions::default(),
        )
        .unwrap_err();
    assert!(matches!(two_keys, OrmError::Schema(_)));
    assert_eq!(engine.store_names(), vec!["notes"]);

    assert!(matches!(
        engine.model("pairs").unwrap_err(),
        OrmError::UnknownModel(_)
    ));
}

#[tokio::test]
async fn test_config_defaults() {
    let engine = Engine::new(MemoryBackend::new(), EngineConfig::from_json("{}").unwrap());
    assert_eq!(engine.config().database_name, "stowage");
    assert_eq!(engine.config().version, None);
}

#[tokio::test]
async fn test_backend_opened_directly_sees_catalogue() {
    let backend = MemoryBackend::new();
    let engine = Engine::new(backend.clone(), EngineConfig::new("direct"));
    define_notes(&engine);
    engine.open().await.unwrap();
    engine.close();

    let upgrade: UpgradeHandler =
        Rc::new(|_: &mut dyn UpgradeContext| Ok::<(), StorageError>(()));
    let conn = backend.open("direct", None, upgrade).await.unwrap();
    assert_eq!(conn.store_names(), vec!["notes"]);
}
