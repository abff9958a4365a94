//! Stowage Core
//!
//! A small ORM layer over asynchronous, versioned object stores: the shape of
//! the browser's IndexedDB, or the in-process [`MemoryBackend`] that emulates
//! it. Provides schema definition, typed validation, CRUD, a
//! filter/sort/paginate engine, secondary indexes, associations and atomic
//! multi-store transactions.
//!
//! Everything is single-threaded: handles are `Rc`-based and futures are
//! local (not `Send`).
//!
//! # Example
//!
//! ```rust
//! use stowage_core::query::{Direction, FindOptions, Where};
//! use stowage_core::{fields, Attribute, Engine, EngineConfig, MemoryBackend, StoreOptions};
//!
//! # futures::executor::block_on(async {
//! let engine = Engine::new(MemoryBackend::new(), EngineConfig::new("shop"));
//! let items = engine
//!     .define(
//!         "items",
//!         vec![
//!             ("name", Attribute::string().not_null()),
//!             ("price", Attribute::number().default_value(0)),
//!         ],
//!         StoreOptions::default(),
//!     )
//!     .unwrap();
//!
//! items.create(fields! { "name" => "pen", "price" => 2 }).await.unwrap();
//! items.create(fields! { "name" => "ink", "price" => 9 }).await.unwrap();
//!
//! let cheap = items
//!     .find_all(
//!         &FindOptions::new()
//!             .filter(Where::new().lt("price", 5))
//!             .order_by("name", Direction::Asc),
//!     )
//!     .await
//!     .unwrap();
//! assert_eq!(cheap.len(), 1);
//!
//! // the same query, chained
//! let chained = items.where_field("price").below(5).to_array().await.unwrap();
//! assert_eq!(chained[0].get("name"), cheap[0].get("name"));
//! # });
//! ```

pub mod association;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod model;
pub mod query;
pub mod record;
pub mod schema;
pub mod storage;
pub mod transaction;
pub mod validate;
pub mod value;

// Re-export main types at crate root
pub use association::{Association, AssociationKind, AssociationOptions, Related};
pub use config::EngineConfig;
pub use engine::{ConnectionStatus, Engine, MigrationReport};
pub use error::{FieldViolation, OrmError, OrmResult, ValidationError, ViolationKind};
pub use model::Model;
pub use query::{Direction, FindOptions, Query, Where, WriteOptions};
pub use record::Record;
pub use schema::{Attribute, DataType, DefaultValue, IndexConfig, StoreOptions, StoreSchema};
pub use storage::{Key, MemoryBackend, StorageError};
pub use transaction::{ScopedStore, TransactionScope};
pub use value::{Fields, Value, ValueKind};
