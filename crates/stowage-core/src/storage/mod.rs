//! Storage abstraction for versioned object stores
//!
//! This module defines the seam between the model layer and the underlying
//! key-value engine. The traits follow the shape of IndexedDB: a backend opens
//! versioned connections, upgrades run inside a version-change scope, every
//! read or write happens inside a transaction scoped to named stores, and full
//! scans walk a cursor in key order. Implementations exist for:
//!
//! - **Memory**: in-process emulation for native targets and tests (`MemoryBackend`)
//! - **IndexedDB**: browser storage via web-sys (separate crate, WASM only)
//!
//! All asynchronous methods return boxed *local* futures: the browser engine is
//! single-threaded and its handles are not `Send`.
//!
//! # Example
//!
//! ```rust
//! use std::rc::Rc;
//! use stowage_core::fields;
//! use stowage_core::storage::{
//!     MemoryBackend, StorageBackend, TransactionMode, UpgradeContext, UpgradeHandler,
//! };
//!
//! # futures::executor::block_on(async {
//! let backend = MemoryBackend::new();
//! let upgrade: UpgradeHandler = Rc::new(|ctx: &mut dyn UpgradeContext| {
//!     ctx.create_store("users", "id", true)
//! });
//! let conn = backend.open("app", Some(1), upgrade).await.unwrap();
//!
//! let tx = conn.transaction(&["users".to_string()], TransactionMode::ReadWrite).unwrap();
//! let key = tx.add("users", fields! { "name" => "Alice" }).await.unwrap();
//! tx.commit().await.unwrap();
//! assert_eq!(key.as_f64(), Some(1.0));
//! # });
//! ```

mod error;
mod key;
mod memory;

use std::rc::Rc;

pub use futures::future::LocalBoxFuture;

pub use error::{StorageError, StorageResult};
pub use key::Key;
pub use memory::{MemoryBackend, OpCounts};

use crate::value::Fields;

/// Access mode of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    ReadOnly,
    ReadWrite,
}

/// A secondary index as the storage engine sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: String,
    /// One field for a simple index, several for a compound index
    pub key_path: Vec<String>,
    pub unique: bool,
    /// Index every element of an array value separately
    pub multi_entry: bool,
}

/// Callback run inside the version-change scope of an upgrading open.
pub type UpgradeHandler = Rc<dyn Fn(&mut dyn UpgradeContext) -> StorageResult<()>>;

/// Catalogue access during a version upgrade.
///
/// Returning an error from the upgrade handler aborts the upgrade; the
/// catalogue and the stored version stay as they were.
pub trait UpgradeContext {
    fn old_version(&self) -> u32;

    fn new_version(&self) -> u32;

    fn store_names(&self) -> Vec<String>;

    fn create_store(&mut self, name: &str, key_path: &str, auto_increment: bool)
        -> StorageResult<()>;

    fn index_names(&self, store: &str) -> StorageResult<Vec<String>>;

    fn create_index(&mut self, store: &str, index: &IndexSpec) -> StorageResult<()>;
}

/// Entry point of a storage engine.
pub trait StorageBackend {
    /// Open (or create) a database.
    ///
    /// With `version: None` the stored version is opened as is (a new database
    /// starts at version 1). When the target version is above the stored one,
    /// `upgrade` runs once before the connection is handed out. Opening below
    /// the stored version fails with `StorageError::VersionMismatch`; an upgrade
    /// while other connections are open fails with `StorageError::Blocked`.
    fn open<'a>(
        &'a self,
        name: &'a str,
        version: Option<u32>,
        upgrade: UpgradeHandler,
    ) -> LocalBoxFuture<'a, StorageResult<Rc<dyn Connection>>>;

    /// Delete a database and everything in it.
    ///
    /// Fails with `StorageError::DeleteBlocked` while connections are open.
    fn delete_database<'a>(&'a self, name: &'a str) -> LocalBoxFuture<'a, StorageResult<()>>;
}

/// An open, versioned connection.
pub trait Connection {
    fn name(&self) -> &str;

    fn version(&self) -> u32;

    fn store_names(&self) -> Vec<String>;

    fn index_names(&self, store: &str) -> StorageResult<Vec<String>>;

    /// Start a transaction over the given stores.
    fn transaction(
        &self,
        stores: &[String],
        mode: TransactionMode,
    ) -> StorageResult<Rc<dyn Transaction>>;

    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// A transaction over one or more stores.
///
/// A failed request aborts the whole transaction, after which every request
/// and `commit` fails. Nothing written in an aborted transaction is visible
/// to other transactions.
pub trait Transaction {
    fn mode(&self) -> TransactionMode;

    /// Insert a new row; fails with `Constraint` if the key exists.
    fn add<'a>(&'a self, store: &'a str, row: Fields) -> LocalBoxFuture<'a, StorageResult<Key>>;

    /// Insert or replace a row.
    fn put<'a>(&'a self, store: &'a str, row: Fields) -> LocalBoxFuture<'a, StorageResult<Key>>;

    fn get<'a>(
        &'a self,
        store: &'a str,
        key: &'a Key,
    ) -> LocalBoxFuture<'a, StorageResult<Option<Fields>>>;

    /// Delete by key. Deleting a missing key is not an error.
    fn delete<'a>(&'a self, store: &'a str, key: &'a Key) -> LocalBoxFuture<'a, StorageResult<()>>;

    fn count<'a>(&'a self, store: &'a str) -> LocalBoxFuture<'a, StorageResult<u64>>;

    fn clear<'a>(&'a self, store: &'a str) -> LocalBoxFuture<'a, StorageResult<()>>;

    /// Open a cursor over every row of `store` in ascending key order.
    fn open_cursor<'a>(
        &'a self,
        store: &'a str,
    ) -> LocalBoxFuture<'a, StorageResult<Box<dyn Cursor + 'a>>>;

    /// Resolve once the transaction has committed.
    fn commit(&self) -> LocalBoxFuture<'_, StorageResult<()>>;

    /// Roll back every write made in this transaction. Idempotent.
    fn abort(&self) -> StorageResult<()>;
}

/// Sequential iterator over a store's rows.
pub trait Cursor {
    fn next(&mut self) -> LocalBoxFuture<'_, StorageResult<Option<(Key, Fields)>>>;
}
