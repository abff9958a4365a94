//! `StorageBackend` over the browser's IndexedDB

use std::cell::Cell;
use std::rc::Rc;

use js_sys::{Array, Promise};
use stowage_core::logging::prefix;
use stowage_core::storage::{
    Connection, Cursor, IndexSpec, Key, LocalBoxFuture, StorageBackend, StorageError,
    StorageResult, Transaction, TransactionMode, UpgradeContext, UpgradeHandler,
};
use stowage_core::Fields;
use tracing::debug;
use wasm_bindgen::{JsCast, JsValue};
use wasm_bindgen_futures::JsFuture;
use web_sys::{
    DomStringList, IdbCursorWithValue, IdbDatabase, IdbIndexParameters, IdbObjectStore,
    IdbObjectStoreParameters, IdbRequest, IdbTransaction, IdbTransactionMode,
};

use crate::convert::{fields_from_js, fields_to_js, key_from_js, key_to_js, set_prop};
use crate::error::{request_error, DomFailure};
use crate::idb::{self, request_to_promise, transaction_to_promise, UpgradeFn};

/// IndexedDB storage backend.
///
/// Stateless: every database lives in the browser's IndexedDB instance for
/// the current origin.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexedDbBackend;

impl IndexedDbBackend {
    pub fn new() -> Self {
        IndexedDbBackend
    }
}

impl StorageBackend for IndexedDbBackend {
    fn open<'a>(
        &'a self,
        name: &'a str,
        version: Option<u32>,
        upgrade: UpgradeHandler,
    ) -> LocalBoxFuture<'a, StorageResult<Rc<dyn Connection>>> {
        Box::pin(async move {
            let on_upgrade: UpgradeFn = Box::new(move |db, tx, old_version, new_version| {
                let mut ctx = IdbUpgrade {
                    db,
                    tx,
                    old_version,
                    new_version,
                };
                upgrade(&mut ctx)
            });

            let db = idb::open_database(name, version, on_upgrade).await?;
            debug!(
                "{} IndexedDB '{}' open at version {}",
                prefix::DB,
                name,
                db.version()
            );
            Ok(Rc::new(IdbConnection::new(name, db)) as Rc<dyn Connection>)
        })
    }

    fn delete_database<'a>(&'a self, name: &'a str) -> LocalBoxFuture<'a, StorageResult<()>> {
        Box::pin(idb::delete_database(name))
    }
}

fn dom_strings(list: &DomStringList) -> Vec<String> {
    (0..list.length()).filter_map(|i| list.item(i)).collect()
}

fn store_error(operation: &'static str, store: &str, val: &JsValue) -> StorageError {
    match request_error(operation, store, val) {
        StorageError::OutOfScope(store) => StorageError::StoreNotFound(store),
        other => other,
    }
}

/// Catalogue access inside `onupgradeneeded`
struct IdbUpgrade<'a> {
    db: &'a IdbDatabase,
    tx: &'a IdbTransaction,
    old_version: u32,
    new_version: u32,
}

impl IdbUpgrade<'_> {
    fn object_store(&self, store: &str) -> StorageResult<IdbObjectStore> {
        self.tx
            .object_store(store)
            .map_err(|e| store_error("object_store", store, &e))
    }
}

impl UpgradeContext for IdbUpgrade<'_> {
    fn old_version(&self) -> u32 {
        self.old_version
    }

    fn new_version(&self) -> u32 {
        self.new_version
    }

    fn store_names(&self) -> Vec<String> {
        dom_strings(&self.db.object_store_names())
    }

    fn create_store(
        &mut self,
        name: &str,
        key_path: &str,
        auto_increment: bool,
    ) -> StorageResult<()> {
        let params = IdbObjectStoreParameters::new();
        set_prop(&params, "keyPath", &JsValue::from_str(key_path))?;
        set_prop(&params, "autoIncrement", &JsValue::from_bool(auto_increment))?;

        self.db
            .create_object_store_with_optional_parameters(name, &params)
            .map_err(|e| request_error("create_store", name, &e))?;
        Ok(())
    }

    fn index_names(&self, store: &str) -> StorageResult<Vec<String>> {
        Ok(dom_strings(&self.object_store(store)?.index_names()))
    }

    fn create_index(&mut self, store: &str, index: &IndexSpec) -> StorageResult<()> {
        let os = self.object_store(store)?;

        let params = IdbIndexParameters::new();
        set_prop(&params, "unique", &JsValue::from_bool(index.unique))?;
        set_prop(&params, "multiEntry", &JsValue::from_bool(index.multi_entry))?;

        let created = match index.key_path.as_slice() {
            [field] => {
                os.create_index_with_str_and_optional_parameters(&index.name, field, &params)
            }
            fields => {
                let path: Array = fields.iter().map(|f| JsValue::from_str(f)).collect();
                os.create_index_with_str_sequence_and_optional_parameters(
                    &index.name,
                    &path,
                    &params,
                )
            }
        };
        created.map_err(|e| request_error("create_index", store, &e))?;
        Ok(())
    }
}

/// An open IndexedDB connection
pub struct IdbConnection {
    name: String,
    db: IdbDatabase,
    closed: Cell<bool>,
}

impl IdbConnection {
    fn new(name: &str, db: IdbDatabase) -> Self {
        IdbConnection {
            name: name.to_string(),
            db,
            closed: Cell::new(false),
        }
    }

    fn ensure_open(&self) -> StorageResult<()> {
        if self.closed.get() {
            return Err(StorageError::ConnectionClosed(self.name.clone()));
        }
        Ok(())
    }
}

impl std::fmt::Debug for IdbConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdbConnection")
            .field("name", &self.name)
            .field("version", &self.version())
            .field("closed", &self.closed.get())
            .finish()
    }
}

impl Connection for IdbConnection {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> u32 {
        self.db.version() as u32
    }

    fn store_names(&self) -> Vec<String> {
        dom_strings(&self.db.object_store_names())
    }

    fn index_names(&self, store: &str) -> StorageResult<Vec<String>> {
        self.ensure_open()?;
        let tx = self
            .db
            .transaction_with_str(store)
            .map_err(|e| store_error("index_names", store, &e))?;
        let os = tx
            .object_store(store)
            .map_err(|e| store_error("index_names", store, &e))?;
        Ok(dom_strings(&os.index_names()))
    }

    fn transaction(
        &self,
        stores: &[String],
        mode: TransactionMode,
    ) -> StorageResult<Rc<dyn Transaction>> {
        self.ensure_open()?;
        let names: Array = stores.iter().map(|s| JsValue::from_str(s)).collect();
        let idb_mode = match mode {
            TransactionMode::ReadOnly => IdbTransactionMode::Readonly,
            TransactionMode::ReadWrite => IdbTransactionMode::Readwrite,
        };
        let tx = self
            .db
            .transaction_with_str_sequence_and_mode(&names, idb_mode)
            .map_err(|e| {
                let scope = stores.join(", ");
                match store_error("transaction", &scope, &e) {
                    StorageError::TransactionInactive => {
                        StorageError::ConnectionClosed(self.name.clone())
                    }
                    other => other,
                }
            })?;
        Ok(Rc::new(IdbTx::new(tx, mode)))
    }

    fn close(&self) {
        if !self.closed.replace(true) {
            self.db.close();
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.get()
    }
}

/// A transaction over one or more object stores.
///
/// IndexedDB commits on its own once no requests are pending; `commit` waits
/// for that outcome. The completion promise is armed when the transaction
/// starts so a quick `complete` event is never missed.
struct IdbTx {
    tx: IdbTransaction,
    mode: TransactionMode,
    outcome: Promise,
    aborted: Cell<bool>,
}

impl IdbTx {
    fn new(tx: IdbTransaction, mode: TransactionMode) -> Self {
        let outcome = transaction_to_promise(&tx);
        IdbTx {
            tx,
            mode,
            outcome,
            aborted: Cell::new(false),
        }
    }

    fn object_store(&self, store: &str) -> StorageResult<IdbObjectStore> {
        self.tx
            .object_store(store)
            .map_err(|e| request_error("object_store", store, &e))
    }

    async fn request(
        &self,
        operation: &'static str,
        store: &str,
        issue: impl FnOnce(&IdbObjectStore) -> Result<IdbRequest, JsValue>,
    ) -> StorageResult<JsValue> {
        let os = self.object_store(store)?;
        let req = issue(&os).map_err(|e| request_error(operation, store, &e))?;
        idb::await_request(&req)
            .await
            .map_err(|e| request_error(operation, store, &e))
    }

    async fn write(
        &self,
        operation: &'static str,
        store: &str,
        row: Fields,
        replace: bool,
    ) -> StorageResult<Key> {
        if self.mode == TransactionMode::ReadOnly {
            return Err(StorageError::ReadOnly(store.to_string()));
        }
        let value = fields_to_js(&row)?;
        let key = self
            .request(operation, store, |os| {
                if replace {
                    os.put(&value)
                } else {
                    os.add(&value)
                }
            })
            .await?;
        key_from_js(store, &key)
    }
}

impl Transaction for IdbTx {
    fn mode(&self) -> TransactionMode {
        self.mode
    }

    fn add<'a>(&'a self, store: &'a str, row: Fields) -> LocalBoxFuture<'a, StorageResult<Key>> {
        Box::pin(self.write("add", store, row, false))
    }

    fn put<'a>(&'a self, store: &'a str, row: Fields) -> LocalBoxFuture<'a, StorageResult<Key>> {
        Box::pin(self.write("put", store, row, true))
    }

    fn get<'a>(
        &'a self,
        store: &'a str,
        key: &'a Key,
    ) -> LocalBoxFuture<'a, StorageResult<Option<Fields>>> {
        Box::pin(async move {
            let js_key = key_to_js(key);
            let row = self.request("get", store, |os| os.get(&js_key)).await?;
            if row.is_undefined() || row.is_null() {
                return Ok(None);
            }
            fields_from_js(&row).map(Some)
        })
    }

    fn delete<'a>(&'a self, store: &'a str, key: &'a Key) -> LocalBoxFuture<'a, StorageResult<()>> {
        Box::pin(async move {
            if self.mode == TransactionMode::ReadOnly {
                return Err(StorageError::ReadOnly(store.to_string()));
            }
            let js_key = key_to_js(key);
            self.request("delete", store, |os| os.delete(&js_key)).await?;
            Ok(())
        })
    }

    fn count<'a>(&'a self, store: &'a str) -> LocalBoxFuture<'a, StorageResult<u64>> {
        Box::pin(async move {
            let n = self.request("count", store, |os| os.count()).await?;
            Ok(n.as_f64().unwrap_or(0.0) as u64)
        })
    }

    fn clear<'a>(&'a self, store: &'a str) -> LocalBoxFuture<'a, StorageResult<()>> {
        Box::pin(async move {
            if self.mode == TransactionMode::ReadOnly {
                return Err(StorageError::ReadOnly(store.to_string()));
            }
            self.request("clear", store, |os| os.clear()).await?;
            Ok(())
        })
    }

    fn open_cursor<'a>(
        &'a self,
        store: &'a str,
    ) -> LocalBoxFuture<'a, StorageResult<Box<dyn Cursor + 'a>>> {
        Box::pin(async move {
            let request = self
                .object_store(store)?
                .open_cursor()
                .map_err(|e| request_error("open_cursor", store, &e))?;
            let pending = request_to_promise(&request);
            Ok(Box::new(IdbCursor {
                store,
                request,
                pending: Some(pending),
                current: None,
                exhausted: false,
            }) as Box<dyn Cursor + 'a>)
        })
    }

    fn commit(&self) -> LocalBoxFuture<'_, StorageResult<()>> {
        Box::pin(async move {
            JsFuture::from(self.outcome.clone())
                .await
                .map(|_| ())
                .map_err(|e| StorageError::Aborted(DomFailure::from_js(&e).cause()))
        })
    }

    fn abort(&self) -> StorageResult<()> {
        if self.aborted.replace(true) {
            return Ok(());
        }
        self.tx.abort().map_err(|e| {
            self.aborted.set(false);
            request_error("abort", "", &e)
        })
    }
}

/// Cursor stepping through a store in key order.
///
/// Each step re-arms the request's success handler before `continue()` is
/// issued; the cursor request fires `success` once per row.
struct IdbCursor<'a> {
    store: &'a str,
    request: IdbRequest,
    pending: Option<Promise>,
    current: Option<IdbCursorWithValue>,
    exhausted: bool,
}

impl IdbCursor<'_> {
    async fn step(&mut self) -> StorageResult<Option<(Key, Fields)>> {
        if self.exhausted {
            return Ok(None);
        }
        let promise = match self.pending.take() {
            Some(promise) => promise,
            None => {
                let Some(cursor) = self.current.take() else {
                    return Ok(None);
                };
                let promise = request_to_promise(&self.request);
                cursor
                    .continue_()
                    .map_err(|e| request_error("cursor", self.store, &e))?;
                promise
            }
        };

        let result = JsFuture::from(promise)
            .await
            .map_err(|e| request_error("cursor", self.store, &e))?;
        if result.is_null() || result.is_undefined() {
            self.exhausted = true;
            return Ok(None);
        }

        let cursor: IdbCursorWithValue = result.unchecked_into();
        let key = cursor
            .primary_key()
            .map_err(|e| request_error("cursor", self.store, &e))?;
        let value = cursor
            .value()
            .map_err(|e| request_error("cursor", self.store, &e))?;
        let row = (key_from_js(self.store, &key)?, fields_from_js(&value)?);
        self.current = Some(cursor);
        Ok(Some(row))
    }
}

impl Cursor for IdbCursor<'_> {
    fn next(&mut self) -> LocalBoxFuture<'_, StorageResult<Option<(Key, Fields)>>> {
        Box::pin(self.step())
    }
}

