//! In-memory storage backend
//!
//! An emulation of a versioned object-store engine for native targets and
//! tests. Databases live in a registry shared by every clone of the backend,
//! so two engines built from clones of one `MemoryBackend` see the same data
//! and can block each other's upgrades.
//!
//! Writes inside a transaction go to staged copies of the touched stores and
//! are recorded as an operation log. `commit` replays the log against the
//! live stores, re-checking key and unique-index constraints, and publishes
//! the result only if every operation succeeds. Auto-increment keys are
//! drawn from the live generator at request time and are not reused after an
//! abort. Dropping a transaction without committing discards its writes.

use std::cell::{Cell, RefCell};
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use std::sync::Arc;

use futures::future::{self, LocalBoxFuture};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::storage::{
    Connection, Cursor, IndexSpec, Key, StorageBackend, StorageError, StorageResult, Transaction,
    TransactionMode, UpgradeContext, UpgradeHandler,
};
use crate::value::{Fields, Value};

/// Number of requests the backend has served, by kind.
///
/// Tests use these as an I/O spy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpCounts {
    pub opens: usize,
    pub upgrades: usize,
    pub transactions: usize,
    pub adds: usize,
    pub puts: usize,
    pub gets: usize,
    pub deletes: usize,
    pub counts: usize,
    pub clears: usize,
    pub cursors: usize,
}

impl OpCounts {
    /// Total number of row-level requests (reads and writes).
    pub fn requests(&self) -> usize {
        self.adds + self.puts + self.gets + self.deletes + self.counts + self.clears + self.cursors
    }
}

#[derive(Debug, Clone)]
struct StoreState {
    key_path: String,
    auto_increment: bool,
    next_key: f64,
    rows: BTreeMap<Key, Fields>,
    indexes: BTreeMap<String, IndexSpec>,
}

impl StoreState {
    fn new(key_path: &str, auto_increment: bool) -> Self {
        Self {
            key_path: key_path.to_string(),
            auto_increment,
            next_key: 1.0,
            rows: BTreeMap::new(),
            indexes: BTreeMap::new(),
        }
    }

    fn insert(&mut self, store: &str, key: Key, row: Fields, overwrite: bool) -> StorageResult<()> {
        if !overwrite && self.rows.contains_key(&key) {
            return Err(StorageError::Constraint {
                store: store.to_string(),
                cause: format!("key {} already exists", key),
            });
        }
        self.check_unique(store, &key, &row)?;
        self.rows.insert(key, row);
        Ok(())
    }

    fn check_unique(&self, store: &str, key: &Key, row: &Fields) -> StorageResult<()> {
        for index in self.indexes.values().filter(|i| i.unique) {
            let entries = index_entries(index, row);
            if entries.is_empty() {
                continue;
            }
            for (other_key, other) in &self.rows {
                if other_key == key {
                    continue;
                }
                let theirs = index_entries(index, other);
                if let Some(dup) = entries.iter().find(|e| theirs.contains(e)) {
                    return Err(StorageError::Constraint {
                        store: store.to_string(),
                        cause: format!("unique index '{}' already contains {}", index.name, dup),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Index keys a row contributes to `index`. Rows without a valid value at the
/// key path are not indexed.
fn index_entries(index: &IndexSpec, row: &Fields) -> Vec<Value> {
    if let [field] = index.key_path.as_slice() {
        return match row.get(field) {
            Some(Value::Array(items)) if index.multi_entry => items
                .iter()
                .filter(|v| is_valid_key(v))
                .cloned()
                .collect(),
            Some(v) if is_valid_key(v) => vec![v.clone()],
            _ => Vec::new(),
        };
    }

    let parts: Option<Vec<Value>> = index
        .key_path
        .iter()
        .map(|field| row.get(field).filter(|v| is_valid_key(v)).cloned())
        .collect();
    parts.map(|p| vec![Value::Array(p)]).unwrap_or_default()
}

fn is_valid_key(value: &Value) -> bool {
    match value {
        Value::Array(items) => items.iter().all(is_valid_key),
        other => Key::from_value(other).is_some(),
    }
}

#[derive(Debug, Default)]
struct DatabaseState {
    version: u32,
    stores: BTreeMap<String, StoreState>,
    /// Open connection id -> version it was opened at
    connections: HashMap<u64, u32>,
}

#[derive(Debug, Default)]
struct Registry {
    databases: HashMap<String, Arc<Mutex<DatabaseState>>>,
    next_connection: u64,
}

/// In-memory, versioned object-store engine.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    registry: Arc<Mutex<Registry>>,
    counts: Arc<Mutex<OpCounts>>,
}

impl MemoryBackend {
    /// Create a backend with no databases.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the request counters.
    pub fn op_counts(&self) -> OpCounts {
        *self.counts.lock()
    }

    pub fn reset_counts(&self) {
        *self.counts.lock() = OpCounts::default();
    }

    /// Names of every database that exists.
    pub fn database_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.registry.lock().databases.keys().cloned().collect();
        names.sort();
        names
    }

    /// Stored version of a database, `None` if it does not exist.
    pub fn database_version(&self, name: &str) -> Option<u32> {
        let db = self.registry.lock().databases.get(name).cloned()?;
        let version = db.lock().version;
        Some(version)
    }

    fn database(&self, name: &str) -> (Arc<Mutex<DatabaseState>>, u64) {
        let mut registry = self.registry.lock();
        registry.next_connection += 1;
        let id = registry.next_connection;
        let db = registry
            .databases
            .entry(name.to_string())
            .or_default()
            .clone();
        (db, id)
    }

    fn open_sync(
        &self,
        name: &str,
        version: Option<u32>,
        upgrade: UpgradeHandler,
    ) -> StorageResult<Rc<dyn Connection>> {
        self.counts.lock().opens += 1;
        if version == Some(0) {
            return Err(StorageError::Open {
                database: name.to_string(),
                cause: "version must be at least 1".to_string(),
            });
        }

        let (db, id) = self.database(name);
        let mut state = db.lock();
        let current = state.version;
        let target = version.unwrap_or(current.max(1));

        if target < current {
            return Err(StorageError::VersionMismatch {
                database: name.to_string(),
                requested: target,
                current,
            });
        }

        if target > current {
            if let Some(held) = state.connections.values().min() {
                return Err(StorageError::Blocked {
                    database: name.to_string(),
                    requested: target,
                    current: *held,
                });
            }

            let mut staged = state.stores.clone();
            let mut ctx = MemoryUpgrade {
                old_version: current,
                new_version: target,
                stores: &mut staged,
            };
            upgrade(&mut ctx)?;

            state.stores = staged;
            state.version = target;
            self.counts.lock().upgrades += 1;
            debug!(database = name, from = current, to = target, "upgraded");
        }

        state.connections.insert(id, target);
        drop(state);

        Ok(Rc::new(MemoryConnection {
            id,
            name: name.to_string(),
            version: target,
            db,
            counts: self.counts.clone(),
            closed: Cell::new(false),
        }))
    }
}

impl StorageBackend for MemoryBackend {
    fn open<'a>(
        &'a self,
        name: &'a str,
        version: Option<u32>,
        upgrade: UpgradeHandler,
    ) -> LocalBoxFuture<'a, StorageResult<Rc<dyn Connection>>> {
        Box::pin(future::ready(self.open_sync(name, version, upgrade)))
    }

    fn delete_database<'a>(&'a self, name: &'a str) -> LocalBoxFuture<'a, StorageResult<()>> {
        let result = (|| {
            let mut registry = self.registry.lock();
            if let Some(db) = registry.databases.get(name) {
                let open = db.lock().connections.len();
                if open > 0 {
                    return Err(StorageError::DeleteBlocked {
                        database: name.to_string(),
                        connections: open,
                    });
                }
            }
            registry.databases.remove(name);
            Ok(())
        })();
        Box::pin(future::ready(result))
    }
}

struct MemoryUpgrade<'a> {
    old_version: u32,
    new_version: u32,
    stores: &'a mut BTreeMap<String, StoreState>,
}

impl UpgradeContext for MemoryUpgrade<'_> {
    fn old_version(&self) -> u32 {
        self.old_version
    }

    fn new_version(&self) -> u32 {
        self.new_version
    }

    fn store_names(&self) -> Vec<String> {
        self.stores.keys().cloned().collect()
    }

    fn create_store(
        &mut self,
        name: &str,
        key_path: &str,
        auto_increment: bool,
    ) -> StorageResult<()> {
        if self.stores.contains_key(name) {
            return Err(StorageError::Constraint {
                store: name.to_string(),
                cause: "object store already exists".to_string(),
            });
        }
        self.stores
            .insert(name.to_string(), StoreState::new(key_path, auto_increment));
        Ok(())
    }

    fn index_names(&self, store: &str) -> StorageResult<Vec<String>> {
        self.stores
            .get(store)
            .map(|s| s.indexes.keys().cloned().collect())
            .ok_or_else(|| StorageError::StoreNotFound(store.to_string()))
    }

    fn create_index(&mut self, store: &str, index: &IndexSpec) -> StorageResult<()> {
        let state = self
            .stores
            .get_mut(store)
            .ok_or_else(|| StorageError::StoreNotFound(store.to_string()))?;
        if state.indexes.contains_key(&index.name) {
            return Err(StorageError::Constraint {
                store: store.to_string(),
                cause: format!("index '{}' already exists", index.name),
            });
        }
        if index.unique {
            let mut seen: Vec<Value> = Vec::new();
            for row in state.rows.values() {
                for entry in index_entries(index, row) {
                    if seen.contains(&entry) {
                        return Err(StorageError::Constraint {
                            store: store.to_string(),
                            cause: format!(
                                "existing rows violate unique index '{}': {}",
                                index.name, entry
                            ),
                        });
                    }
                    seen.push(entry);
                }
            }
        }
        state.indexes.insert(index.name.clone(), index.clone());
        Ok(())
    }
}

struct MemoryConnection {
    id: u64,
    name: String,
    version: u32,
    db: Arc<Mutex<DatabaseState>>,
    counts: Arc<Mutex<OpCounts>>,
    closed: Cell<bool>,
}

impl Connection for MemoryConnection {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn store_names(&self) -> Vec<String> {
        self.db.lock().stores.keys().cloned().collect()
    }

    fn index_names(&self, store: &str) -> StorageResult<Vec<String>> {
        self.db
            .lock()
            .stores
            .get(store)
            .map(|s| s.indexes.keys().cloned().collect())
            .ok_or_else(|| StorageError::StoreNotFound(store.to_string()))
    }

    fn transaction(
        &self,
        stores: &[String],
        mode: TransactionMode,
    ) -> StorageResult<Rc<dyn Transaction>> {
        if self.closed.get() {
            return Err(StorageError::ConnectionClosed(self.name.clone()));
        }
        if stores.is_empty() {
            return Err(StorageError::Request {
                operation: "transaction",
                cause: "a transaction needs at least one store".to_string(),
            });
        }
        {
            let db = self.db.lock();
            if let Some(missing) = stores.iter().find(|s| !db.stores.contains_key(*s)) {
                return Err(StorageError::StoreNotFound(missing.clone()));
            }
        }
        self.counts.lock().transactions += 1;
        trace!(database = %self.name, ?stores, ?mode, "transaction started");

        Ok(Rc::new(MemoryTransaction {
            db: self.db.clone(),
            scope: stores.to_vec(),
            mode,
            counts: self.counts.clone(),
            state: RefCell::new(TxState::default()),
        }))
    }

    fn close(&self) {
        if !self.closed.replace(true) {
            self.db.lock().connections.remove(&self.id);
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.get()
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.close();
    }
}

#[derive(Debug, Default)]
enum TxStatus {
    #[default]
    Active,
    Committed,
    Aborted(String),
}

#[derive(Debug)]
enum WriteOp {
    Add { store: String, key: Key, row: Fields },
    Put { store: String, key: Key, row: Fields },
    Delete { store: String, key: Key },
    Clear { store: String },
}

#[derive(Debug, Default)]
struct TxState {
    staged: HashMap<String, StoreState>,
    ops: Vec<WriteOp>,
    status: TxStatus,
}

impl TxState {
    fn abort(&mut self, reason: String) {
        self.status = TxStatus::Aborted(reason);
        self.staged.clear();
        self.ops.clear();
    }
}

struct MemoryTransaction {
    db: Arc<Mutex<DatabaseState>>,
    scope: Vec<String>,
    mode: TransactionMode,
    counts: Arc<Mutex<OpCounts>>,
    state: RefCell<TxState>,
}

impl MemoryTransaction {
    fn check_active(&self, store: &str) -> StorageResult<()> {
        match &self.state.borrow().status {
            TxStatus::Active => {}
            TxStatus::Committed => return Err(StorageError::TransactionInactive),
            TxStatus::Aborted(reason) => return Err(StorageError::Aborted(reason.clone())),
        }
        if !self.scope.iter().any(|s| s == store) {
            return Err(StorageError::OutOfScope(store.to_string()));
        }
        Ok(())
    }

    /// Run `f` against the staged copy of `store` if this transaction wrote to
    /// it, otherwise against the live store.
    fn read<R>(&self, store: &str, f: impl FnOnce(&StoreState) -> R) -> StorageResult<R> {
        self.check_active(store)?;
        let state = self.state.borrow();
        if let Some(staged) = state.staged.get(store) {
            return Ok(f(staged));
        }
        let db = self.db.lock();
        db.stores
            .get(store)
            .map(f)
            .ok_or_else(|| StorageError::StoreNotFound(store.to_string()))
    }

    /// Apply a write to the staged copy of `store`. A failed write aborts the
    /// transaction.
    fn write<R>(
        &self,
        store: &str,
        f: impl FnOnce(&mut StoreState) -> StorageResult<(R, WriteOp)>,
    ) -> StorageResult<R> {
        self.check_active(store)?;
        if self.mode == TransactionMode::ReadOnly {
            return Err(StorageError::ReadOnly(store.to_string()));
        }

        let mut state = self.state.borrow_mut();
        let result = match state.staged.entry(store.to_string()) {
            Entry::Occupied(e) => f(e.into_mut()),
            Entry::Vacant(e) => {
                let live = self
                    .db
                    .lock()
                    .stores
                    .get(store)
                    .cloned()
                    .ok_or_else(|| StorageError::StoreNotFound(store.to_string()))?;
                f(e.insert(live))
            }
        };

        match result {
            Ok((value, op)) => {
                state.ops.push(op);
                Ok(value)
            }
            Err(e) => {
                state.abort(e.to_string());
                Err(e)
            }
        }
    }

    /// Resolve the key of a row about to be written, drawing from the live
    /// key generator when the store auto-increments and the row has no key.
    fn assign_key(&self, store: &str, staged: &StoreState, row: &mut Fields) -> StorageResult<Key> {
        let existing = row.get(&staged.key_path).cloned();
        match existing {
            Some(value) => {
                let key = Key::from_value(&value).ok_or_else(|| StorageError::Data {
                    store: store.to_string(),
                    cause: format!("{} is not a valid key", value),
                })?;
                if staged.auto_increment {
                    if let Key::Number(n) = &key {
                        let n = *n;
                        let mut db = self.db.lock();
                        if let Some(live) = db.stores.get_mut(store) {
                            if n >= live.next_key {
                                live.next_key = n.floor() + 1.0;
                            }
                        }
                    }
                }
                Ok(key)
            }
            None if staged.auto_increment => {
                let mut db = self.db.lock();
                let live = db
                    .stores
                    .get_mut(store)
                    .ok_or_else(|| StorageError::StoreNotFound(store.to_string()))?;
                let n = live.next_key;
                live.next_key += 1.0;
                row.insert(staged.key_path.clone(), Value::Number(n));
                Ok(Key::Number(n))
            }
            None => Err(StorageError::Data {
                store: store.to_string(),
                cause: format!("row has no value at key path '{}'", staged.key_path),
            }),
        }
    }

    fn store_row(&self, store: &str, row: Fields, overwrite: bool) -> StorageResult<Key> {
        self.write(store, |staged| {
            let mut row = row;
            let key = self.assign_key(store, staged, &mut row)?;
            staged.insert(store, key.clone(), row.clone(), overwrite)?;
            let op = if overwrite {
                WriteOp::Put {
                    store: store.to_string(),
                    key: key.clone(),
                    row,
                }
            } else {
                WriteOp::Add {
                    store: store.to_string(),
                    key: key.clone(),
                    row,
                }
            };
            Ok((key, op))
        })
    }

    fn bump(&self, f: impl FnOnce(&mut OpCounts)) {
        f(&mut self.counts.lock());
    }
}

/// Replay a write log against clones of the live stores.
fn replay(db: &DatabaseState, ops: &[WriteOp]) -> StorageResult<HashMap<String, StoreState>> {
    let mut stores: HashMap<String, StoreState> = HashMap::new();
    for op in ops {
        let name = match op {
            WriteOp::Add { store, .. }
            | WriteOp::Put { store, .. }
            | WriteOp::Delete { store, .. }
            | WriteOp::Clear { store } => store,
        };
        let target = match stores.entry(name.clone()) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => {
                let live = db
                    .stores
                    .get(name)
                    .cloned()
                    .ok_or_else(|| StorageError::StoreNotFound(name.clone()))?;
                e.insert(live)
            }
        };
        match op {
            WriteOp::Add { store, key, row } => {
                target.insert(store, key.clone(), row.clone(), false)?
            }
            WriteOp::Put { store, key, row } => {
                target.insert(store, key.clone(), row.clone(), true)?
            }
            WriteOp::Delete { key, .. } => {
                target.rows.remove(key);
            }
            WriteOp::Clear { .. } => target.rows.clear(),
        }
    }
    Ok(stores)
}

impl Transaction for MemoryTransaction {
    fn mode(&self) -> TransactionMode {
        self.mode
    }

    fn add<'a>(&'a self, store: &'a str, row: Fields) -> LocalBoxFuture<'a, StorageResult<Key>> {
        self.bump(|c| c.adds += 1);
        Box::pin(future::ready(self.store_row(store, row, false)))
    }

    fn put<'a>(&'a self, store: &'a str, row: Fields) -> LocalBoxFuture<'a, StorageResult<Key>> {
        self.bump(|c| c.puts += 1);
        Box::pin(future::ready(self.store_row(store, row, true)))
    }

    fn get<'a>(
        &'a self,
        store: &'a str,
        key: &'a Key,
    ) -> LocalBoxFuture<'a, StorageResult<Option<Fields>>> {
        self.bump(|c| c.gets += 1);
        Box::pin(future::ready(
            self.read(store, |s| s.rows.get(key).cloned()),
        ))
    }

    fn delete<'a>(&'a self, store: &'a str, key: &'a Key) -> LocalBoxFuture<'a, StorageResult<()>> {
        self.bump(|c| c.deletes += 1);
        let result = self.write(store, |staged| {
            staged.rows.remove(key);
            Ok((
                (),
                WriteOp::Delete {
                    store: store.to_string(),
                    key: key.clone(),
                },
            ))
        });
        Box::pin(future::ready(result))
    }

    fn count<'a>(&'a self, store: &'a str) -> LocalBoxFuture<'a, StorageResult<u64>> {
        self.bump(|c| c.counts += 1);
        Box::pin(future::ready(self.read(store, |s| s.rows.len() as u64)))
    }

    fn clear<'a>(&'a self, store: &'a str) -> LocalBoxFuture<'a, StorageResult<()>> {
        self.bump(|c| c.clears += 1);
        let result = self.write(store, |staged| {
            staged.rows.clear();
            Ok((
                (),
                WriteOp::Clear {
                    store: store.to_string(),
                },
            ))
        });
        Box::pin(future::ready(result))
    }

    fn open_cursor<'a>(
        &'a self,
        store: &'a str,
    ) -> LocalBoxFuture<'a, StorageResult<Box<dyn Cursor + 'a>>> {
        self.bump(|c| c.cursors += 1);
        let result = self
            .read(store, |s| {
                s.rows
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect::<Vec<_>>()
            })
            .map(|rows| {
                Box::new(MemoryCursor {
                    rows: rows.into_iter(),
                }) as Box<dyn Cursor + 'a>
            });
        Box::pin(future::ready(result))
    }

    fn commit(&self) -> LocalBoxFuture<'_, StorageResult<()>> {
        let result = (|| {
            let mut state = self.state.borrow_mut();
            match &state.status {
                TxStatus::Active => {}
                TxStatus::Committed => return Err(StorageError::TransactionInactive),
                TxStatus::Aborted(reason) => return Err(StorageError::Aborted(reason.clone())),
            }

            let ops = std::mem::take(&mut state.ops);
            state.staged.clear();
            if ops.is_empty() {
                state.status = TxStatus::Committed;
                return Ok(());
            }

            let mut db = self.db.lock();
            match replay(&db, &ops) {
                Ok(stores) => {
                    db.stores.extend(stores);
                    state.status = TxStatus::Committed;
                    trace!(writes = ops.len(), "transaction committed");
                    Ok(())
                }
                Err(e) => {
                    state.abort(e.to_string());
                    Err(e)
                }
            }
        })();
        Box::pin(future::ready(result))
    }

    fn abort(&self) -> StorageResult<()> {
        let mut state = self.state.borrow_mut();
        match state.status {
            TxStatus::Committed => Err(StorageError::TransactionInactive),
            TxStatus::Aborted(_) => Ok(()),
            TxStatus::Active => {
                state.abort("aborted by caller".to_string());
                Ok(())
            }
        }
    }
}

struct MemoryCursor {
    rows: std::vec::IntoIter<(Key, Fields)>,
}

impl Cursor for MemoryCursor {
    fn next(&mut self) -> LocalBoxFuture<'_, StorageResult<Option<(Key, Fields)>>> {
        Box::pin(future::ready(Ok(self.rows.next())))
    }
}
