//! Connection and schema registry

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::rc::{Rc, Weak};

use futures::future::{FutureExt, LocalBoxFuture, Shared};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{OrmError, OrmResult};
use crate::logging::prefix;
use crate::model::Model;
use crate::schema::{Attribute, StoreOptions, StoreSchema};
use crate::storage::{
    Connection, StorageBackend, StorageError, StorageResult, Transaction, TransactionMode,
    UpgradeContext, UpgradeHandler,
};
use crate::transaction::TransactionScope;

/// What a migration created.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MigrationReport {
    pub old_version: u32,
    pub new_version: u32,
    pub created_stores: Vec<String>,
    /// `(store, index)` pairs
    pub created_indexes: Vec<(String, String)>,
}

impl MigrationReport {
    pub fn is_empty(&self) -> bool {
        self.created_stores.is_empty() && self.created_indexes.is_empty()
    }
}

/// Connection lifecycle as seen by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Closed,
    Opening,
    Open,
}

type OpenFuture = Shared<LocalBoxFuture<'static, OrmResult<Rc<dyn Connection>>>>;
type MigrationHook = Rc<dyn Fn(&MigrationReport)>;

enum ConnectionState {
    Closed,
    Opening(OpenFuture),
    Open(Rc<dyn Connection>),
}

pub(crate) struct EngineInner {
    config: EngineConfig,
    backend: Rc<dyn StorageBackend>,
    models: RefCell<BTreeMap<String, Model>>,
    state: RefCell<ConnectionState>,
    /// Bumped by `close`; an open started in an older epoch is discarded
    epoch: Cell<u64>,
    migration_hook: RefCell<Option<MigrationHook>>,
}

/// Owns the schema registry and the lazily opened connection.
///
/// ```rust
/// use stowage_core::{fields, Attribute, Engine, EngineConfig, MemoryBackend, StoreOptions};
///
/// # futures::executor::block_on(async {
/// let engine = Engine::new(MemoryBackend::new(), EngineConfig::new("app"));
/// let users = engine
///     .define("users", vec![("name", Attribute::string().not_null())], StoreOptions::default())
///     .unwrap();
///
/// let alice = users.create(fields! { "name" => "Alice" }).await.unwrap();
/// assert_eq!(alice.get("id"), Some(&1.into()));
/// # });
/// ```
#[derive(Clone)]
pub struct Engine {
    inner: Rc<EngineInner>,
}

impl Engine {
    pub fn new(backend: impl StorageBackend + 'static, config: EngineConfig) -> Self {
        Self::with_backend(Rc::new(backend), config)
    }

    pub fn with_backend(backend: Rc<dyn StorageBackend>, config: EngineConfig) -> Self {
        Self {
            inner: Rc::new(EngineInner {
                config,
                backend,
                models: RefCell::new(BTreeMap::new()),
                state: RefCell::new(ConnectionState::Closed),
                epoch: Cell::new(0),
                migration_hook: RefCell::new(None),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Rc<EngineInner>) -> Self {
        Self { inner }
    }

    fn downgrade(&self) -> Weak<EngineInner> {
        Rc::downgrade(&self.inner)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    // -- schema registry --

    /// Register a store. No I/O happens until the first operation.
    ///
    /// Fails when the name is already defined or the schema is invalid.
    pub fn define<K: Into<String>>(
        &self,
        name: &str,
        attributes: impl IntoIterator<Item = (K, Attribute)>,
        options: StoreOptions,
    ) -> OrmResult<Model> {
        if self.inner.models.borrow().contains_key(name) {
            return Err(OrmError::Schema(format!("store '{}' is already defined", name)));
        }
        let schema = StoreSchema::new(name, attributes, options)?;
        let model = Model::new(schema, self.downgrade());
        self.inner
            .models
            .borrow_mut()
            .insert(name.to_string(), model.clone());

        if self.is_initialized() {
            debug!(
                "{} '{}' defined on an open connection; it is created on the next open",
                prefix::DB,
                name
            );
        }
        Ok(model)
    }

    pub fn model(&self, name: &str) -> OrmResult<Model> {
        self.inner
            .models
            .borrow()
            .get(name)
            .cloned()
            .ok_or_else(|| OrmError::UnknownModel(name.to_string()))
    }

    /// Names of every defined store, sorted.
    pub fn store_names(&self) -> Vec<String> {
        self.inner.models.borrow().keys().cloned().collect()
    }

    /// Run `hook` after every migration this engine performs.
    pub fn on_migration(&self, hook: impl Fn(&MigrationReport) + 'static) {
        *self.inner.migration_hook.borrow_mut() = Some(Rc::new(hook));
    }

    // -- connection --

    pub fn status(&self) -> ConnectionStatus {
        match &*self.inner.state.borrow() {
            ConnectionState::Closed => ConnectionStatus::Closed,
            ConnectionState::Opening(_) => ConnectionStatus::Opening,
            ConnectionState::Open(conn) if conn.is_closed() => ConnectionStatus::Closed,
            ConnectionState::Open(_) => ConnectionStatus::Open,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.status() == ConnectionStatus::Open
    }

    /// Open the connection, migrating first if needed.
    ///
    /// Idempotent: concurrent first callers share one in-flight open, and
    /// later calls return the open connection.
    pub async fn open(&self) -> OrmResult<Rc<dyn Connection>> {
        let pending = {
            let mut state = self.inner.state.borrow_mut();
            match &*state {
                ConnectionState::Open(conn) if !conn.is_closed() => return Ok(Rc::clone(conn)),
                ConnectionState::Opening(pending) => pending.clone(),
                _ => {
                    let pending = self.start_open();
                    *state = ConnectionState::Opening(pending.clone());
                    pending
                }
            }
        };
        pending.await
    }

    fn start_open(&self) -> OpenFuture {
        let backend = Rc::clone(&self.inner.backend);
        let name = self.inner.config.database_name.clone();
        let version = self.inner.config.version;
        let schemas: Rc<Vec<StoreSchema>> = Rc::new(
            self.inner
                .models
                .borrow()
                .values()
                .map(|m| m.schema().clone())
                .collect(),
        );
        let weak = self.downgrade();
        let epoch = self.inner.epoch.get();

        async move {
            let result = connect(backend.as_ref(), &name, version, schemas).await;
            let Some(inner) = weak.upgrade() else {
                return result.map(|(conn, _)| conn);
            };

            if inner.epoch.get() != epoch {
                // closed while opening
                if let Ok((conn, _)) = &result {
                    conn.close();
                }
                return Err(StorageError::ConnectionClosed(name).into());
            }

            match result {
                Ok((conn, report)) => {
                    *inner.state.borrow_mut() = ConnectionState::Open(Rc::clone(&conn));
                    info!("{} opened '{}' at version {}", prefix::DB, name, conn.version());
                    if let Some(report) = report {
                        let hook = inner.migration_hook.borrow().clone();
                        if let Some(hook) = hook {
                            hook(&report);
                        }
                    }
                    Ok(conn)
                }
                Err(e) => {
                    *inner.state.borrow_mut() = ConnectionState::Closed;
                    warn!("{} failed to open '{}': {}", prefix::DB, name, e);
                    Err(e)
                }
            }
        }
        .boxed_local()
        .shared()
    }

    /// Release the connection. The next operation opens it again.
    pub fn close(&self) {
        self.inner.epoch.set(self.inner.epoch.get() + 1);
        let previous = std::mem::replace(
            &mut *self.inner.state.borrow_mut(),
            ConnectionState::Closed,
        );
        if let ConnectionState::Open(conn) = previous {
            conn.close();
            info!("{} closed '{}'", prefix::DB, self.inner.config.database_name);
        }
    }

    pub(crate) async fn begin(
        &self,
        stores: &[String],
        mode: TransactionMode,
    ) -> OrmResult<Rc<dyn Transaction>> {
        let conn = self.open().await?;
        Ok(conn.transaction(stores, mode)?)
    }

    /// Run `f` inside one read-write transaction over every defined store
    /// present in the open catalogue.
    ///
    /// Resolves after the commit completes. If `f` fails, the transaction is
    /// aborted and `f`'s error is returned unchanged.
    pub async fn transaction<F, Fut, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(TransactionScope) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<OrmError>,
    {
        // stores defined after the open are not in the catalogue yet
        let conn = self.open().await?;
        let catalogue = conn.store_names();
        let stores: Vec<String> = self
            .store_names()
            .into_iter()
            .filter(|store| catalogue.contains(store))
            .collect();
        let tx = conn
            .transaction(&stores, TransactionMode::ReadWrite)
            .map_err(OrmError::from)?;
        let scope = TransactionScope::new(self.clone(), Rc::clone(&tx), stores);

        match f(scope).await {
            Ok(value) => {
                tx.commit().await.map_err(OrmError::from)?;
                debug!("{} transaction committed", prefix::DB);
                Ok(value)
            }
            Err(e) => {
                if let Err(abort) = tx.abort() {
                    debug!("{} abort after failure: {}", prefix::DB, abort);
                }
                warn!("{} transaction aborted", prefix::DB);
                Err(e)
            }
        }
    }

    /// Drop a whole database. Fails while a connection to it is open.
    pub async fn delete_database(backend: &dyn StorageBackend, name: &str) -> OrmResult<()> {
        backend.delete_database(name).await?;
        info!("{} deleted database '{}'", prefix::DB, name);
        Ok(())
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.inner.config)
            .field("stores", &self.store_names())
            .field("status", &self.status())
            .finish()
    }
}

/// Open `name`, running the additive migration when the catalogue lags
/// behind `schemas`.
async fn connect(
    backend: &dyn StorageBackend,
    name: &str,
    requested: Option<u32>,
    schemas: Rc<Vec<StoreSchema>>,
) -> OrmResult<(Rc<dyn Connection>, Option<MigrationReport>)> {
    let report: Rc<RefCell<Option<MigrationReport>>> = Rc::new(RefCell::new(None));
    let upgrade: UpgradeHandler = {
        let schemas = Rc::clone(&schemas);
        let report = Rc::clone(&report);
        let database = name.to_string();
        Rc::new(move |ctx: &mut dyn UpgradeContext| {
            let created = migrate(ctx, &schemas)?;
            info!(
                "{} migrated '{}' {} -> {}: {} stores, {} indexes created",
                prefix::DB,
                database,
                created.old_version,
                created.new_version,
                created.created_stores.len(),
                created.created_indexes.len()
            );
            *report.borrow_mut() = Some(created);
            Ok(())
        })
    };

    let mut conn = backend.open(name, requested, Rc::clone(&upgrade)).await?;

    if requested.is_none() && needs_migration(conn.as_ref(), &schemas) {
        let next = conn.version() + 1;
        debug!(
            "{} catalogue of '{}' is behind the schema, bumping to version {}",
            prefix::DB,
            name,
            next
        );
        conn.close();
        conn = backend.open(name, Some(next), upgrade).await?;
    }

    let report = report.borrow_mut().take();
    Ok((conn, report))
}

/// Create every missing store and index. Nothing is ever dropped.
fn migrate(
    ctx: &mut dyn UpgradeContext,
    schemas: &[StoreSchema],
) -> StorageResult<MigrationReport> {
    let mut report = MigrationReport {
        old_version: ctx.old_version(),
        new_version: ctx.new_version(),
        ..MigrationReport::default()
    };

    let existing = ctx.store_names();
    for schema in schemas {
        let store = schema.name();
        if !existing.iter().any(|s| s == store) {
            ctx.create_store(store, schema.primary_key(), schema.auto_increment())?;
            report.created_stores.push(store.to_string());
        }

        let indexes = ctx.index_names(store)?;
        for spec in schema.index_specs() {
            if indexes.contains(&spec.name) {
                continue;
            }
            ctx.create_index(store, &spec)?;
            report
                .created_indexes
                .push((store.to_string(), spec.name.clone()));
        }
    }
    Ok(report)
}

fn needs_migration(conn: &dyn Connection, schemas: &[StoreSchema]) -> bool {
    let stores = conn.store_names();
    schemas.iter().any(|schema| {
        if !stores.iter().any(|s| s == schema.name()) {
            return true;
        }
        match conn.index_names(schema.name()) {
            Ok(indexes) => schema
                .index_specs()
                .iter()
                .any(|spec| !indexes.contains(&spec.name)),
            Err(_) => true,
        }
    })
}
