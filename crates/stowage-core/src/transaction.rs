//! Multi-store transaction scopes

use std::fmt;
use std::rc::Rc;

use tracing::warn;

use crate::engine::Engine;
use crate::error::{OrmError, OrmResult};
use crate::logging::prefix;
use crate::model::Model;
use crate::query::{FindOptions, WriteOptions};
use crate::record::Record;
use crate::storage::{Key, Transaction};
use crate::value::Fields;

/// Read-write scope handed to the callback of
/// [`Engine::transaction`](crate::Engine::transaction).
///
/// Every operation made through the scope shares one native transaction;
/// either all of them commit or none of them do.
#[derive(Clone)]
pub struct TransactionScope {
    inner: Rc<ScopeInner>,
}

struct ScopeInner {
    engine: Engine,
    tx: Rc<dyn Transaction>,
    stores: Vec<String>,
}

impl TransactionScope {
    pub(crate) fn new(engine: Engine, tx: Rc<dyn Transaction>, stores: Vec<String>) -> Self {
        Self {
            inner: Rc::new(ScopeInner { engine, tx, stores }),
        }
    }

    /// Operations on one store, bound to this scope.
    pub fn store(&self, name: &str) -> OrmResult<ScopedStore> {
        self.check_store(name)?;
        let model = self.inner.engine.model(name)?;
        Ok(ScopedStore {
            model,
            scope: self.clone(),
        })
    }

    pub fn store_names(&self) -> &[String] {
        &self.inner.stores
    }

    pub(crate) fn raw(&self) -> Rc<dyn Transaction> {
        Rc::clone(&self.inner.tx)
    }

    pub(crate) fn check_store(&self, name: &str) -> OrmResult<()> {
        if self.inner.stores.iter().any(|s| s == name) {
            Ok(())
        } else {
            Err(OrmError::UnknownModel(name.to_string()))
        }
    }

    /// Roll back everything done through this scope.
    pub fn abort(&self) -> OrmResult<()> {
        warn!("{} transaction aborted by caller", prefix::DB);
        self.inner.tx.abort().map_err(OrmError::from)
    }
}

impl fmt::Debug for TransactionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionScope")
            .field("stores", &self.inner.stores)
            .finish()
    }
}

/// A store accessed through a [`TransactionScope`].
#[derive(Debug, Clone)]
pub struct ScopedStore {
    model: Model,
    scope: TransactionScope,
}

impl ScopedStore {
    pub fn model(&self) -> &Model {
        &self.model
    }

    fn write_options(&self) -> WriteOptions {
        WriteOptions::new().transaction(&self.scope)
    }

    pub async fn create(&self, data: Fields) -> OrmResult<Record> {
        self.model.create_with(data, &self.write_options()).await
    }

    pub async fn bulk_create(&self, items: Vec<Fields>) -> OrmResult<Vec<Record>> {
        self.model
            .bulk_create_with(items, &self.write_options())
            .await
    }

    pub async fn find_by_pk(&self, id: impl Into<Key>) -> OrmResult<Option<Record>> {
        let options = FindOptions::new().transaction(&self.scope);
        self.model.find_by_pk_with(id, &options).await
    }

    /// `find_all` inside the scope; any transaction set on `options` is
    /// replaced by this one.
    pub async fn find_all(&self, options: FindOptions) -> OrmResult<Vec<Record>> {
        let options = options.transaction(&self.scope);
        self.model.find_all(&options).await
    }

    pub async fn update(&self, data: Fields, options: FindOptions) -> OrmResult<usize> {
        let options = options.transaction(&self.scope);
        self.model.update(data, &options).await
    }

    pub async fn destroy(&self, options: FindOptions) -> OrmResult<usize> {
        let options = options.transaction(&self.scope);
        self.model.destroy(&options).await
    }

    pub async fn count(&self) -> OrmResult<usize> {
        self.model.count_with(&self.write_options()).await
    }
}
