//! Per-store model handles

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::debug;

use crate::association::{self, Association, AssociationKind, AssociationOptions, Related};
use crate::engine::{Engine, EngineInner};
use crate::error::{OrmError, OrmResult};
use crate::logging::prefix;
use crate::query::{matcher, Direction, FindOptions, Query, WhereClause, WriteOptions};
use crate::record::Record;
use crate::schema::StoreSchema;
use crate::storage::{Key, Transaction, TransactionMode};
use crate::transaction::TransactionScope;
use crate::validate;
use crate::value::{Fields, Value};

/// Handle to one defined store.
///
/// Cheap to clone. A model does not keep its engine alive; once the engine
/// is dropped every operation fails with [`OrmError::EngineDropped`].
#[derive(Clone)]
pub struct Model {
    inner: Rc<ModelInner>,
}

struct ModelInner {
    schema: StoreSchema,
    engine: Weak<EngineInner>,
    associations: RefCell<Vec<Association>>,
}

/// Transaction used by a single model call: either opened for the call and
/// finished with it, or borrowed from a caller's scope.
pub(crate) enum TxGuard {
    Owned(Rc<dyn Transaction>),
    Borrowed(Rc<dyn Transaction>),
}

impl TxGuard {
    pub(crate) fn tx(&self) -> &dyn Transaction {
        match self {
            TxGuard::Owned(tx) | TxGuard::Borrowed(tx) => tx.as_ref(),
        }
    }

    /// Commit an owned transaction on success, abort it on failure. Borrowed
    /// transactions are left to their scope.
    pub(crate) async fn finish<T>(self, result: OrmResult<T>) -> OrmResult<T> {
        match self {
            TxGuard::Borrowed(_) => result,
            TxGuard::Owned(tx) => match result {
                Ok(value) => {
                    tx.commit().await?;
                    Ok(value)
                }
                Err(e) => {
                    // a failed request has usually aborted already
                    let _ = tx.abort();
                    Err(e)
                }
            },
        }
    }
}

impl Model {
    pub(crate) fn new(schema: StoreSchema, engine: Weak<EngineInner>) -> Self {
        Self {
            inner: Rc::new(ModelInner {
                schema,
                engine,
                associations: RefCell::new(Vec::new()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.schema.name()
    }

    pub fn schema(&self) -> &StoreSchema {
        &self.inner.schema
    }

    fn engine(&self) -> OrmResult<Engine> {
        self.inner
            .engine
            .upgrade()
            .map(Engine::from_inner)
            .ok_or_else(|| OrmError::EngineDropped(self.name().to_string()))
    }

    pub(crate) async fn guard(
        &self,
        scope: Option<&TransactionScope>,
        mode: TransactionMode,
    ) -> OrmResult<TxGuard> {
        match scope {
            Some(scope) => {
                scope.check_store(self.name())?;
                Ok(TxGuard::Borrowed(scope.raw()))
            }
            None => {
                let engine = self.engine()?;
                let tx = engine.begin(&[self.name().to_string()], mode).await?;
                Ok(TxGuard::Owned(tx))
            }
        }
    }

    // -- writes --

    /// Insert a row after applying defaults and validating it.
    ///
    /// Fails with a validation error before any storage request is made.
    pub async fn create(&self, data: Fields) -> OrmResult<Record> {
        self.create_with(data, &WriteOptions::default()).await
    }

    pub async fn create_with(&self, data: Fields, options: &WriteOptions) -> OrmResult<Record> {
        let schema = self.schema();
        let primary_key = schema.primary_key();
        let mut data = data;

        validate::apply_defaults(schema, &mut data)?;
        if schema.auto_increment() && matches!(data.get(primary_key), Some(Value::Null)) {
            data.remove(primary_key);
        }
        validate::validate(schema, &data)?;

        let guard = self
            .guard(options.transaction.as_ref(), TransactionMode::ReadWrite)
            .await?;
        let result = guard
            .tx()
            .add(self.name(), data.clone())
            .await
            .map_err(OrmError::from);
        let key = guard.finish(result).await?;

        debug!("{} created {} {}", prefix::DB, self.name(), key);
        data.insert(primary_key.to_string(), key.to_value());
        Ok(Record::new(self.clone(), data))
    }

    /// Alias of [`create`](Model::create).
    pub async fn add(&self, data: Fields) -> OrmResult<Record> {
        self.create(data).await
    }

    /// Create each item in turn, stopping at the first failure.
    pub async fn bulk_create(&self, items: Vec<Fields>) -> OrmResult<Vec<Record>> {
        self.bulk_create_with(items, &WriteOptions::default()).await
    }

    pub async fn bulk_create_with(
        &self,
        items: Vec<Fields>,
        options: &WriteOptions,
    ) -> OrmResult<Vec<Record>> {
        let mut records = Vec::with_capacity(items.len());
        for item in items {
            records.push(self.create_with(item, options).await?);
        }
        Ok(records)
    }

    /// Like `bulk_create`, returning only the assigned keys.
    pub async fn bulk_add(&self, items: Vec<Fields>) -> OrmResult<Vec<Key>> {
        let records = self.bulk_create(items).await?;
        Ok(records.iter().filter_map(Record::primary_key).collect())
    }

    /// Delete every key in one transaction.
    ///
    /// The first failing delete aborts the transaction and its error is
    /// returned; no partial count is reported.
    pub async fn bulk_delete<K: Into<Key>>(
        &self,
        ids: impl IntoIterator<Item = K>,
    ) -> OrmResult<usize> {
        let keys: Vec<Key> = ids.into_iter().map(Into::into).collect();
        let guard = self.guard(None, TransactionMode::ReadWrite).await?;
        let mut result = Ok(keys.len());
        for key in &keys {
            if let Err(e) = guard.tx().delete(self.name(), key).await {
                result = Err(OrmError::from(e));
                break;
            }
        }
        let deleted = guard.finish(result).await?;
        debug!("{} bulk deleted {} from {}", prefix::DB, deleted, self.name());
        Ok(deleted)
    }

    /// Apply `data` to every row matching `options` and save each one.
    ///
    /// Returns the number of rows updated. Not atomic unless
    /// `options.transaction` is set.
    pub async fn update(&self, data: Fields, options: &FindOptions) -> OrmResult<usize> {
        let query = FindOptions {
            include: Vec::new(),
            ..options.clone()
        };
        let write = WriteOptions {
            transaction: options.transaction.clone(),
        };
        let records = self.find_all(&query).await?;
        let updated = records.len();
        for mut record in records {
            record.set_all(data.clone())?;
            record.save_with(&write).await?;
        }
        debug!("{} updated {} in {}", prefix::DB, updated, self.name());
        Ok(updated)
    }

    /// Delete every row matching `options`; returns how many were deleted.
    pub async fn destroy(&self, options: &FindOptions) -> OrmResult<usize> {
        let query = FindOptions {
            include: Vec::new(),
            ..options.clone()
        };
        let write = WriteOptions {
            transaction: options.transaction.clone(),
        };
        let records = self.find_all(&query).await?;
        for record in &records {
            record.destroy_with(&write).await?;
        }
        debug!("{} destroyed {} in {}", prefix::DB, records.len(), self.name());
        Ok(records.len())
    }

    pub async fn clear(&self) -> OrmResult<()> {
        let guard = self.guard(None, TransactionMode::ReadWrite).await?;
        let result = guard
            .tx()
            .clear(self.name())
            .await
            .map_err(OrmError::from);
        guard.finish(result).await?;
        debug!("{} cleared {}", prefix::DB, self.name());
        Ok(())
    }

    // -- reads --

    pub async fn find_by_pk(&self, id: impl Into<Key>) -> OrmResult<Option<Record>> {
        self.find_by_pk_with(id, &FindOptions::default()).await
    }

    /// Key lookup honouring `options.include` and `options.transaction`.
    pub async fn find_by_pk_with(
        &self,
        id: impl Into<Key>,
        options: &FindOptions,
    ) -> OrmResult<Option<Record>> {
        let key = id.into();
        let guard = self
            .guard(options.transaction.as_ref(), TransactionMode::ReadOnly)
            .await?;
        let result = guard
            .tx()
            .get(self.name(), &key)
            .await
            .map_err(OrmError::from);
        let Some(data) = guard.finish(result).await? else {
            return Ok(None);
        };

        let mut records = vec![Record::new(self.clone(), data)];
        self.load_includes(&mut records, options).await?;
        Ok(records.pop())
    }

    /// Alias of [`find_by_pk`](Model::find_by_pk).
    pub async fn get(&self, id: impl Into<Key>) -> OrmResult<Option<Record>> {
        self.find_by_pk(id).await
    }

    /// `find_all` with `limit: 1`.
    pub async fn find_one(&self, options: &FindOptions) -> OrmResult<Option<Record>> {
        let options = options.clone().limit(1);
        Ok(self.find_all(&options).await?.into_iter().next())
    }

    /// Scan the store, filter, sort, then apply `offset` and `limit`.
    pub async fn find_all(&self, options: &FindOptions) -> OrmResult<Vec<Record>> {
        let guard = self
            .guard(options.transaction.as_ref(), TransactionMode::ReadOnly)
            .await?;
        let result = self.scan(guard.tx(), options).await;
        let mut rows = guard.finish(result).await?;
        let scanned = rows.len();

        matcher::sort_rows(&mut rows, &options.order);
        let rows = matcher::paginate(rows, options.offset, options.limit);
        debug!(
            "{} find_all {}: {} matched, {} returned",
            prefix::DB,
            self.name(),
            scanned,
            rows.len()
        );

        let mut records: Vec<Record> = rows
            .into_iter()
            .map(|data| Record::new(self.clone(), data))
            .collect();
        self.load_includes(&mut records, options).await?;
        Ok(records)
    }

    /// Every row, in key order.
    pub async fn to_array(&self) -> OrmResult<Vec<Record>> {
        self.find_all(&FindOptions::default()).await
    }

    async fn scan(&self, tx: &dyn Transaction, options: &FindOptions) -> OrmResult<Vec<Fields>> {
        let mut cursor = tx.open_cursor(self.name()).await?;
        let mut rows = Vec::new();
        while let Some((_, row)) = cursor.next().await? {
            if options.matches(&row) {
                rows.push(row);
            }
        }
        Ok(rows)
    }

    /// Native row count.
    pub async fn count(&self) -> OrmResult<usize> {
        self.count_with(&WriteOptions::default()).await
    }

    pub(crate) async fn count_with(&self, options: &WriteOptions) -> OrmResult<usize> {
        let guard = self
            .guard(options.transaction.as_ref(), TransactionMode::ReadOnly)
            .await?;
        let result = guard
            .tx()
            .count(self.name())
            .await
            .map_err(OrmError::from);
        let count = guard.finish(result).await?;
        Ok(count as usize)
    }

    // -- chainable queries --

    pub fn query(&self) -> Query {
        Query::new(self.clone())
    }

    /// Start a chainable condition on `field`.
    pub fn where_field(&self, field: impl Into<String>) -> WhereClause {
        self.query().and(field)
    }

    pub fn order_by(&self, field: impl Into<String>) -> Query {
        self.query().order_by(field)
    }

    // -- associations --

    /// Register a one-to-many association; target rows hold this model's
    /// key in the foreign key (default `{source}Id`).
    pub fn has_many(&self, target: &Model, options: AssociationOptions) -> Association {
        self.associate(AssociationKind::HasMany, target, options)
    }

    /// Register a many-to-one association; this model's rows hold the
    /// target's key in the foreign key (default `{target}Id`).
    pub fn belongs_to(&self, target: &Model, options: AssociationOptions) -> Association {
        self.associate(AssociationKind::BelongsTo, target, options)
    }

    fn associate(
        &self,
        kind: AssociationKind,
        target: &Model,
        options: AssociationOptions,
    ) -> Association {
        let association = Association::new(kind, self.name(), target.name(), options);
        let mut associations = self.inner.associations.borrow_mut();
        associations.retain(|a| a.alias != association.alias);
        associations.push(association.clone());
        association
    }

    pub fn associations(&self) -> Vec<Association> {
        self.inner.associations.borrow().clone()
    }

    /// Look up an association by alias or accessor name (`getPosts`).
    pub fn association(&self, name: &str) -> OrmResult<Association> {
        self.inner
            .associations
            .borrow()
            .iter()
            .find(|a| a.answers_to(name))
            .cloned()
            .ok_or_else(|| association::unknown(self.name(), name))
    }

    /// Resolve the rows linked to `record` through the association `name`.
    pub async fn get_associated(
        &self,
        record: &Record,
        name: &str,
        options: &FindOptions,
    ) -> OrmResult<Related> {
        let association = self.association(name)?;
        let target = self.engine()?.model(&association.target)?;
        association::resolve(&association, &target, record, options.transaction.as_ref()).await
    }

    async fn load_includes(&self, records: &mut [Record], options: &FindOptions) -> OrmResult<()> {
        if options.include.is_empty() || records.is_empty() {
            return Ok(());
        }
        for alias in &options.include {
            let association = self.association(alias)?;
            let target = self.engine()?.model(&association.target)?;
            for record in records.iter_mut() {
                let related = association::resolve(
                    &association,
                    &target,
                    record,
                    options.transaction.as_ref(),
                )
                .await?;
                record.set_included(association.alias.clone(), related);
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("name", &self.name())
            .field("primary_key", &self.schema().primary_key())
            .finish()
    }
}

/// Sort key used by `reverse()` when no order is given.
pub(crate) fn primary_key_order(model: &Model, direction: Direction) -> (String, Direction) {
    (model.schema().primary_key().to_string(), direction)
}
