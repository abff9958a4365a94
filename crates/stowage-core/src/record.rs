//! Live record handles

use std::collections::BTreeMap;

use tracing::debug;

use crate::association::Related;
use crate::error::{FieldViolation, OrmError, OrmResult, ValidationError, ViolationKind};
use crate::logging::prefix;
use crate::model::Model;
use crate::query::{FindOptions, WriteOptions};
use crate::storage::{Key, TransactionMode};
use crate::validate;
use crate::value::{Fields, Value};

/// One row bound to its model.
///
/// The data map is what gets stored; eager-loaded associations live beside
/// it and are never written back. A record is a snapshot: it goes stale when
/// the stored row changes until [`reload`](Record::reload) is called.
#[derive(Debug, Clone)]
pub struct Record {
    model: Model,
    data: Fields,
    included: BTreeMap<String, Related>,
}

impl Record {
    pub(crate) fn new(model: Model, data: Fields) -> Self {
        Self {
            model,
            data,
            included: BTreeMap::new(),
        }
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.data.get(field)
    }

    /// Set a field on the live instance. Nothing is written until `save`.
    ///
    /// Changing a primary key that is already set is a validation error.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) -> OrmResult<()> {
        let field = field.into();
        let value = value.into();
        let primary_key = self.model.schema().primary_key();
        if field == primary_key {
            if let Some(current) = self.data.get(primary_key) {
                if !current.is_null() && *current != value {
                    return Err(ValidationError::new(
                        self.model.name(),
                        vec![FieldViolation::new(field, ViolationKind::PrimaryKeyImmutable)],
                    )
                    .into());
                }
            }
        }
        self.data.insert(field, value);
        Ok(())
    }

    /// Merge `changes` into the live instance, rejecting primary key changes.
    pub fn set_all(&mut self, changes: Fields) -> OrmResult<()> {
        validate::check_key_unchanged(self.model.schema(), &self.data, &changes)?;
        self.data.extend(changes);
        Ok(())
    }

    pub fn data(&self) -> &Fields {
        &self.data
    }

    pub fn into_data(self) -> Fields {
        self.data
    }

    pub fn primary_key(&self) -> Option<Key> {
        self.data
            .get(self.model.schema().primary_key())
            .and_then(Key::from_value)
    }

    /// An association loaded through `include`.
    pub fn included(&self, alias: &str) -> Option<&Related> {
        self.included.get(alias)
    }

    pub(crate) fn set_included(&mut self, alias: String, related: Related) {
        self.included.insert(alias, related);
    }

    /// The data map as JSON, with loaded associations under their alias.
    pub fn to_json(&self) -> serde_json::Value {
        let mut json = Value::Object(self.data.clone()).to_json();
        if let serde_json::Value::Object(map) = &mut json {
            for (alias, related) in &self.included {
                map.insert(alias.clone(), related.to_json());
            }
        }
        json
    }

    /// Validate and write the data map with `put`.
    pub async fn save(&mut self) -> OrmResult<()> {
        self.save_with(&WriteOptions::default()).await
    }

    pub async fn save_with(&mut self, options: &WriteOptions) -> OrmResult<()> {
        let schema = self.model.schema();
        let primary_key = schema.primary_key().to_string();
        let mut row = self.data.clone();
        if schema.auto_increment() && matches!(row.get(&primary_key), Some(Value::Null)) {
            row.remove(&primary_key);
        }
        validate::validate(schema, &row)?;

        let guard = self
            .model
            .guard(options.transaction.as_ref(), TransactionMode::ReadWrite)
            .await?;
        let result = guard
            .tx()
            .put(self.model.name(), row)
            .await
            .map_err(OrmError::from);
        let key = guard.finish(result).await?;

        debug!("{} saved {} {}", prefix::DB, self.model.name(), key);
        self.data.insert(primary_key, key.to_value());
        Ok(())
    }

    /// Re-read the stored row and merge its values into this instance.
    pub async fn reload(&mut self) -> OrmResult<()> {
        let key = self.require_key()?;
        match self.model.find_by_pk(key.clone()).await? {
            Some(fresh) => {
                self.data.extend(fresh.into_data());
                Ok(())
            }
            None => Err(OrmError::NotFound {
                model: self.model.name().to_string(),
                key: key.to_string(),
            }),
        }
    }

    pub async fn destroy(&self) -> OrmResult<()> {
        self.destroy_with(&WriteOptions::default()).await
    }

    pub async fn destroy_with(&self, options: &WriteOptions) -> OrmResult<()> {
        let key = self.require_key()?;
        let guard = self
            .model
            .guard(options.transaction.as_ref(), TransactionMode::ReadWrite)
            .await?;
        let result = guard
            .tx()
            .delete(self.model.name(), &key)
            .await
            .map_err(OrmError::from);
        guard.finish(result).await?;
        debug!("{} destroyed {} {}", prefix::DB, self.model.name(), key);
        Ok(())
    }

    /// Resolve an association by alias or accessor name (`getPosts`).
    pub async fn related(&self, name: &str) -> OrmResult<Related> {
        self.model.get_associated(self, name, &FindOptions::default()).await
    }

    fn require_key(&self) -> OrmResult<Key> {
        self.primary_key().ok_or_else(|| {
            ValidationError::new(
                self.model.name(),
                vec![FieldViolation::new(
                    self.model.schema().primary_key(),
                    ViolationKind::MissingPrimaryKey,
                )],
            )
            .into()
        })
    }
}
