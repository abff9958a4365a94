//! Association descriptors and their resolution

use convert_case::{Case, Casing};
use futures::FutureExt;

use crate::error::{OrmError, OrmResult};
use crate::model::Model;
use crate::query::{FindOptions, Where};
use crate::record::Record;
use crate::storage::Key;
use crate::transaction::TransactionScope;

/// Kind of an association.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociationKind {
    /// Target rows carry the source's primary key in `foreign_key`
    HasMany,
    /// The source row carries the target's primary key in `foreign_key`
    BelongsTo,
}

/// Options for `has_many` / `belongs_to`.
#[derive(Debug, Clone, Default)]
pub struct AssociationOptions {
    pub foreign_key: Option<String>,
    /// Alias; defaults to the target store name
    pub alias: Option<String>,
}

impl AssociationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn foreign_key(mut self, field: impl Into<String>) -> Self {
        self.foreign_key = Some(field.into());
        self
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }
}

/// A registered association.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Association {
    pub kind: AssociationKind,
    pub source: String,
    pub target: String,
    pub foreign_key: String,
    pub alias: String,
}

impl Association {
    pub(crate) fn new(
        kind: AssociationKind,
        source: &str,
        target: &str,
        options: AssociationOptions,
    ) -> Self {
        let foreign_key = options.foreign_key.unwrap_or_else(|| match kind {
            AssociationKind::HasMany => format!("{}Id", source),
            AssociationKind::BelongsTo => format!("{}Id", target),
        });
        Self {
            kind,
            source: source.to_string(),
            target: target.to_string(),
            foreign_key,
            alias: options.alias.unwrap_or_else(|| target.to_string()),
        }
    }

    /// Accessor name, `get` followed by the PascalCase alias.
    pub fn accessor(&self) -> String {
        format!("get{}", self.alias.to_case(Case::Pascal))
    }

    /// True when `name` is this association's alias or accessor.
    pub fn answers_to(&self, name: &str) -> bool {
        self.alias == name || self.accessor() == name
    }
}

/// Rows loaded through an association.
#[derive(Debug, Clone)]
pub enum Related {
    Many(Vec<Record>),
    One(Option<Record>),
}

impl Related {
    pub fn as_many(&self) -> Option<&[Record]> {
        match self {
            Related::Many(records) => Some(records),
            Related::One(_) => None,
        }
    }

    pub fn as_one(&self) -> Option<&Record> {
        match self {
            Related::One(record) => record.as_ref(),
            Related::Many(_) => None,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Related::Many(records) => records.len(),
            Related::One(record) => usize::from(record.is_some()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Related::Many(records) => {
                serde_json::Value::Array(records.iter().map(Record::to_json).collect())
            }
            Related::One(Some(record)) => record.to_json(),
            Related::One(None) => serde_json::Value::Null,
        }
    }
}

/// Load the rows `association` links to from `record`.
pub(crate) async fn resolve(
    association: &Association,
    target: &Model,
    record: &Record,
    scope: Option<&TransactionScope>,
) -> OrmResult<Related> {
    match association.kind {
        AssociationKind::HasMany => {
            let Some(key) = record.get(record.model().schema().primary_key()) else {
                return Ok(Related::Many(Vec::new()));
            };
            let clause = Where::new().eq(association.foreign_key.clone(), key.clone());
            let mut options = FindOptions::new().filter(clause);
            options.transaction = scope.cloned();
            // boxed: find_all resolves includes through here
            let records = target.find_all(&options).boxed_local().await?;
            Ok(Related::Many(records))
        }
        AssociationKind::BelongsTo => {
            let Some(value) = record.get(&association.foreign_key) else {
                return Ok(Related::One(None));
            };
            let Some(key) = Key::from_value(value) else {
                return Ok(Related::One(None));
            };
            let mut options = FindOptions::new();
            options.transaction = scope.cloned();
            let record = target.find_by_pk_with(key, &options).boxed_local().await?;
            Ok(Related::One(record))
        }
    }
}

pub(crate) fn unknown(model: &str, name: &str) -> OrmError {
    OrmError::UnknownAssociation {
        model: model.to_string(),
        name: name.to_string(),
    }
}
