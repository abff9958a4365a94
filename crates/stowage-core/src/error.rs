//! Error types for model operations

use std::fmt;

use thiserror::Error;

use crate::schema::DataType;
use crate::storage::StorageError;
use crate::value::ValueKind;

/// Result type for model operations
pub type OrmResult<T> = Result<T, OrmError>;

/// Errors returned by the engine, models, records and queries.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OrmError {
    /// A row violates its store's schema; nothing was written
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The storage engine reported a failure
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Invalid schema definition
    #[error("schema error: {0}")]
    Schema(String),

    /// Malformed where clause or query options
    #[error("query error: {0}")]
    Query(String),

    /// No store with this name has been defined
    #[error("unknown model: {0}")]
    UnknownModel(String),

    /// No association with this alias or accessor exists on the model
    #[error("model '{model}' has no association '{name}'")]
    UnknownAssociation { model: String, name: String },

    /// The row behind a record no longer exists
    #[error("{model} with key {key} not found")]
    NotFound { model: String, key: String },

    /// The engine owning a model was dropped
    #[error("engine for model '{0}' has been dropped")]
    EngineDropped(String),
}

impl OrmError {
    pub fn is_validation(&self) -> bool {
        matches!(self, OrmError::Validation(_))
    }

    pub fn is_storage(&self) -> bool {
        matches!(self, OrmError::Storage(_))
    }

    /// True when an open or delete was blocked by another connection.
    pub fn is_blocked(&self) -> bool {
        matches!(
            self,
            OrmError::Storage(StorageError::Blocked { .. })
                | OrmError::Storage(StorageError::DeleteBlocked { .. })
        )
    }
}

/// Schema-contract violations found in one row.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("validation failed for '{model}': {}", summarize(.violations))]
pub struct ValidationError {
    pub model: String,
    pub violations: Vec<FieldViolation>,
}

impl ValidationError {
    pub fn new(model: impl Into<String>, violations: Vec<FieldViolation>) -> Self {
        Self {
            model: model.into(),
            violations,
        }
    }

    /// Violation for `field`, if any.
    pub fn violation(&self, field: &str) -> Option<&FieldViolation> {
        self.violations.iter().find(|v| v.field == field)
    }
}

fn summarize(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// A single field that failed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldViolation {
    pub field: String,
    pub kind: ViolationKind,
}

impl FieldViolation {
    pub fn new(field: impl Into<String>, kind: ViolationKind) -> Self {
        Self {
            field: field.into(),
            kind,
        }
    }
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ViolationKind::NotNull => write!(f, "{} cannot be null", self.field),
            ViolationKind::TypeMismatch { expected, found } => {
                write!(f, "{} must be a {}, got {}", self.field, expected, found)
            }
            ViolationKind::MissingPrimaryKey => {
                write!(f, "primary key {} must be supplied", self.field)
            }
            ViolationKind::PrimaryKeyImmutable => {
                write!(f, "primary key {} cannot be changed", self.field)
            }
            ViolationKind::DefaultFactory(cause) => {
                write!(f, "default for {} failed: {}", self.field, cause)
            }
        }
    }
}

/// Why a field failed validation.
#[derive(Debug, Clone, PartialEq)]
pub enum ViolationKind {
    /// `allow_null(false)` field is absent or null
    NotNull,
    /// Value does not have the declared type
    TypeMismatch { expected: DataType, found: ValueKind },
    /// Non auto-increment primary key not supplied on create
    MissingPrimaryKey,
    /// Attempt to change the primary key of a stored row
    PrimaryKeyImmutable,
    /// Default factory returned an error
    DefaultFactory(String),
}
