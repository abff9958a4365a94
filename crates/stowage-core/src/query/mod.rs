//! Filtering, ordering and pagination
//!
//! Every read goes through the same pipeline: a full cursor scan filtered by
//! a [`Where`] clause, then a stable sort over the `order` keys, then
//! `offset`, then `limit`. No index is consulted while filtering.

mod builder;
mod filter;
pub mod matcher;

pub use builder::{Query, WhereClause};
pub use filter::{FieldCondition, Operator, Where};

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::transaction::TransactionScope;

/// Sort direction of an `order` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Direction {
    #[default]
    #[serde(rename = "ASC")]
    Asc,
    #[serde(rename = "DESC")]
    Desc,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Asc => f.write_str("ASC"),
            Direction::Desc => f.write_str("DESC"),
        }
    }
}

/// Options for `find_all` and friends.
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub where_clause: Option<Where>,
    pub order: Vec<(String, Direction)>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    /// Association aliases to load with each result
    pub include: Vec<String>,
    /// Run inside this transaction instead of a fresh one
    pub transaction: Option<TransactionScope>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, clause: Where) -> Self {
        self.where_clause = Some(clause);
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order.push((field.into(), direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn include(mut self, alias: impl Into<String>) -> Self {
        self.include.push(alias.into());
        self
    }

    pub fn transaction(mut self, scope: &TransactionScope) -> Self {
        self.transaction = Some(scope.clone());
        self
    }

    pub(crate) fn matches(&self, row: &crate::value::Fields) -> bool {
        self.where_clause
            .as_ref()
            .map_or(true, |clause| clause.matches(row))
    }
}

/// Options for writes outside `find`.
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    pub transaction: Option<TransactionScope>,
}

impl WriteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transaction(mut self, scope: &TransactionScope) -> Self {
        self.transaction = Some(scope.clone());
        self
    }
}
