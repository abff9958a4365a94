//! Chainable query builder

use crate::error::OrmResult;
use crate::model::{self, Model};
use crate::record::Record;
use crate::value::{Fields, Value};

use super::filter::{Operator, Where};
use super::{Direction, FindOptions};

#[derive(Debug, Clone)]
struct Condition {
    field: String,
    op: Operator,
    value: Value,
}

/// A query under construction.
///
/// ```rust,no_run
/// # async fn demo(users: stowage_core::Model) -> stowage_core::OrmResult<()> {
/// let page = users
///     .where_field("age").between(18, 65)
///     .and("role").any_of(["admin", "owner"])
///     .order_by("name")
///     .limit(10)
///     .to_array()
///     .await?;
/// # Ok(()) }
/// ```
#[derive(Debug, Clone)]
pub struct Query {
    model: Model,
    conditions: Vec<Condition>,
    order: Option<String>,
    reverse: bool,
    limit: Option<usize>,
    offset: Option<usize>,
}

/// Pending condition on one field; finish it with an operator method.
#[derive(Debug, Clone)]
#[must_use = "a where clause does nothing until an operator is applied"]
pub struct WhereClause {
    query: Query,
    field: String,
}

impl Query {
    pub(crate) fn new(model: Model) -> Self {
        Self {
            model,
            conditions: Vec::new(),
            order: None,
            reverse: false,
            limit: None,
            offset: None,
        }
    }

    /// Add another condition. Conditions are ANDed, also on the same field.
    pub fn and(self, field: impl Into<String>) -> WhereClause {
        WhereClause {
            query: self,
            field: field.into(),
        }
    }

    pub fn order_by(mut self, field: impl Into<String>) -> Self {
        self.order = Some(field.into());
        self
    }

    /// Flip the sort direction. Without `order_by` this orders by primary
    /// key, descending.
    pub fn reverse(mut self) -> Self {
        self.reverse = !self.reverse;
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

    fn push(mut self, field: String, op: Operator, value: Value) -> Self {
        self.conditions.push(Condition { field, op, value });
        self
    }

    /// The where clause these conditions compile to, if any.
    pub fn to_where(&self) -> Option<Where> {
        if self.conditions.is_empty() {
            return None;
        }
        let clause = self
            .conditions
            .iter()
            .fold(Where::new(), |clause, c| {
                clause.op(c.field.clone(), c.op, c.value.clone())
            });
        Some(clause)
    }

    /// The equivalent `find_all` options.
    pub fn to_find_options(&self) -> FindOptions {
        let direction = if self.reverse {
            Direction::Desc
        } else {
            Direction::Asc
        };
        let order = match (&self.order, self.reverse) {
            (Some(field), _) => vec![(field.clone(), direction)],
            (None, true) => vec![model::primary_key_order(&self.model, direction)],
            (None, false) => Vec::new(),
        };
        FindOptions {
            where_clause: self.to_where(),
            order,
            limit: self.limit,
            offset: self.offset,
            ..FindOptions::default()
        }
    }

    pub async fn to_array(&self) -> OrmResult<Vec<Record>> {
        self.model.find_all(&self.to_find_options()).await
    }

    pub async fn first(&self) -> OrmResult<Option<Record>> {
        self.model.find_one(&self.to_find_options()).await
    }

    /// Last record of the full result.
    pub async fn last(&self) -> OrmResult<Option<Record>> {
        Ok(self.to_array().await?.pop())
    }

    /// Number of matching records, after `offset` and `limit`.
    pub async fn count(&self) -> OrmResult<usize> {
        Ok(self.to_array().await?.len())
    }

    /// Delete the matching records; returns how many were deleted.
    pub async fn delete(&self) -> OrmResult<usize> {
        self.model.destroy(&self.to_find_options()).await
    }

    /// Apply `changes` to the matching records; returns how many changed.
    pub async fn modify(&self, changes: Fields) -> OrmResult<usize> {
        self.model.update(changes, &self.to_find_options()).await
    }
}

impl WhereClause {
    fn finish(self, op: Operator, value: Value) -> Query {
        self.query.push(self.field, op, value)
    }

    pub fn equals(self, value: impl Into<Value>) -> Query {
        self.finish(Operator::Eq, value.into())
    }

    pub fn not_equal(self, value: impl Into<Value>) -> Query {
        self.finish(Operator::Ne, value.into())
    }

    pub fn above(self, value: impl Into<Value>) -> Query {
        self.finish(Operator::Gt, value.into())
    }

    pub fn above_or_equal(self, value: impl Into<Value>) -> Query {
        self.finish(Operator::Gte, value.into())
    }

    pub fn below(self, value: impl Into<Value>) -> Query {
        self.finish(Operator::Lt, value.into())
    }

    pub fn below_or_equal(self, value: impl Into<Value>) -> Query {
        self.finish(Operator::Lte, value.into())
    }

    /// Inclusive range, compiled to `$gte` and `$lte`.
    pub fn between(self, low: impl Into<Value>, high: impl Into<Value>) -> Query {
        let field = self.field.clone();
        self.finish(Operator::Gte, low.into())
            .push(field, Operator::Lte, high.into())
    }

    pub fn any_of<V: Into<Value>>(self, values: impl IntoIterator<Item = V>) -> Query {
        let list = values.into_iter().map(Into::into).collect::<Vec<Value>>();
        self.finish(Operator::In, Value::Array(list))
    }

    pub fn none_of<V: Into<Value>>(self, values: impl IntoIterator<Item = V>) -> Query {
        let list = values.into_iter().map(Into::into).collect::<Vec<Value>>();
        self.finish(Operator::Nin, Value::Array(list))
    }
}
