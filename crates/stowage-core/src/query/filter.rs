//! Where-clause DSL

use std::fmt;

use crate::error::{OrmError, OrmResult};
use crate::value::{Fields, Value};

use super::matcher;

/// Comparison operator of a where condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Nin,
}

impl Operator {
    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Eq => "$eq",
            Operator::Ne => "$ne",
            Operator::Gt => "$gt",
            Operator::Gte => "$gte",
            Operator::Lt => "$lt",
            Operator::Lte => "$lte",
            Operator::In => "$in",
            Operator::Nin => "$nin",
        }
    }

    pub fn parse(s: &str) -> Option<Operator> {
        match s {
            "$eq" => Some(Operator::Eq),
            "$ne" => Some(Operator::Ne),
            "$gt" => Some(Operator::Gt),
            "$gte" => Some(Operator::Gte),
            "$lt" => Some(Operator::Lt),
            "$lte" => Some(Operator::Lte),
            "$in" => Some(Operator::In),
            "$nin" => Some(Operator::Nin),
            _ => None,
        }
    }

    /// `$in` and `$nin` take an array operand.
    pub fn takes_list(self) -> bool {
        matches!(self, Operator::In | Operator::Nin)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Condition on a single field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldCondition {
    /// Strict equality with the value
    Literal(Value),
    /// Every operator must hold
    Ops(Vec<(Operator, Value)>),
}

/// A where clause: field conditions ANDed together, optionally ANDed with
/// an `$or` over groups.
///
/// ```rust
/// use stowage_core::query::Where;
/// use stowage_core::fields;
///
/// let adults_named_bob = Where::new().eq("name", "Bob").gte("age", 18);
/// assert!(adults_named_bob.matches(&fields! { "name" => "Bob", "age" => 40 }));
/// assert!(!adults_named_bob.matches(&fields! { "name" => "Bob", "age" => "40" }));
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Where {
    fields: Vec<(String, FieldCondition)>,
    any: Option<Vec<Where>>,
}

impl Where {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the condition of `field`, replacing any previous one.
    pub fn field(mut self, field: impl Into<String>, condition: FieldCondition) -> Self {
        let field = field.into();
        match self.fields.iter_mut().find(|(f, _)| *f == field) {
            Some((_, existing)) => *existing = condition,
            None => self.fields.push((field, condition)),
        }
        self
    }

    /// Literal equality.
    pub fn eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.field(field, FieldCondition::Literal(value.into()))
    }

    /// Add an operator to `field`. Operators on one field are ANDed; a
    /// literal condition on the field becomes `$eq`.
    pub fn op(mut self, field: impl Into<String>, op: Operator, value: impl Into<Value>) -> Self {
        let field = field.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(f, _)| *f == field) {
            Some((_, FieldCondition::Ops(ops))) => ops.push((op, value)),
            Some((_, condition)) => {
                let previous = std::mem::replace(condition, FieldCondition::Ops(Vec::new()));
                if let (FieldCondition::Literal(literal), FieldCondition::Ops(ops)) =
                    (previous, condition)
                {
                    ops.push((Operator::Eq, literal));
                    ops.push((op, value));
                }
            }
            None => self
                .fields
                .push((field, FieldCondition::Ops(vec![(op, value)]))),
        }
        self
    }

    pub fn ne(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.op(field, Operator::Ne, value)
    }

    pub fn gt(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.op(field, Operator::Gt, value)
    }

    pub fn gte(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.op(field, Operator::Gte, value)
    }

    pub fn lt(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.op(field, Operator::Lt, value)
    }

    pub fn lte(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.op(field, Operator::Lte, value)
    }

    pub fn is_in<V: Into<Value>>(
        self,
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        let list: Vec<Value> = values.into_iter().map(Into::into).collect();
        self.op(field, Operator::In, Value::Array(list))
    }

    pub fn not_in<V: Into<Value>>(
        self,
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        let list: Vec<Value> = values.into_iter().map(Into::into).collect();
        self.op(field, Operator::Nin, Value::Array(list))
    }

    /// Require at least one of `groups` to match. Calling `or` again adds
    /// more groups to the same disjunction.
    pub fn or(mut self, groups: impl IntoIterator<Item = Where>) -> Self {
        self.any.get_or_insert_with(Vec::new).extend(groups);
        self
    }

    pub fn conditions(&self) -> &[(String, FieldCondition)] {
        &self.fields
    }

    pub fn condition(&self, field: &str) -> Option<&FieldCondition> {
        self.fields.iter().find(|(f, _)| f == field).map(|(_, c)| c)
    }

    /// The `$or` groups; `Some(&[])` matches nothing.
    pub fn any(&self) -> Option<&[Where]> {
        self.any.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.any.is_none()
    }

    pub fn matches(&self, row: &Fields) -> bool {
        matcher::matches(row, self)
    }

    /// Parse the JSON form of a where clause.
    ///
    /// Each key is a field name mapped to a literal or to an object of
    /// `$`-operators; the top-level key `$or` holds an array of clauses. An
    /// object without `$` keys is a literal (nested object equality).
    pub fn from_json(json: &serde_json::Value) -> OrmResult<Self> {
        let map = json.as_object().ok_or_else(|| {
            OrmError::Query(format!("where clause must be an object, got {}", json))
        })?;

        let mut clause = Where::new();
        for (key, condition) in map {
            if key == "$or" {
                let groups = condition
                    .as_array()
                    .ok_or_else(|| OrmError::Query("$or expects an array".to_string()))?;
                let parsed = groups
                    .iter()
                    .map(Where::from_json)
                    .collect::<OrmResult<Vec<_>>>()?;
                clause = clause.or(parsed);
                continue;
            }
            if key.starts_with('$') {
                return Err(OrmError::Query(format!("unknown top-level operator '{}'", key)));
            }
            clause = clause.field(key.clone(), parse_condition(key, condition)?);
        }
        Ok(clause)
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for (field, condition) in &self.fields {
            let json = match condition {
                FieldCondition::Literal(value) => value.to_json(),
                FieldCondition::Ops(ops) => {
                    let mut ops_map = serde_json::Map::new();
                    for (op, value) in ops {
                        ops_map.insert(op.as_str().to_string(), value.to_json());
                    }
                    serde_json::Value::Object(ops_map)
                }
            };
            map.insert(field.clone(), json);
        }
        if let Some(groups) = &self.any {
            map.insert(
                "$or".to_string(),
                serde_json::Value::Array(groups.iter().map(Where::to_json).collect()),
            );
        }
        serde_json::Value::Object(map)
    }
}

impl fmt::Display for Where {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

fn parse_condition(field: &str, json: &serde_json::Value) -> OrmResult<FieldCondition> {
    let Some(map) = json.as_object() else {
        return Ok(FieldCondition::Literal(Value::from(json.clone())));
    };

    let operator_keys = map.keys().filter(|k| k.starts_with('$')).count();
    if operator_keys == 0 {
        return Ok(FieldCondition::Literal(Value::from(json.clone())));
    }
    if operator_keys != map.len() {
        return Err(OrmError::Query(format!(
            "condition on '{}' mixes operators and plain keys",
            field
        )));
    }

    let mut ops = Vec::with_capacity(map.len());
    for (key, operand) in map {
        let op = Operator::parse(key).ok_or_else(|| {
            OrmError::Query(format!("unknown operator '{}' on '{}'", key, field))
        })?;
        if op.takes_list() && !operand.is_array() {
            return Err(OrmError::Query(format!(
                "{} on '{}' expects an array, got {}",
                op, field, operand
            )));
        }
        ops.push((op, Value::from(operand.clone())));
    }
    Ok(FieldCondition::Ops(ops))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_operators() {
        let clause = Where::from_json(&json!({
            "age": { "$gte": 18, "$lt": 65 },
            "name": "Alice",
        }))
        .unwrap();
        assert_eq!(
            clause.condition("age"),
            Some(&FieldCondition::Ops(vec![
                (Operator::Gte, Value::from(18)),
                (Operator::Lt, Value::from(65)),
            ]))
        );
        assert_eq!(
            clause.condition("name"),
            Some(&FieldCondition::Literal(Value::from("Alice")))
        );
    }

    #[test]
    fn test_from_json_rejects_unknown_operator() {
        let err = Where::from_json(&json!({ "age": { "$like": 1 } })).unwrap_err();
        assert!(matches!(err, OrmError::Query(_)));
    }

    #[test]
    fn test_from_json_rejects_scalar_in() {
        assert!(Where::from_json(&json!({ "age": { "$in": 3 } })).is_err());
        assert!(Where::from_json(&json!({ "age": { "$nin": "x" } })).is_err());
    }

    #[test]
    fn test_plain_object_is_literal() {
        let clause = Where::from_json(&json!({ "meta": { "a": 1 } })).unwrap();
        assert!(matches!(
            clause.condition("meta"),
            Some(FieldCondition::Literal(Value::Object(_)))
        ));
    }

    #[test]
    fn test_op_after_literal_keeps_equality() {
        let clause = Where::new().eq("age", 30).lte("age", 40);
        assert_eq!(
            clause.condition("age"),
            Some(&FieldCondition::Ops(vec![
                (Operator::Eq, Value::from(30)),
                (Operator::Lte, Value::from(40)),
            ]))
        );
    }

    #[test]
    fn test_json_form_is_stable() {
        let clause = Where::new()
            .gt("age", 1)
            .or([Where::new().eq("name", "a")]);
        assert_eq!(
            clause.to_json(),
            json!({ "age": { "$gt": 1 }, "$or": [{ "name": "a" }] })
        );
    }
}
