//! Predicate evaluation, ordering and pagination over scanned rows

use std::cmp::Ordering;

use crate::value::{sort_cmp, Fields, Value};

use super::filter::{FieldCondition, Operator, Where};
use super::Direction;

/// Evaluate `clause` against one row.
///
/// Values of different types never compare equal or ordered. A missing field
/// satisfies only `$ne` and `$nin`.
pub fn matches(row: &Fields, clause: &Where) -> bool {
    if let Some(groups) = clause.any() {
        if !groups.iter().any(|group| matches(row, group)) {
            return false;
        }
    }
    clause
        .conditions()
        .iter()
        .all(|(field, condition)| matches_field(row.get(field), condition))
}

fn matches_field(value: Option<&Value>, condition: &FieldCondition) -> bool {
    match condition {
        FieldCondition::Literal(expected) => value == Some(expected),
        FieldCondition::Ops(ops) => ops.iter().all(|(op, operand)| apply(*op, value, operand)),
    }
}

fn apply(op: Operator, value: Option<&Value>, operand: &Value) -> bool {
    let ordering = || value.and_then(|v| v.compare_strict(operand));
    match op {
        Operator::Eq => value == Some(operand),
        Operator::Ne => value != Some(operand),
        Operator::Gt => ordering() == Some(Ordering::Greater),
        Operator::Gte => matches!(ordering(), Some(Ordering::Greater | Ordering::Equal)),
        Operator::Lt => ordering() == Some(Ordering::Less),
        Operator::Lte => matches!(ordering(), Some(Ordering::Less | Ordering::Equal)),
        Operator::In => contains(operand, value),
        Operator::Nin => !contains(operand, value),
    }
}

fn contains(list: &Value, value: Option<&Value>) -> bool {
    match (list.as_array(), value) {
        (Some(items), Some(value)) => items.contains(value),
        _ => false,
    }
}

/// Stable multi-key sort. Later keys break ties of earlier ones.
pub fn sort_rows(rows: &mut [Fields], order: &[(String, Direction)]) {
    if order.is_empty() {
        return;
    }
    rows.sort_by(|a, b| {
        for (field, direction) in order {
            let ordering = sort_cmp(a.get(field), b.get(field));
            let ordering = match direction {
                Direction::Asc => ordering,
                Direction::Desc => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

/// Apply `offset` then `limit`.
pub fn paginate<T>(rows: Vec<T>, offset: Option<usize>, limit: Option<usize>) -> Vec<T> {
    rows.into_iter()
        .skip(offset.unwrap_or(0))
        .take(limit.unwrap_or(usize::MAX))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields;

    #[test]
    fn test_missing_field_semantics() {
        let row = fields! { "name" => "a" };
        assert!(Where::new().ne("age", 3).matches(&row));
        assert!(Where::new().not_in("age", [1, 2]).matches(&row));
        assert!(!Where::new().gt("age", 0).matches(&row));
        assert!(!Where::new().is_in("age", [1, 2]).matches(&row));
        assert!(!Where::new().eq("age", Value::Null).matches(&row));
    }

    #[test]
    fn test_no_type_coercion() {
        let row = fields! { "age" => 30 };
        assert!(!Where::new().eq("age", "30").matches(&row));
        assert!(!Where::new().gte("age", "10").matches(&row));
        assert!(Where::new().ne("age", "30").matches(&row));
    }

    #[test]
    fn test_or_groups() {
        let row = fields! { "role" => "admin", "active" => true };
        let admins_or_owners = Where::new()
            .eq("active", true)
            .or([Where::new().eq("role", "owner"), Where::new().eq("role", "admin")]);
        assert!(admins_or_owners.matches(&row));

        let nested = Where::new().or([Where::new().or([Where::new().eq("role", "admin")])]);
        assert!(nested.matches(&row));

        // extra fields are ANDed with the disjunction
        let inactive = Where::new()
            .eq("active", false)
            .or([Where::new().eq("role", "admin")]);
        assert!(!inactive.matches(&row));
    }

    #[test]
    fn test_empty_or_matches_nothing() {
        let clause = Where::new().or(Vec::new());
        assert!(!clause.matches(&fields! { "a" => 1 }));
        assert!(Where::new().matches(&fields! { "a" => 1 }));
    }

    #[test]
    fn test_sort_is_stable_across_keys() {
        let mut rows = vec![
            fields! { "n" => "b", "age" => 2 },
            fields! { "n" => "a", "age" => 1 },
            fields! { "n" => "c", "age" => 2 },
            fields! { "n" => "d" },
        ];
        sort_rows(&mut rows, &[("age".to_string(), Direction::Desc)]);
        let names: Vec<&str> = rows.iter().filter_map(|r| r["n"].as_str()).collect();
        assert_eq!(names, ["b", "c", "a", "d"]);
    }

    #[test]
    fn test_paginate_order() {
        assert_eq!(paginate(vec![1, 2, 3, 4, 5], Some(1), Some(2)), vec![2, 3]);
        assert_eq!(paginate(vec![1, 2], Some(5), None), Vec::<i32>::new());
        assert_eq!(paginate(vec![1, 2], None, Some(0)), Vec::<i32>::new());
    }
}
