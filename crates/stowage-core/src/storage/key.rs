//! Primary keys

use std::cmp::Ordering;
use std::fmt;

use chrono::{TimeZone, Utc};

use crate::value::Value;

/// A valid object-store key.
///
/// Keys order as IndexedDB orders them: every number sorts before every
/// date, and every date before every string.
#[derive(Debug, Clone)]
pub enum Key {
    Number(f64),
    /// Milliseconds since the Unix epoch
    Date(i64),
    String(String),
}

impl Key {
    /// Extract a key from a field value.
    ///
    /// Returns `None` for values that cannot act as keys (null, booleans,
    /// NaN, arrays, objects).
    pub fn from_value(value: &Value) -> Option<Key> {
        match value {
            Value::Number(n) if !n.is_nan() => Some(Key::Number(*n)),
            Value::String(s) => Some(Key::String(s.clone())),
            Value::Date(d) => Some(Key::Date(d.timestamp_millis())),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Key::Number(n) => Value::Number(*n),
            Key::String(s) => Value::String(s.clone()),
            Key::Date(ms) => Utc
                .timestamp_millis_opt(*ms)
                .single()
                .map(Value::Date)
                .unwrap_or(Value::Number(*ms as f64)),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Key::Number(n) => Some(*n),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Key::Number(_) => 0,
            Key::Date(_) => 1,
            Key::String(_) => 2,
        }
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            // -0 and 0 are the same key
            (Key::Number(a), Key::Number(b)) if a == b => Ordering::Equal,
            (Key::Number(a), Key::Number(b)) => a.total_cmp(b),
            (Key::Date(a), Key::Date(b)) => a.cmp(b),
            (Key::String(a), Key::String(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Key {}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Number(n) => write!(f, "{}", n),
            Key::Date(ms) => write!(f, "date({})", ms),
            Key::String(s) => write!(f, "{:?}", s),
        }
    }
}

impl From<f64> for Key {
    fn from(n: f64) -> Self {
        Key::Number(n)
    }
}

impl From<i64> for Key {
    fn from(n: i64) -> Self {
        Key::Number(n as f64)
    }
}

impl From<i32> for Key {
    fn from(n: i32) -> Self {
        Key::Number(n as f64)
    }
}

impl From<u32> for Key {
    fn from(n: u32) -> Self {
        Key::Number(n as f64)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::String(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::String(s)
    }
}

impl From<&Key> for Key {
    fn from(key: &Key) -> Self {
        key.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cross_type_order() {
        let mut keys = vec![
            Key::from("a"),
            Key::Date(0),
            Key::from(10),
            Key::from(-1),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![Key::from(-1), Key::from(10), Key::Date(0), Key::from("a")]
        );
    }

    #[test]
    fn test_signed_zero_is_one_key() {
        assert_eq!(Key::from(-0.0), Key::from(0.0));
        assert_eq!(Key::from(-0.0).cmp(&Key::from(1)), Ordering::Less);
        assert_eq!(Key::from(-0.0).cmp(&Key::from(-1)), Ordering::Greater);
    }

    #[test]
    fn test_from_value_rejects_non_keys() {
        assert_eq!(Key::from_value(&Value::Null), None);
        assert_eq!(Key::from_value(&Value::Bool(true)), None);
        assert_eq!(Key::from_value(&Value::Number(f64::NAN)), None);
        assert_eq!(Key::from_value(&Value::from(3)), Some(Key::from(3)));
    }
}
