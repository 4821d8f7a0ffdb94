//! Row values, primary keys, and dotted-path resolution.
//!
//! Rows are semi-structured: a JSON object per row, with a tagged-variant
//! value type (`serde_json::Value`) at the edges. Strongly-typed code in the
//! planner and indexer works against [`Key`] and the comparison helpers here.
//!
//! Dotted paths (`a.b.c`, optionally ending in `.length`) are resolved in one
//! place and shared by the predicate evaluator, order-by, group-by, and
//! function arguments.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A row: one JSON object. Adapters may hand out clones; stages that mutate
/// always own their copy first.
pub type Row = serde_json::Map<String, Value>;

/// The kind of primary key a table uses. Numeric-pk tables support range
/// arithmetic; string-pk tables only support ordered scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyKind {
    Int,
    Str,
}

/// A primary key or index key. Ordered so range scans are well-defined:
/// integer keys sort numerically and before all string keys.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Key {
    Int(i64),
    Str(String),
}

impl Key {
    /// Convert a row value into a key. Numbers become integer keys,
    /// strings become string keys; anything else is not a valid key.
    pub fn from_value(value: &Value) -> Option<Key> {
        match value {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .map(Key::Int),
            Value::String(s) => Some(Key::Str(s.clone())),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Key::Int(i) => Value::from(*i),
            Key::Str(s) => Value::String(s.clone()),
        }
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Key::Int(i) => write!(f, "{i}"),
            Key::Str(s) => write!(f, "{s}"),
        }
    }
}

/// Resolve a dotted path against a row.
///
/// Returns `Value::Null` for missing paths. A trailing `.length` segment
/// yields the length of the array or string it follows.
///
/// With `ignore_first` set (joined rows), the row is keyed by literal
/// `"table.column"` strings, so the whole path is tried as a direct key
/// before segment-wise descent.
pub fn path_value(row: &Row, dotted: &str, ignore_first: bool) -> Value {
    // Direct key wins: joined rows and rows with literal dotted keys.
    if let Some(v) = row.get(dotted) {
        return v.clone();
    }
    if ignore_first {
        // "table.column.rest" — drop the table segment and retry the direct
        // key, then fall through to segment-wise descent.
        if let Some((_, rest)) = dotted.split_once('.') {
            if let Some(v) = row.get(rest) {
                return v.clone();
            }
        }
    }

    let mut segments: Vec<&str> = dotted.split('.').collect();
    let wants_length = segments.last() == Some(&"length");
    if wants_length {
        segments.pop();
    }

    let mut current: Option<&Value> = None;
    for (i, seg) in segments.iter().enumerate() {
        let next = match current {
            None => {
                if i > 0 {
                    break;
                }
                row.get(*seg)
            }
            Some(Value::Object(map)) => map.get(*seg),
            Some(Value::Array(items)) => seg.parse::<usize>().ok().and_then(|n| items.get(n)),
            _ => None,
        };
        match next {
            Some(v) => current = Some(v),
            None => return Value::Null,
        }
    }

    match (wants_length, current) {
        (true, Some(Value::Array(items))) => Value::from(items.len()),
        (true, Some(Value::String(s))) => Value::from(s.len()),
        (true, _) => Value::Null,
        (false, Some(v)) => v.clone(),
        (false, None) => Value::Null,
    }
}

/// Shallow-merge `patch` into `base`: top-level keys overwrite.
pub fn merge_shallow(base: &mut Row, patch: &Row) {
    for (k, v) in patch {
        base.insert(k.clone(), v.clone());
    }
}

/// Deep equality with numeric coercion: `1` equals `1.0`.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            x.as_f64().unwrap_or(f64::NAN) == y.as_f64().unwrap_or(f64::NAN)
        }
        (Value::Array(x), Value::Array(y)) => arrays_equal(x, y),
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).is_some_and(|w| values_equal(v, w)))
        }
        _ => a == b,
    }
}

/// True element-wise array equality.
pub fn arrays_equal(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| values_equal(x, y))
}

/// Total order over row values for sorting and range predicates.
///
/// Nulls sort first; numbers compare as f64; mixed types compare by a fixed
/// type rank so the sort is total.
pub fn cmp_values(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .unwrap_or(f64::NAN)
            .partial_cmp(&y.as_f64().unwrap_or(f64::NAN))
            .unwrap_or(Ordering::Equal),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (xv, yv) in x.iter().zip(y.iter()) {
                let ord = cmp_values(xv, yv);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => rank(a).cmp(&rank(b)),
    }
}

/// Numeric coercion for aggregates and range math. Numeric strings parse.
pub fn coerce_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Text form of a value for tokenizing and substring matching.
pub fn value_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(v: Value) -> Row {
        match v {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_path_nested_and_length() {
        let r = row(json!({"a": {"b": {"c": 7}}, "tags": ["x", "y"], "name": "ada"}));
        assert_eq!(path_value(&r, "a.b.c", false), json!(7));
        assert_eq!(path_value(&r, "tags.length", false), json!(2));
        assert_eq!(path_value(&r, "name.length", false), json!(3));
        assert_eq!(path_value(&r, "tags.1", false), json!("y"));
        assert_eq!(path_value(&r, "missing.deep", false), Value::Null);
    }

    #[test]
    fn test_path_direct_dotted_key_on_joined_rows() {
        let r = row(json!({"users.name": "ada", "orders.id": 1}));
        assert_eq!(path_value(&r, "users.name", true), json!("ada"));
        assert_eq!(path_value(&r, "users.name", false), json!("ada"));
    }

    #[test]
    fn test_key_ordering() {
        assert!(Key::Int(2) < Key::Int(10));
        assert!(Key::Int(10) < Key::Str("1".into()));
        assert!(Key::Str("a".into()) < Key::Str("b".into()));
    }

    #[test]
    fn test_values_equal_numeric_coercion() {
        assert!(values_equal(&json!(1), &json!(1.0)));
        assert!(!values_equal(&json!(1), &json!(2)));
    }

    #[test]
    fn test_arrays_equal_is_equality() {
        assert!(arrays_equal(
            &[json!(1), json!("a")],
            &[json!(1.0), json!("a")]
        ));
        assert!(!arrays_equal(&[json!(1)], &[json!(2)]));
        assert!(!arrays_equal(&[json!(1)], &[json!(1), json!(2)]));
    }

    #[test]
    fn test_cmp_values_total_order() {
        assert_eq!(cmp_values(&json!(1), &json!(2)), Ordering::Less);
        assert_eq!(cmp_values(&json!("a"), &json!("b")), Ordering::Less);
        assert_eq!(cmp_values(&Value::Null, &json!(0)), Ordering::Less);
        assert_eq!(cmp_values(&json!(2), &json!("a")), Ordering::Less);
    }

    #[test]
    fn test_merge_shallow_overwrites_top_level() {
        let mut base = row(json!({"a": 1, "b": {"x": 1}}));
        let patch = row(json!({"b": {"y": 2}, "c": 3}));
        merge_shallow(&mut base, &patch);
        assert_eq!(Value::Object(base), json!({"a": 1, "b": {"y": 2}, "c": 3}));
    }
}
