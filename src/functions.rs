//! Registered aggregate and scalar functions.
//!
//! Selection expressions may call registered functions: aggregates collapse
//! a row set (or one group-by bucket) into a single value, scalars produce
//! one value per row. Unknown names are a user error at dispatch time.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::SiltError;
use crate::row::{self, Row};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FnKind {
    Aggregate,
    Scalar,
}

/// `(rows, args, joined)` — `joined` switches path resolution to literal
/// `"table.column"` keys.
pub type AggregateFn = fn(&[Row], &[String], bool) -> Value;

/// `(row, args, joined)`.
pub type ScalarFn = fn(&Row, &[String], bool) -> Value;

pub enum FnImpl {
    Aggregate(AggregateFn),
    Scalar(ScalarFn),
}

impl FnImpl {
    pub fn kind(&self) -> FnKind {
        match self {
            FnImpl::Aggregate(_) => FnKind::Aggregate,
            FnImpl::Scalar(_) => FnKind::Scalar,
        }
    }
}

/// Name → implementation map, case-insensitive on lookup.
pub struct FunctionRegistry {
    fns: HashMap<String, FnImpl>,
}

impl FunctionRegistry {
    /// Registry pre-loaded with the built-ins.
    pub fn with_builtins() -> Self {
        let mut reg = FunctionRegistry {
            fns: HashMap::new(),
        };
        reg.register("COUNT", FnImpl::Aggregate(agg_count));
        reg.register("SUM", FnImpl::Aggregate(agg_sum));
        reg.register("AVG", FnImpl::Aggregate(agg_avg));
        reg.register("MIN", FnImpl::Aggregate(agg_min));
        reg.register("MAX", FnImpl::Aggregate(agg_max));
        reg.register("LOWER", FnImpl::Scalar(scalar_lower));
        reg.register("UPPER", FnImpl::Scalar(scalar_upper));
        reg.register("TRIM", FnImpl::Scalar(scalar_trim));
        reg.register("ROUND", FnImpl::Scalar(scalar_round));
        reg.register("LEN", FnImpl::Scalar(scalar_len));
        reg
    }

    pub fn register(&mut self, name: &str, f: FnImpl) {
        self.fns.insert(name.to_uppercase(), f);
    }

    pub fn get(&self, name: &str) -> Result<&FnImpl, SiltError> {
        self.fns
            .get(&name.to_uppercase())
            .ok_or_else(|| SiltError::UnknownFunction(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fns.contains_key(&name.to_uppercase())
    }
}

fn first_arg<'a>(args: &'a [String]) -> &'a str {
    args.first().map(String::as_str).unwrap_or("")
}

fn numeric_values(rows: &[Row], path: &str, joined: bool) -> Vec<f64> {
    rows.iter()
        .filter_map(|r| row::coerce_f64(&row::path_value(r, path, joined)))
        .collect()
}

// ── Aggregates ───────────────────────────────────────────────────────────

fn agg_count(rows: &[Row], args: &[String], joined: bool) -> Value {
    let arg = first_arg(args);
    if arg == "*" || arg.is_empty() {
        return Value::from(rows.len());
    }
    let n = rows
        .iter()
        .filter(|r| !row::path_value(r, arg, joined).is_null())
        .count();
    Value::from(n)
}

fn agg_sum(rows: &[Row], args: &[String], joined: bool) -> Value {
    let nums = numeric_values(rows, first_arg(args), joined);
    Value::from(nums.iter().sum::<f64>())
}

fn agg_avg(rows: &[Row], args: &[String], joined: bool) -> Value {
    let nums = numeric_values(rows, first_arg(args), joined);
    if nums.is_empty() {
        return Value::Null;
    }
    Value::from(nums.iter().sum::<f64>() / nums.len() as f64)
}

fn agg_min(rows: &[Row], args: &[String], joined: bool) -> Value {
    numeric_values(rows, first_arg(args), joined)
        .into_iter()
        .fold(None::<f64>, |acc, v| Some(acc.map_or(v, |a| a.min(v))))
        .map_or(Value::Null, Value::from)
}

fn agg_max(rows: &[Row], args: &[String], joined: bool) -> Value {
    numeric_values(rows, first_arg(args), joined)
        .into_iter()
        .fold(None::<f64>, |acc, v| Some(acc.map_or(v, |a| a.max(v))))
        .map_or(Value::Null, Value::from)
}

// ── Scalars ──────────────────────────────────────────────────────────────

fn scalar_lower(r: &Row, args: &[String], joined: bool) -> Value {
    Value::from(row::value_to_string(&row::path_value(r, first_arg(args), joined)).to_lowercase())
}

fn scalar_upper(r: &Row, args: &[String], joined: bool) -> Value {
    Value::from(row::value_to_string(&row::path_value(r, first_arg(args), joined)).to_uppercase())
}

fn scalar_trim(r: &Row, args: &[String], joined: bool) -> Value {
    Value::from(
        row::value_to_string(&row::path_value(r, first_arg(args), joined))
            .trim()
            .to_string(),
    )
}

fn scalar_round(r: &Row, args: &[String], joined: bool) -> Value {
    match row::coerce_f64(&row::path_value(r, first_arg(args), joined)) {
        Some(v) => Value::from(v.round()),
        None => Value::Null,
    }
}

fn scalar_len(r: &Row, args: &[String], joined: bool) -> Value {
    match row::path_value(r, first_arg(args), joined) {
        Value::Array(items) => Value::from(items.len()),
        Value::String(s) => Value::from(s.len()),
        Value::Object(map) => Value::from(map.len()),
        _ => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows() -> Vec<Row> {
        [json!({"a": 1, "s": " Hi "}), json!({"a": 2}), json!({"a": null})]
            .into_iter()
            .map(|v| match v {
                Value::Object(m) => m,
                _ => unreachable!(),
            })
            .collect()
    }

    #[test]
    fn test_count_star_vs_column() {
        let rows = rows();
        assert_eq!(agg_count(&rows, &["*".into()], false), json!(3));
        assert_eq!(agg_count(&rows, &["a".into()], false), json!(2));
    }

    #[test]
    fn test_numeric_aggregates() {
        let rows = rows();
        assert_eq!(agg_sum(&rows, &["a".into()], false), json!(3.0));
        assert_eq!(agg_avg(&rows, &["a".into()], false), json!(1.5));
        assert_eq!(agg_min(&rows, &["a".into()], false), json!(1.0));
        assert_eq!(agg_max(&rows, &["a".into()], false), json!(2.0));
        assert_eq!(agg_min(&[], &["a".into()], false), Value::Null);
    }

    #[test]
    fn test_scalars() {
        let rows = rows();
        assert_eq!(scalar_trim(&rows[0], &["s".into()], false), json!("Hi"));
        assert_eq!(scalar_upper(&rows[0], &["s".into()], false), json!(" HI "));
        assert_eq!(scalar_len(&rows[0], &["s".into()], false), json!(4));
    }

    #[test]
    fn test_unknown_function_is_user_error() {
        let reg = FunctionRegistry::with_builtins();
        assert!(reg.get("count").is_ok());
        assert!(matches!(
            reg.get("EXPLODE"),
            Err(SiltError::UnknownFunction(_))
        ));
    }
}
