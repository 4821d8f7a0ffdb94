//! Projection and registered functions.
//!
//! Selection expressions are plain paths (`age`, `users.name`, `*`,
//! `orders.*`) or function calls with optional aliasing
//! (`COUNT(*) AS total`). Aggregates collapse the row set — per group-by
//! bucket when buckets exist, once over everything otherwise. Scalars
//! produce one value per output row. Output rows carry only the projected
//! keys.

use crate::error::SiltError;
use crate::functions::{FnImpl, FunctionRegistry};
use crate::row::{self, Row};

/// One parsed selection expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjExpr {
    Column { path: String, alias: String },
    Call { name: String, args: Vec<String>, alias: String },
}

impl ProjExpr {
    fn alias(&self) -> &str {
        match self {
            ProjExpr::Column { alias, .. } => alias,
            ProjExpr::Call { alias, .. } => alias,
        }
    }
}

/// Parse `expr [AS alias]`, where `expr` is a path or `NAME(args)`.
pub fn parse(exprs: &[String]) -> Vec<ProjExpr> {
    exprs.iter().map(|e| parse_one(e)).collect()
}

fn parse_one(expr: &str) -> ProjExpr {
    let (body, alias) = match split_alias(expr) {
        Some((body, alias)) => (body.trim(), Some(alias.trim().to_string())),
        None => (expr.trim(), None),
    };

    if let Some(open) = body.find('(')
        && body.ends_with(')')
        && open > 0
        && body[..open].chars().all(|c| c.is_alphanumeric() || c == '_')
    {
        let name = body[..open].to_string();
        let inner = &body[open + 1..body.len() - 1];
        let args: Vec<String> = inner
            .split(',')
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .collect();
        let alias = alias.unwrap_or_else(|| body.to_string());
        return ProjExpr::Call { name, args, alias };
    }

    let alias = alias.unwrap_or_else(|| body.to_string());
    ProjExpr::Column {
        path: body.to_string(),
        alias,
    }
}

fn split_alias(expr: &str) -> Option<(&str, &str)> {
    for marker in [" AS ", " as "] {
        if let Some(pos) = expr.rfind(marker) {
            return Some((&expr[..pos], &expr[pos + marker.len()..]));
        }
    }
    None
}

/// Apply projection and functions.
///
/// `buckets` is the group-by bucket index when a group-by stage ran; with
/// aggregates present it yields one output row per bucket.
pub fn apply(
    registry: &FunctionRegistry,
    exprs: &[String],
    rows: Vec<Row>,
    buckets: Option<&[Vec<usize>]>,
    joined: bool,
) -> Result<Vec<Row>, SiltError> {
    if exprs.is_empty() {
        return Ok(rows);
    }
    let parsed = parse(exprs);

    // Unknown functions are fatal before any work happens.
    let mut has_aggregate = false;
    for expr in &parsed {
        if let ProjExpr::Call { name, .. } = expr {
            has_aggregate |= matches!(registry.get(name)?, FnImpl::Aggregate(_));
        }
    }

    if has_aggregate {
        let groups: Vec<Vec<usize>> = match buckets {
            Some(b) => b.to_vec(),
            None => vec![(0..rows.len()).collect()],
        };
        let mut out = Vec::with_capacity(groups.len());
        for bucket in &groups {
            let bucket_rows: Vec<Row> = bucket.iter().map(|i| rows[*i].clone()).collect();
            let Some(head) = bucket_rows.first() else {
                continue;
            };
            let mut row = Row::new();
            for expr in &parsed {
                match expr {
                    ProjExpr::Column { path, alias } => {
                        project_into(&mut row, head, path, alias, joined);
                    }
                    ProjExpr::Call { name, args, alias } => {
                        let value = match registry.get(name)? {
                            FnImpl::Aggregate(f) => f(&bucket_rows, args, joined),
                            FnImpl::Scalar(f) => f(head, args, joined),
                        };
                        row.insert(alias.clone(), value);
                    }
                }
            }
            out.push(row);
        }
        return Ok(out);
    }

    // Scalar-only projection: one output row per input row.
    let mut out = Vec::with_capacity(rows.len());
    for r in &rows {
        let mut row = Row::new();
        for expr in &parsed {
            match expr {
                ProjExpr::Column { path, alias } => {
                    project_into(&mut row, r, path, alias, joined);
                }
                ProjExpr::Call { name, args, alias } => {
                    let value = match registry.get(name)? {
                        FnImpl::Scalar(f) => f(r, args, joined),
                        FnImpl::Aggregate(_) => unreachable!("aggregates handled above"),
                    };
                    row.insert(alias.clone(), value);
                }
            }
        }
        out.push(row);
    }
    Ok(out)
}

/// Copy one projected path into the output row. `*` copies everything,
/// `prefix.*` copies the keys of one joined table.
fn project_into(out: &mut Row, src: &Row, path: &str, alias: &str, joined: bool) {
    if path == "*" {
        for (k, v) in src {
            out.insert(k.clone(), v.clone());
        }
        return;
    }
    if let Some(prefix) = path.strip_suffix(".*") {
        let dotted = format!("{prefix}.");
        for (k, v) in src {
            if k.starts_with(&dotted) {
                out.insert(k.clone(), v.clone());
            }
        }
        return;
    }
    out.insert(alias.to_string(), row::path_value(src, path, joined));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn rows(vals: &[Value]) -> Vec<Row> {
        vals.iter()
            .map(|v| match v {
                Value::Object(m) => m.clone(),
                _ => panic!("not an object"),
            })
            .collect()
    }

    #[test]
    fn test_parse_forms() {
        assert_eq!(
            parse_one("age"),
            ProjExpr::Column {
                path: "age".into(),
                alias: "age".into()
            }
        );
        assert_eq!(
            parse_one("COUNT(*) AS total"),
            ProjExpr::Call {
                name: "COUNT".into(),
                args: vec!["*".into()],
                alias: "total".into()
            }
        );
        assert_eq!(
            parse_one("users.name AS who"),
            ProjExpr::Column {
                path: "users.name".into(),
                alias: "who".into()
            }
        );
    }

    #[test]
    fn test_aggregate_without_group_by_collapses_to_one_row() {
        let registry = FunctionRegistry::with_builtins();
        let input = rows(&[json!({"a": 1}), json!({"a": 2})]);
        let out = apply(
            &registry,
            &["COUNT(*) AS n".into(), "SUM(a) AS s".into()],
            input,
            None,
            false,
        )
        .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["n"], json!(2));
        assert_eq!(out[0]["s"], json!(3.0));
    }

    #[test]
    fn test_aggregate_per_bucket() {
        let registry = FunctionRegistry::with_builtins();
        let input = rows(&[
            json!({"city": "A", "n": 1}),
            json!({"city": "A", "n": 2}),
            json!({"city": "B", "n": 5}),
        ]);
        let buckets = vec![vec![0, 1], vec![2]];
        let out = apply(
            &registry,
            &["city".into(), "SUM(n) AS total".into()],
            input,
            Some(&buckets),
            false,
        )
        .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["city"], json!("A"));
        assert_eq!(out[0]["total"], json!(3.0));
        assert_eq!(out[1]["total"], json!(5.0));
    }

    #[test]
    fn test_scalar_projection_per_row() {
        let registry = FunctionRegistry::with_builtins();
        let input = rows(&[json!({"name": "Ada"}), json!({"name": "Grace"})]);
        let out = apply(
            &registry,
            &["UPPER(name) AS loud".into()],
            input,
            None,
            false,
        )
        .unwrap();
        assert_eq!(out[0]["loud"], json!("ADA"));
        assert_eq!(out[1]["loud"], json!("GRACE"));
    }

    #[test]
    fn test_unknown_function_is_fatal() {
        let registry = FunctionRegistry::with_builtins();
        let input = rows(&[json!({"a": 1})]);
        let err = apply(&registry, &["NOPE(a)".into()], input, None, false).unwrap_err();
        assert!(matches!(err, SiltError::UnknownFunction(_)));
    }

    #[test]
    fn test_star_and_prefixed_star() {
        let registry = FunctionRegistry::with_builtins();
        let input = rows(&[json!({"users.id": 1, "orders.id": 9})]);
        let out = apply(&registry, &["users.*".into()], input, None, true).unwrap();
        assert_eq!(out[0].len(), 1);
        assert!(out[0].contains_key("users.id"));
    }
}
