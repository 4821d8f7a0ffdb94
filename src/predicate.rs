//! WHERE/HAVING tree evaluation.
//!
//! A tree is one leaf `(path, cmp, value)` or a flat list of leaves joined
//! by connectives. AND-only lists short-circuit on the first false leaf; a
//! list containing any OR is evaluated in full and combined left-to-right
//! per position, so `a AND b OR c` is `(a AND b) OR c`.
//!
//! `search(...)` leaves do not inspect the row's text: the selector runs
//! the full-text lookup once per leaf and injects the resulting pk sets,
//! which the evaluator consults by membership.

use std::collections::{HashMap, HashSet};

use serde_json::Value;

use crate::error::SiltError;
use crate::query::{Cmp, Connective, WhereClause, WhereLeaf};
use crate::row::{self, Key, Row};

/// Pre-computed pk sets for `search(...)` leaves, keyed by
/// [`WhereLeaf::cache_key`].
pub type SearchSets = HashMap<String, HashSet<Key>>;

/// Evaluation context for one query.
pub struct EvalCtx<'a> {
    /// Joined rows are keyed by literal `"table.column"` strings.
    pub ignore_first_path: bool,
    /// The pk column, for search-leaf membership checks.
    pub pk_column: &'a str,
    pub search_sets: Option<&'a SearchSets>,
}

impl<'a> EvalCtx<'a> {
    pub fn plain(pk_column: &'a str) -> Self {
        EvalCtx {
            ignore_first_path: false,
            pk_column,
            search_sets: None,
        }
    }
}

/// Evaluate a WHERE/HAVING tree against one row.
pub fn matches(
    ctx: &EvalCtx<'_>,
    clause: &WhereClause,
    row: &Row,
    idx: usize,
) -> Result<bool, SiltError> {
    match clause {
        WhereClause::Func(f) => Ok(f(row, idx)),
        WhereClause::Leaf(leaf) => leaf_matches(ctx, leaf, row),
        WhereClause::List { first, rest } => {
            if rest.iter().all(|(conn, _)| *conn == Connective::And) {
                if !leaf_matches(ctx, first, row)? {
                    return Ok(false);
                }
                for (_, leaf) in rest {
                    if !leaf_matches(ctx, leaf, row)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            } else {
                let mut acc = leaf_matches(ctx, first, row)?;
                for (conn, leaf) in rest {
                    let v = leaf_matches(ctx, leaf, row)?;
                    acc = match conn {
                        Connective::And => acc && v,
                        Connective::Or => acc || v,
                    };
                }
                Ok(acc)
            }
        }
    }
}

fn leaf_matches(ctx: &EvalCtx<'_>, leaf: &WhereLeaf, row: &Row) -> Result<bool, SiltError> {
    if leaf.search_columns().is_some() {
        let sets = ctx.search_sets.ok_or_else(|| {
            SiltError::InternalError("search leaf evaluated without a pre-computed pk set".into())
        })?;
        let pk = Key::from_value(&row::path_value(row, ctx.pk_column, ctx.ignore_first_path));
        return Ok(match (sets.get(&leaf.cache_key()), pk) {
            (Some(set), Some(pk)) => set.contains(&pk),
            _ => false,
        });
    }
    let left = row::path_value(row, &leaf.path, ctx.ignore_first_path);
    compare(leaf.cmp, &left, &leaf.value)
}

/// Apply one comparison operator. Type mismatches (e.g. `HAVE` on a
/// non-array) evaluate to false rather than erroring; only malformed
/// operands (an invalid regex, a non-pair BETWEEN) are errors.
pub fn compare(cmp: Cmp, left: &Value, right: &Value) -> Result<bool, SiltError> {
    // NULL sentinels ride on `=` and `LIKE`.
    if matches!(cmp, Cmp::Eq | Cmp::Like)
        && let Value::String(s) = right
    {
        match s.as_str() {
            "NULL" => return Ok(left.is_null()),
            "NOT NULL" => return Ok(!left.is_null()),
            _ => {}
        }
    }

    Ok(match cmp {
        Cmp::Eq => row::values_equal(left, right),
        Cmp::Neq => !row::values_equal(left, right),
        Cmp::Lt => row::cmp_values(left, right).is_lt(),
        Cmp::Lte => row::cmp_values(left, right).is_le(),
        Cmp::Gt => row::cmp_values(left, right).is_gt(),
        Cmp::Gte => row::cmp_values(left, right).is_ge(),
        Cmp::In | Cmp::NotIn => {
            let hit = match right {
                Value::Array(items) => items.iter().any(|v| row::values_equal(left, v)),
                _ => false,
            };
            (cmp == Cmp::In) == hit
        }
        Cmp::Regex => {
            let pattern = match right {
                Value::String(s) => s.as_str(),
                _ => return Err(SiltError::InvalidArgument("REGEX needs a string pattern".into())),
            };
            let re = regex_lite::Regex::new(pattern)
                .map_err(|e| SiltError::InvalidArgument(format!("invalid regex: {e}")))?;
            re.is_match(&row::value_to_string(left))
        }
        Cmp::Like | Cmp::NotLike => {
            let hit = like_matches(&row::value_to_string(left), &row::value_to_string(right))?;
            (cmp == Cmp::Like) == hit
        }
        Cmp::Between => {
            let (lo, hi) = match right {
                Value::Array(items) if items.len() == 2 => (&items[0], &items[1]),
                _ => {
                    return Err(SiltError::InvalidArgument(
                        "BETWEEN needs a two-element bound pair".into(),
                    ));
                }
            };
            row::cmp_values(left, lo).is_ge() && row::cmp_values(left, hi).is_le()
        }
        Cmp::Have | Cmp::NotHave => {
            let hit = match left {
                Value::Array(items) => items.iter().any(|v| row::values_equal(v, right)),
                _ => false,
            };
            (cmp == Cmp::Have) == hit
        }
        Cmp::Intersect | Cmp::NotIntersect => {
            let hit = match (left, right) {
                (Value::Array(a), Value::Array(b)) => {
                    a.iter().any(|x| b.iter().any(|y| row::values_equal(x, y)))
                }
                _ => false,
            };
            (cmp == Cmp::Intersect) == hit
        }
    })
}

/// Case-insensitive substring match; `%` acts as a wildcard and anchors
/// the pattern to the full value.
fn like_matches(subject: &str, pattern: &str) -> Result<bool, SiltError> {
    let subject = subject.to_lowercase();
    let pattern = pattern.to_lowercase();
    if !pattern.contains('%') {
        return Ok(subject.contains(&pattern));
    }
    // split() yields empty leading/trailing parts for anchored wildcards,
    // which naturally become leading/trailing `.*`.
    let mut regex = String::from("^");
    for part in pattern.split('%') {
        regex.push_str(&escape_regex(part));
        regex.push_str(".*");
    }
    // One trailing `.*` too many unless the pattern ends with `%`.
    if !pattern.ends_with('%') {
        regex.truncate(regex.len() - 2);
    }
    regex.push('$');
    let re = regex_lite::Regex::new(&regex)
        .map_err(|e| SiltError::InvalidArgument(format!("invalid LIKE pattern: {e}")))?;
    Ok(re.is_match(&subject))
}

fn escape_regex(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        if !ch.is_alphanumeric() {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}
