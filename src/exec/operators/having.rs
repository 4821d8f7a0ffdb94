//! HAVING: re-filter mutated rows with the predicate evaluator.
//!
//! Runs after projection, so aliased function outputs are visible to the
//! predicate paths.

use crate::error::SiltError;
use crate::predicate::{self, EvalCtx};
use crate::query::WhereClause;
use crate::row::Row;

pub fn apply(
    clause: &WhereClause,
    pk_column: &str,
    joined: bool,
    rows: Vec<Row>,
) -> Result<Vec<Row>, SiltError> {
    let ctx = EvalCtx {
        ignore_first_path: joined,
        pk_column,
        search_sets: None,
    };
    let mut out = Vec::new();
    for (i, r) in rows.into_iter().enumerate() {
        if predicate::matches(&ctx, clause, &r, i)? {
            out.push(r);
        }
    }
    Ok(out)
}
