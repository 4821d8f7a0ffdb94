//! Nested-loop join.
//!
//! Joined rows are keyed by literal `"table.column"` strings. The first
//! side is the query's table (the join table for `right` joins); unmatched
//! first-side rows are null-padded for `left`/`right`/`outer`, and `outer`
//! additionally appends unmatched second-side rows. `cross` emits the full
//! cartesian product.
//!
//! WHERE and range alongside a join are applied by the engine after the
//! join, over the prefixed keys.

use serde_json::Value;

use crate::adapter::StorageAdapter;
use crate::catalog::{Catalog, TableSchema};
use crate::error::SiltError;
use crate::predicate;
use crate::query::{JoinKind, JoinSpec};
use crate::row::{self, Row};

/// Execute the join stage for a query on `base_table`.
pub fn apply(
    adapter: &dyn StorageAdapter,
    catalog: &Catalog,
    base_table: &str,
    spec: &JoinSpec,
) -> Result<Vec<Row>, SiltError> {
    let base_schema = catalog.get(base_table)?;
    let join_schema = catalog.get(&spec.table)?;

    let base_rows = scan(adapter, base_table)?;
    let join_rows = scan(adapter, &spec.table)?;

    // For a right join the joined table drives the outer loop; output keys
    // stay prefixed by their own table either way.
    let (first_rows, first_schema, second_rows, second_schema) = match spec.kind {
        JoinKind::Right => (&join_rows, join_schema, &base_rows, base_schema),
        _ => (&base_rows, base_schema, &join_rows, join_schema),
    };

    let mut out = Vec::new();
    let mut second_matched = vec![false; second_rows.len()];

    for first in first_rows {
        let mut matched = false;
        for (j, second) in second_rows.iter().enumerate() {
            let combined = combine(first_schema, first, Some((second_schema, second)));
            let hit = match (&spec.kind, &spec.on) {
                (JoinKind::Cross, _) | (_, None) => true,
                (_, Some(on)) => {
                    let left = row::path_value(&combined, &on.left, true);
                    let right = row::path_value(&combined, &on.right, true);
                    predicate::compare(on.cmp, &left, &right)?
                }
            };
            if hit {
                matched = true;
                second_matched[j] = true;
                out.push(combined);
            }
        }
        if !matched && matches!(spec.kind, JoinKind::Left | JoinKind::Right | JoinKind::Outer) {
            out.push(combine(first_schema, first, None).with_nulls(second_schema));
        }
    }

    if spec.kind == JoinKind::Outer {
        for (j, second) in second_rows.iter().enumerate() {
            if !second_matched[j] {
                out.push(combine(second_schema, second, None).with_nulls(first_schema));
            }
        }
    }

    Ok(out)
}

fn scan(adapter: &dyn StorageAdapter, table: &str) -> Result<Vec<Row>, SiltError> {
    let count = adapter.table_count(table)? as usize;
    adapter.offset_read(table, 0, count)
}

fn combine(
    first_schema: &TableSchema,
    first: &Row,
    second: Option<(&TableSchema, &Row)>,
) -> Row {
    let mut out = Row::new();
    for (k, v) in first {
        out.insert(format!("{}.{}", first_schema.name, k), v.clone());
    }
    if let Some((schema, second)) = second {
        for (k, v) in second {
            out.insert(format!("{}.{}", schema.name, k), v.clone());
        }
    }
    out
}

trait NullPad {
    fn with_nulls(self, schema: &TableSchema) -> Self;
}

impl NullPad for Row {
    /// Pad the missing side's declared columns with nulls.
    fn with_nulls(mut self, schema: &TableSchema) -> Row {
        for col in &schema.columns {
            self.insert(format!("{}.{}", schema.name, col.name), Value::Null);
        }
        self
    }
}
