//! ORM expansion: replace relationship ids with related rows.
//!
//! For each ORM spec and each selected row, the ids held by `row[key]` are
//! resolved against the related table (per the registered relationship),
//! then the spec's sub-clauses run over the related rows: where, group-by
//! sort, order-by, offset, limit (engine default when unset), projection.
//! The expansion is assigned back as an array or a single row per the
//! relationship arity; an empty result leaves `[]` or removes the key.

use serde_json::Value;

use crate::adapter::StorageAdapter;
use crate::catalog::{Arity, Catalog, TableSchema};
use crate::config::EngineConfig;
use crate::error::SiltError;
use crate::predicate::{self, EvalCtx};
use crate::query::OrmSpec;
use crate::row::{self, Key, Row};

pub fn apply(
    adapter: &dyn StorageAdapter,
    catalog: &Catalog,
    schema: &TableSchema,
    config: &EngineConfig,
    specs: &[OrmSpec],
    rows: &mut [Row],
) -> Result<(), SiltError> {
    for spec in specs {
        let rel = schema
            .relation_for(&spec.key)
            .ok_or_else(|| SiltError::UnknownRelation {
                table: schema.name.clone(),
                column: spec.key.clone(),
            })?;
        let related_schema = catalog.get(&rel.from_table)?;

        for r in rows.iter_mut() {
            let ids = match (rel.this_arity, row::path_value(r, &spec.key, false)) {
                (Arity::Many, Value::Array(items)) => {
                    items.iter().filter_map(Key::from_value).collect::<Vec<_>>()
                }
                (Arity::Single, v) => Key::from_value(&v).into_iter().collect(),
                _ => Vec::new(),
            };

            let mut related = adapter.batch_read(&rel.from_table, &ids)?;
            related = filter_related(related_schema, spec, related)?;
            super::group_by::apply_sort_only(&mut related, &spec.group_by);
            super::order_by::sort(&mut related, &spec.order_by, false);

            let limit = spec.limit.unwrap_or(config.orm_row_limit);
            let expanded: Vec<Row> = related
                .into_iter()
                .skip(spec.offset)
                .take(limit)
                .map(|row| project_related(spec, row))
                .collect();

            match rel.this_arity {
                Arity::Many => {
                    let items = expanded.into_iter().map(Value::Object).collect();
                    r.insert(spec.key.clone(), Value::Array(items));
                }
                Arity::Single => match expanded.into_iter().next() {
                    Some(single) => {
                        r.insert(spec.key.clone(), Value::Object(single));
                    }
                    None => {
                        r.remove(&spec.key);
                    }
                },
            }
        }
    }
    Ok(())
}

fn filter_related(
    schema: &TableSchema,
    spec: &OrmSpec,
    rows: Vec<Row>,
) -> Result<Vec<Row>, SiltError> {
    let Some(clause) = &spec.where_clause else {
        return Ok(rows);
    };
    let ctx = EvalCtx::plain(&schema.pk_column);
    let mut out = Vec::new();
    for (i, r) in rows.into_iter().enumerate() {
        if predicate::matches(&ctx, clause, &r, i)? {
            out.push(r);
        }
    }
    Ok(out)
}

fn project_related(spec: &OrmSpec, row: Row) -> Row {
    let Some(select) = &spec.select else {
        return row;
    };
    if select.is_empty() {
        return row;
    }
    let mut out = Row::new();
    for col in select {
        out.insert(col.clone(), row::path_value(&row, col, false));
    }
    out
}
