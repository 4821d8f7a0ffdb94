//! ORM relationship synchronization.
//!
//! Every relationship is a symmetric edge `this.column ↔ from.column` with
//! an arity on each side. Whenever a row's relationship column changes, the
//! synchronizer diffs the old and new id sets and patches the back-reference
//! column of every affected remote row: removed ids lose this row's pk,
//! added ids gain it (inserted sorted without duplicates for arrays,
//! overwritten for singles).
//!
//! The engine applies the resulting patches through its ordinary write path
//! tagged `_orm_skip`, so a patch never triggers another round of
//! synchronization.

use serde_json::Value;

use crate::adapter::StorageAdapter;
use crate::catalog::{Arity, TableSchema};
use crate::error::SiltError;
use crate::row::{self, Key, Row};

/// One pending back-reference patch.
#[derive(Debug)]
pub struct BackRefUpdate {
    pub table: String,
    pub pk: Key,
    pub partial: Row,
}

/// Ids held by a relationship column, regardless of arity.
fn ids_of(value: &Value, arity: Arity) -> Vec<Key> {
    match (arity, value) {
        (Arity::Many, Value::Array(items)) => items.iter().filter_map(Key::from_value).collect(),
        (Arity::Single, v) => Key::from_value(v).into_iter().collect(),
        _ => Vec::new(),
    }
}

/// Compute back-reference patches for a written row.
pub fn plan_sync_on_write(
    adapter: &dyn StorageAdapter,
    schema: &TableSchema,
    pk: &Key,
    old: Option<&Row>,
    new: &Row,
) -> Result<Vec<BackRefUpdate>, SiltError> {
    let mut out = Vec::new();
    for rel in &schema.orm {
        let old_ids = old
            .map(|r| ids_of(&row::path_value(r, &rel.this_column, false), rel.this_arity))
            .unwrap_or_default();
        let new_value = row::path_value(new, &rel.this_column, false);
        let new_ids = ids_of(&new_value, rel.this_arity);

        for id in old_ids.iter().filter(|id| !new_ids.contains(id)) {
            if let Some(patch) = retract(adapter, rel, id, pk)? {
                out.push(patch);
            }
        }
        for id in new_ids.iter().filter(|id| !old_ids.contains(id)) {
            if let Some(patch) = insert(adapter, rel, id, pk)? {
                out.push(patch);
            }
        }
    }
    Ok(out)
}

/// Compute back-reference patches for a deleted row: every id it referenced
/// loses the back-reference.
pub fn plan_sync_on_delete(
    adapter: &dyn StorageAdapter,
    schema: &TableSchema,
    pk: &Key,
    old: &Row,
) -> Result<Vec<BackRefUpdate>, SiltError> {
    let mut out = Vec::new();
    for rel in &schema.orm {
        let old_ids = ids_of(&row::path_value(old, &rel.this_column, false), rel.this_arity);
        for id in &old_ids {
            if let Some(patch) = retract(adapter, rel, id, pk)? {
                out.push(patch);
            }
        }
    }
    Ok(out)
}

fn retract(
    adapter: &dyn StorageAdapter,
    rel: &crate::catalog::OrmRelation,
    id: &Key,
    pk: &Key,
) -> Result<Option<BackRefUpdate>, SiltError> {
    let Some(remote) = adapter.read(&rel.from_table, id)? else {
        return Ok(None);
    };
    let current = row::path_value(&remote, &rel.from_column, false);
    let pk_value = pk.to_value();
    let next = match rel.from_arity {
        Arity::Many => {
            let mut items = match current {
                Value::Array(items) => items,
                _ => Vec::new(),
            };
            let before = items.len();
            items.retain(|v| !row::values_equal(v, &pk_value));
            if items.len() == before {
                return Ok(None);
            }
            Value::Array(items)
        }
        Arity::Single => {
            if !row::values_equal(&current, &pk_value) {
                return Ok(None);
            }
            Value::Null
        }
    };
    let mut partial = Row::new();
    partial.insert(rel.from_column.clone(), next);
    Ok(Some(BackRefUpdate {
        table: rel.from_table.clone(),
        pk: id.clone(),
        partial,
    }))
}

fn insert(
    adapter: &dyn StorageAdapter,
    rel: &crate::catalog::OrmRelation,
    id: &Key,
    pk: &Key,
) -> Result<Option<BackRefUpdate>, SiltError> {
    let Some(remote) = adapter.read(&rel.from_table, id)? else {
        return Ok(None);
    };
    let current = row::path_value(&remote, &rel.from_column, false);
    let pk_value = pk.to_value();
    let next = match rel.from_arity {
        Arity::Many => {
            let mut items = match current {
                Value::Array(items) => items,
                _ => Vec::new(),
            };
            if items.iter().any(|v| row::values_equal(v, &pk_value)) {
                return Ok(None);
            }
            items.push(pk_value);
            items.sort_by(|a, b| Key::from_value(a).cmp(&Key::from_value(b)));
            Value::Array(items)
        }
        Arity::Single => {
            if row::values_equal(&current, &pk_value) {
                return Ok(None);
            }
            pk_value
        }
    };
    let mut partial = Row::new();
    partial.insert(rel.from_column.clone(), next);
    Ok(Some(BackRefUpdate {
        table: rel.from_table.clone(),
        pk: id.clone(),
        partial,
    }))
}
