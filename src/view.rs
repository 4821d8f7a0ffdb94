//! Denormalized view projection.
//!
//! A view copies columns from a source row into the viewing row, located by
//! a local column holding the source pk. Two directions:
//!
//! - **Local, before write** — the row being written refreshes its own
//!   projected columns when its reference column changed.
//! - **Remote, after write/delete** — every table projecting *from* the
//!   written table recopies the mapped columns into its affected rows,
//!   found through the secondary index on the view's pk column.
//!
//! View columns are strictly derived: nothing else writes them. On delete
//! of the referenced row, LIVE views null their projections and GHOST
//! views keep the last snapshot.

use serde_json::Value;
use tracing::debug;

use crate::adapter::{StorageAdapter, idx_table};
use crate::catalog::{Catalog, TableSchema, ViewMode};
use crate::error::SiltError;
use crate::index::read_index_record;
use crate::row::{self, Key, Row};

/// Fill the view-projected columns of `row` before it is written.
///
/// Skips a view when the reference column is absent from the merged row or
/// unchanged against the existing row. A null reference nulls the
/// projection; a dangling reference nulls it only in LIVE mode.
pub fn project_local(
    adapter: &dyn StorageAdapter,
    schema: &TableSchema,
    old: Option<&Row>,
    row: &mut Row,
) -> Result<(), SiltError> {
    for view in &schema.views {
        let Some(reference) = row.get(&view.pk_column).cloned() else {
            continue;
        };
        if let Some(old_row) = old {
            let old_ref = row::path_value(old_row, &view.pk_column, false);
            if row::values_equal(&old_ref, &reference) {
                continue;
            }
        }

        if reference.is_null() {
            null_projection(row, view);
            continue;
        }
        let Some(source_pk) = Key::from_value(&reference) else {
            null_projection(row, view);
            continue;
        };

        match adapter.read(&view.source, &source_pk)? {
            Some(source_row) => {
                for (local, remote) in &view.columns {
                    let v = row::path_value(&source_row, remote, false);
                    row.insert(local.clone(), v);
                }
            }
            None => {
                if view.mode == ViewMode::Live {
                    null_projection(row, view);
                }
            }
        }
    }
    Ok(())
}

fn null_projection(row: &mut Row, view: &crate::catalog::ViewSpec) {
    for (local, _) in &view.columns {
        row.insert(local.clone(), Value::Null);
    }
}

/// A pending update to one remote row: the partial row carries only the
/// recopied columns and is applied through the ordinary write path so the
/// remote table's own indexes and dependents stay consistent.
#[derive(Debug)]
pub struct RemoteUpdate {
    pub table: String,
    pub pk: Key,
    pub partial: Row,
}

/// Compute the remote projections affected by a write (`new_row: Some`) or
/// delete (`new_row: None`) of the source row `pk`.
pub fn plan_remote(
    adapter: &dyn StorageAdapter,
    catalog: &Catalog,
    source: &TableSchema,
    pk: &Key,
    new_row: Option<&Row>,
) -> Result<Vec<RemoteUpdate>, SiltError> {
    let mut out = Vec::new();
    for viewer_name in &source.viewed_by {
        let viewer = catalog.get(viewer_name)?;
        for view in viewer.views.iter().filter(|v| v.source == source.name) {
            if new_row.is_none() && view.mode == ViewMode::Ghost {
                continue;
            }
            let index = idx_table(viewer_name, &view.pk_column);
            let Some(record) = read_index_record(adapter, &index, pk)? else {
                continue;
            };
            let affected: Vec<Key> = record.rows.iter().filter_map(Key::from_value).collect();
            debug!(
                source = %source.name,
                viewer = %viewer_name,
                affected = affected.len(),
                "projecting view columns to remote table"
            );
            for remote_pk in affected {
                let Some(remote_row) = adapter.read(viewer_name, &remote_pk)? else {
                    continue;
                };
                let mut partial = Row::new();
                for (local, remote) in &view.columns {
                    let next = match new_row {
                        Some(src) => row::path_value(src, remote, false),
                        None => Value::Null,
                    };
                    let current = row::path_value(&remote_row, local, false);
                    if !row::values_equal(&current, &next) {
                        partial.insert(local.clone(), next);
                    }
                }
                if !partial.is_empty() {
                    out.push(RemoteUpdate {
                        table: viewer_name.clone(),
                        pk: remote_pk,
                        partial,
                    });
                }
            }
        }
    }
    Ok(out)
}
