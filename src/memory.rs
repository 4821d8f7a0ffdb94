//! In-memory storage adapter.
//!
//! The reference backend: one `BTreeMap<Key, Row>` per table, so key order
//! falls out of the map. Every test path runs on this adapter, and embedders
//! get a zero-setup default store.

use std::collections::{BTreeMap, HashMap};

use crate::adapter::StorageAdapter;
use crate::error::SiltError;
use crate::row::{Key, KeyKind, Row};

#[derive(Debug)]
struct TableState {
    pk_column: String,
    pk_kind: KeyKind,
    rows: BTreeMap<Key, Row>,
    /// Monotone counter for adapter-assigned keys.
    auto_counter: i64,
}

/// A [`StorageAdapter`] backed by process memory.
#[derive(Debug, Default)]
pub struct MemoryAdapter {
    tables: HashMap<String, TableState>,
    connected: bool,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        MemoryAdapter::default()
    }

    fn table(&self, table: &str) -> Result<&TableState, SiltError> {
        self.tables
            .get(table)
            .ok_or_else(|| SiltError::TableNotFound(table.to_string()))
    }

    fn table_mut(&mut self, table: &str) -> Result<&mut TableState, SiltError> {
        self.tables
            .get_mut(table)
            .ok_or_else(|| SiltError::TableNotFound(table.to_string()))
    }
}

impl StorageAdapter for MemoryAdapter {
    fn connect(&mut self) -> Result<(), SiltError> {
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), SiltError> {
        self.connected = false;
        Ok(())
    }

    fn make_table(
        &mut self,
        table: &str,
        pk_column: &str,
        pk_kind: KeyKind,
    ) -> Result<(), SiltError> {
        self.tables.entry(table.to_string()).or_insert_with(|| TableState {
            pk_column: pk_column.to_string(),
            pk_kind,
            rows: BTreeMap::new(),
            auto_counter: 0,
        });
        Ok(())
    }

    fn write(&mut self, table: &str, pk: Option<Key>, mut row: Row) -> Result<Row, SiltError> {
        let state = self.table_mut(table)?;
        let key = match pk {
            Some(k) => k,
            None => {
                state.auto_counter += 1;
                match state.pk_kind {
                    KeyKind::Int => {
                        // Stay monotone past explicitly-written keys.
                        let floor = state
                            .rows
                            .keys()
                            .filter_map(|k| match k {
                                Key::Int(i) => Some(*i),
                                Key::Str(_) => None,
                            })
                            .max()
                            .unwrap_or(0);
                        state.auto_counter = state.auto_counter.max(floor + 1);
                        Key::Int(state.auto_counter)
                    }
                    KeyKind::Str => Key::Str(format!("{:012x}", state.auto_counter)),
                }
            }
        };
        row.insert(state.pk_column.clone(), key.to_value());
        state.rows.insert(key, row.clone());
        Ok(row)
    }

    fn read(&self, table: &str, pk: &Key) -> Result<Option<Row>, SiltError> {
        Ok(self.table(table)?.rows.get(pk).cloned())
    }

    fn batch_read(&self, table: &str, pks: &[Key]) -> Result<Vec<Row>, SiltError> {
        let state = self.table(table)?;
        Ok(pks
            .iter()
            .filter_map(|pk| state.rows.get(pk).cloned())
            .collect())
    }

    fn range_read(&self, table: &str, from: &Key, to: &Key) -> Result<Vec<Row>, SiltError> {
        let state = self.table(table)?;
        Ok(state
            .rows
            .range(from.clone()..=to.clone())
            .map(|(_, row)| row.clone())
            .collect())
    }

    fn offset_read(&self, table: &str, offset: usize, limit: usize) -> Result<Vec<Row>, SiltError> {
        let state = self.table(table)?;
        Ok(state
            .rows
            .values()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    fn delete(&mut self, table: &str, pk: &Key) -> Result<(), SiltError> {
        self.table_mut(table)?.rows.remove(pk);
        Ok(())
    }

    fn drop_table(&mut self, table: &str) -> Result<(), SiltError> {
        let state = self.table_mut(table)?;
        state.rows.clear();
        state.auto_counter = 0;
        Ok(())
    }

    fn table_keys(&self, table: &str) -> Result<Vec<Key>, SiltError> {
        Ok(self.table(table)?.rows.keys().cloned().collect())
    }

    fn table_count(&self, table: &str) -> Result<u64, SiltError> {
        Ok(self.table(table)?.rows.len() as u64)
    }

    fn destroy(&mut self) -> Result<(), SiltError> {
        self.tables.clear();
        self.connected = false;
        Ok(())
    }
}
