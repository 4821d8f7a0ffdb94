//! Storage adapter interface.
//!
//! The engine consumes a minimal point/range surface over any backend.
//! Everything derived — secondary indexes, full-text records, token
//! snapshots — lives in ordinary adapter tables under reserved names, so a
//! backend needs no special index support.
//!
//! Adapters may hand out shared or frozen rows; the engine copies before
//! mutating. Numeric-pk tables must keep keys in numeric order so range
//! reads and offset math are well-defined.

use crate::error::SiltError;
use crate::row::{Key, KeyKind, Row};

/// Uniform point/range operations over a backend.
pub trait StorageAdapter: Send {
    fn connect(&mut self) -> Result<(), SiltError>;

    fn disconnect(&mut self) -> Result<(), SiltError>;

    /// Create (or reopen) a table. Idempotent.
    fn make_table(
        &mut self,
        table: &str,
        pk_column: &str,
        pk_kind: KeyKind,
    ) -> Result<(), SiltError>;

    /// Write a row. With `pk: None` the adapter assigns a key (monotone
    /// integer or generated string per the table's [`KeyKind`]) and
    /// backfills it into the row. Returns the stored row.
    fn write(&mut self, table: &str, pk: Option<Key>, row: Row) -> Result<Row, SiltError>;

    fn read(&self, table: &str, pk: &Key) -> Result<Option<Row>, SiltError>;

    /// Point-read many keys; missing keys are skipped.
    fn batch_read(&self, table: &str, pks: &[Key]) -> Result<Vec<Row>, SiltError>;

    /// Rows whose pk lies in `[from, to]`, in key order.
    fn range_read(&self, table: &str, from: &Key, to: &Key) -> Result<Vec<Row>, SiltError>;

    /// Rows at positions `[offset, offset + limit)` of key order.
    fn offset_read(&self, table: &str, offset: usize, limit: usize) -> Result<Vec<Row>, SiltError>;

    fn delete(&mut self, table: &str, pk: &Key) -> Result<(), SiltError>;

    /// Remove all rows of a table. The table stays usable.
    fn drop_table(&mut self, table: &str) -> Result<(), SiltError>;

    /// All keys in order.
    fn table_keys(&self, table: &str) -> Result<Vec<Key>, SiltError>;

    fn table_count(&self, table: &str) -> Result<u64, SiltError>;

    /// Tear down all storage. The adapter is unusable afterwards.
    fn destroy(&mut self) -> Result<(), SiltError>;
}

// ── Reserved table names ─────────────────────────────────────────────────
// The engine owns the `_`-prefix in the adapter namespace.

/// Secondary index table for `(table, column)`.
pub fn idx_table(table: &str, column: &str) -> String {
    format!("_{table}_idx_{column}")
}

/// Exact full-text index table for `(table, column)`.
pub fn search_table(table: &str, column: &str) -> String {
    format!("_{table}_search_{column}")
}

/// Fuzzy full-text index table for `(table, column)`.
pub fn search_fuzzy_table(table: &str, column: &str) -> String {
    format!("_{table}_search_fuzzy_{column}")
}

/// Per-row token snapshot table for `(table, column)`.
pub fn search_tokens_table(table: &str, column: &str) -> String {
    format!("_{table}_search_tokens_{column}")
}

/// Whether a table name belongs to the engine, not the user.
pub fn is_reserved(name: &str) -> bool {
    name.starts_with('_')
}
