//! Derived-index maintenance.
//!
//! Every write fans out to the indexes that depend on the row: secondary
//! indexes diff the old and new column values, full-text indexes diff the
//! old and new token sets behind a content-hash gate, and trie indexes swap
//! the old value for the new. Deletes run the inverse, with the stored
//! token record as the authority for what must be retracted.
//!
//! All derived state lives in ordinary adapter tables under the reserved
//! names of [`crate::adapter`], so invariants can be checked by reading
//! those tables back.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::trace;

use crate::adapter::{
    StorageAdapter, idx_table, search_fuzzy_table, search_table, search_tokens_table,
};
use crate::catalog::TableSchema;
use crate::error::SiltError;
use crate::hash::content_hash;
use crate::row::{self, Key, Row};
use crate::tokenizer::{Token, Tokenizers};
use crate::trie::TrieIndex;

/// Secondary index record: all pks whose column equals `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexRecord {
    pub id: Value,
    pub rows: Vec<Value>,
}

/// One row's presence in a search index record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchEntry {
    pub pk: Value,
    pub doc_len: usize,
    pub positions: Vec<usize>,
}

/// Search index record for one normalized (or original-spelling) word.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRecord {
    pub word: String,
    pub rows: Vec<SearchEntry>,
}

/// One token in a row's token snapshot. Keeps the original spelling so
/// fuzzy records keyed by spelling can be retracted on delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenEntry {
    pub word: String,
    pub orig: String,
    pub pos: usize,
}

/// Per-`(table, column, pk)` token snapshot, diffed against new content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRecord {
    pub pk: Value,
    pub hash: u64,
    pub tokens: Vec<TokenEntry>,
}

fn to_row<T: Serialize>(value: &T) -> Result<Row, SiltError> {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(SiltError::InternalError("record did not serialize to an object".into())),
        Err(e) => Err(SiltError::InternalError(format!("record serialize: {e}"))),
    }
}

fn from_row<T: for<'de> Deserialize<'de>>(row: Row) -> Result<T, SiltError> {
    serde_json::from_value(Value::Object(row))
        .map_err(|e| SiltError::InternalError(format!("record deserialize: {e}")))
}

/// Read and decode a secondary index record.
pub fn read_index_record(
    adapter: &dyn StorageAdapter,
    table: &str,
    key: &Key,
) -> Result<Option<IndexRecord>, SiltError> {
    adapter.read(table, key)?.map(from_row).transpose()
}

/// Read and decode a search index record.
pub fn read_search_record(
    adapter: &dyn StorageAdapter,
    table: &str,
    word: &str,
) -> Result<Option<SearchRecord>, SiltError> {
    adapter
        .read(table, &Key::Str(word.to_string()))?
        .map(from_row)
        .transpose()
}

/// Read and decode a row's token snapshot.
pub fn read_token_record(
    adapter: &dyn StorageAdapter,
    table: &str,
    pk: &Key,
) -> Result<Option<TokenRecord>, SiltError> {
    adapter.read(table, pk)?.map(from_row).transpose()
}

/// Applies forward and inverse index maintenance around row writes.
pub struct IndexWriter<'a> {
    pub adapter: &'a mut dyn StorageAdapter,
    pub tries: &'a mut HashMap<(String, String), TrieIndex>,
    pub tokenizers: &'a Tokenizers,
}

impl IndexWriter<'_> {
    /// Maintain all derived indexes for one written row. `old` is the
    /// pre-write row (if any); `rebuild` bypasses the content-hash skip.
    pub fn on_write(
        &mut self,
        schema: &TableSchema,
        pk: &Key,
        old: Option<&Row>,
        new: &Row,
        rebuild: bool,
    ) -> Result<(), SiltError> {
        for column in &schema.secondary_indexes {
            let old_v = old.map(|r| row::path_value(r, column, false)).unwrap_or(Value::Null);
            let new_v = row::path_value(new, column, false);
            if row::values_equal(&old_v, &new_v) {
                continue;
            }
            let table = idx_table(&schema.name, column);
            if !old_v.is_null() {
                self.idx_remove(&table, &old_v, pk)?;
            }
            if !new_v.is_null() {
                self.idx_add(&table, &new_v, pk)?;
            }
        }

        for (column, _spec) in &schema.search_indexes {
            let Some(value) = new.get(column) else { continue };
            if value.is_null() {
                continue;
            }
            self.update_search_column(schema, column, pk, value, rebuild)?;
        }

        for column in &schema.trie_columns {
            let old_v = old.map(|r| row::path_value(r, column, false)).unwrap_or(Value::Null);
            let new_v = row::path_value(new, column, false);
            if row::values_equal(&old_v, &new_v) {
                continue;
            }
            let trie = self
                .tries
                .entry((schema.name.clone(), column.clone()))
                .or_default();
            if let Value::String(s) = &old_v {
                trie.remove(s, pk);
            }
            if let Value::String(s) = &new_v {
                trie.insert(s, pk.clone());
            }
        }

        Ok(())
    }

    /// Retract one deleted row from all derived indexes.
    pub fn on_delete(&mut self, schema: &TableSchema, pk: &Key, old: &Row) -> Result<(), SiltError> {
        for column in &schema.secondary_indexes {
            let old_v = row::path_value(old, column, false);
            if !old_v.is_null() {
                self.idx_remove(&idx_table(&schema.name, column), &old_v, pk)?;
            }
        }

        for column in schema.search_indexes.keys() {
            let tokens_table = search_tokens_table(&schema.name, column);
            let Some(record) = read_token_record(self.adapter, &tokens_table, pk)? else {
                continue;
            };
            let exact = search_table(&schema.name, column);
            let fuzzy = search_fuzzy_table(&schema.name, column);
            for word in distinct(record.tokens.iter().map(|t| t.word.as_str())) {
                self.search_entry_remove(&exact, word, pk)?;
                self.search_entry_remove(&fuzzy, word, pk)?;
            }
            for orig in distinct(record.tokens.iter().map(|t| t.orig.as_str())) {
                self.search_entry_remove(&fuzzy, orig, pk)?;
            }
            self.adapter.delete(&tokens_table, pk)?;
        }

        for column in &schema.trie_columns {
            if let Value::String(s) = &row::path_value(old, column, false)
                && let Some(trie) = self.tries.get_mut(&(schema.name.clone(), column.clone()))
            {
                trie.remove(s, pk);
            }
        }

        Ok(())
    }

    /// Diff old vs new tokens for one search column and reconcile the
    /// exact, fuzzy, and token-snapshot tables.
    fn update_search_column(
        &mut self,
        schema: &TableSchema,
        column: &str,
        pk: &Key,
        value: &Value,
        rebuild: bool,
    ) -> Result<(), SiltError> {
        let spec = &schema.search_indexes[column];
        let text = row::value_to_string(value);
        let hash = content_hash(&text);
        let tokens_table = search_tokens_table(&schema.name, column);
        let existing = read_token_record(self.adapter, &tokens_table, pk)?;

        if let Some(rec) = &existing
            && rec.hash == hash
            && !rebuild
        {
            return Ok(());
        }

        let new_tokens: Vec<Token> = self.tokenizers.tokenize(column, spec.mode, &text);
        let doc_len = new_tokens.len();
        trace!(table = %schema.name, column, %pk, doc_len, "reindexing search column");

        let old_tokens = existing.map(|r| r.tokens).unwrap_or_default();
        let old_words = positions_by(&old_tokens, |t| t.word.as_str());
        let old_origs = positions_by(&old_tokens, |t| t.orig.as_str());
        let new_entries: Vec<TokenEntry> = new_tokens
            .iter()
            .map(|t| TokenEntry {
                word: t.normalized.clone(),
                orig: t.original.clone(),
                pos: t.position,
            })
            .collect();
        let new_words = positions_by(&new_entries, |t| t.word.as_str());
        let new_origs = positions_by(&new_entries, |t| t.orig.as_str());

        let exact = search_table(&schema.name, column);
        let fuzzy = search_fuzzy_table(&schema.name, column);

        // Words no longer present lose this pk; words present (whether new
        // or with shifted positions) get their entry rewritten, which also
        // refreshes doc_len.
        for word in old_words.keys() {
            if !new_words.contains_key(word.as_str()) {
                self.search_entry_remove(&exact, word, pk)?;
                self.search_entry_remove(&fuzzy, word, pk)?;
            }
        }
        for (word, positions) in &new_words {
            self.search_entry_write(&exact, word, pk, doc_len, positions)?;
            self.search_entry_write(&fuzzy, word, pk, doc_len, positions)?;
        }

        // Fuzzy lookups also enumerate original spellings.
        for orig in old_origs.keys() {
            if !new_origs.contains_key(orig.as_str()) && !new_words.contains_key(orig.as_str()) {
                self.search_entry_remove(&fuzzy, orig, pk)?;
            }
        }
        for (orig, positions) in &new_origs {
            if !new_words.contains_key(orig.as_str()) {
                self.search_entry_write(&fuzzy, orig, pk, doc_len, positions)?;
            }
        }

        let record = TokenRecord {
            pk: pk.to_value(),
            hash,
            tokens: new_entries,
        };
        self.adapter
            .write(&tokens_table, Some(pk.clone()), to_row(&record)?)?;
        Ok(())
    }

    fn idx_add(&mut self, table: &str, value: &Value, pk: &Key) -> Result<(), SiltError> {
        let Some(key) = Key::from_value(value) else {
            return Ok(());
        };
        let mut record = read_index_record(self.adapter, table, &key)?.unwrap_or(IndexRecord {
            id: value.clone(),
            rows: Vec::new(),
        });
        let pk_value = pk.to_value();
        if !record.rows.iter().any(|v| row::values_equal(v, &pk_value)) {
            record.rows.push(pk_value);
            record.rows.sort_by(|a, b| {
                Key::from_value(a).cmp(&Key::from_value(b))
            });
        }
        self.adapter.write(table, Some(key), to_row(&record)?)?;
        Ok(())
    }

    fn idx_remove(&mut self, table: &str, value: &Value, pk: &Key) -> Result<(), SiltError> {
        let Some(key) = Key::from_value(value) else {
            return Ok(());
        };
        let Some(mut record) = read_index_record(self.adapter, table, &key)? else {
            return Ok(());
        };
        let pk_value = pk.to_value();
        record.rows.retain(|v| !row::values_equal(v, &pk_value));
        if record.rows.is_empty() {
            self.adapter.delete(table, &key)?;
        } else {
            self.adapter.write(table, Some(key), to_row(&record)?)?;
        }
        Ok(())
    }

    fn search_entry_write(
        &mut self,
        table: &str,
        word: &str,
        pk: &Key,
        doc_len: usize,
        positions: &[usize],
    ) -> Result<(), SiltError> {
        let mut record = read_search_record(self.adapter, table, word)?.unwrap_or(SearchRecord {
            word: word.to_string(),
            rows: Vec::new(),
        });
        let pk_value = pk.to_value();
        record.rows.retain(|e| !row::values_equal(&e.pk, &pk_value));
        record.rows.push(SearchEntry {
            pk: pk_value,
            doc_len,
            positions: positions.to_vec(),
        });
        self.adapter
            .write(table, Some(Key::Str(word.to_string())), to_row(&record)?)?;
        Ok(())
    }

    fn search_entry_remove(&mut self, table: &str, word: &str, pk: &Key) -> Result<(), SiltError> {
        let Some(mut record) = read_search_record(self.adapter, table, word)? else {
            return Ok(());
        };
        let pk_value = pk.to_value();
        record.rows.retain(|e| !row::values_equal(&e.pk, &pk_value));
        if record.rows.is_empty() {
            self.adapter.delete(table, &Key::Str(word.to_string()))?;
        } else {
            self.adapter
                .write(table, Some(Key::Str(word.to_string())), to_row(&record)?)?;
        }
        Ok(())
    }
}

/// Ensure the reserved index tables for a schema exist.
pub fn make_index_tables(
    adapter: &mut dyn StorageAdapter,
    schema: &TableSchema,
) -> Result<(), SiltError> {
    for column in &schema.secondary_indexes {
        adapter.make_table(&idx_table(&schema.name, column), "id", crate::row::KeyKind::Str)?;
    }
    for column in schema.search_indexes.keys() {
        adapter.make_table(&search_table(&schema.name, column), "word", crate::row::KeyKind::Str)?;
        adapter.make_table(
            &search_fuzzy_table(&schema.name, column),
            "word",
            crate::row::KeyKind::Str,
        )?;
        adapter.make_table(
            &search_tokens_table(&schema.name, column),
            "pk",
            schema.pk_kind,
        )?;
    }
    Ok(())
}

/// All reserved index tables belonging to a schema, for `drop`.
pub fn index_tables_of(schema: &TableSchema) -> Vec<String> {
    let mut out = Vec::new();
    for column in &schema.secondary_indexes {
        out.push(idx_table(&schema.name, column));
    }
    for column in schema.search_indexes.keys() {
        out.push(search_table(&schema.name, column));
        out.push(search_fuzzy_table(&schema.name, column));
        out.push(search_tokens_table(&schema.name, column));
    }
    out
}

/// Positions grouped by a token attribute (normalized word or spelling).
fn positions_by(
    tokens: &[TokenEntry],
    key: impl for<'t> Fn(&'t TokenEntry) -> &'t str,
) -> BTreeMap<String, Vec<usize>> {
    let mut map: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for t in tokens {
        map.entry(key(t).to_string()).or_default().push(t.pos);
    }
    map
}

fn distinct<'a>(items: impl Iterator<Item = &'a str>) -> Vec<&'a str> {
    let mut seen = Vec::new();
    for item in items {
        if !seen.contains(&item) {
            seen.push(item);
        }
    }
    seen
}
