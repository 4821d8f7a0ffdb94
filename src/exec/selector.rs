//! Row selection strategies.
//!
//! Strategy precedence for a query:
//!
//! 1. `join` present — emit an empty seed; the join stage scans for itself.
//! 2. `trie` present — prefix lookup on the in-memory trie.
//! 3. `range` present — positional read over pk order; a negative limit
//!    counts from the end of the table.
//! 4. No WHERE, or a function WHERE — full table scan.
//! 5. A single fast-path-eligible leaf — index-backed lookup.
//! 6. A compound list of fast leaves — per-leaf lookups combined by pk
//!    (AND intersects, OR unions).
//! 7. A fast AND-prefix followed by slow leaves — fast lookups narrow the
//!    set, the evaluator finishes it.
//! 8. Anything else — full scan, with `search(...)` leaves pre-executed
//!    into pk sets the evaluator consults.
//!
//! Fast-leaf eligibility: the pk or a secondary-indexed column with
//! `=`/`IN`/`BETWEEN`, or a `search(...)` path with `=`/`>`/`<`.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde_json::Value;
use tracing::debug;

use crate::adapter::{StorageAdapter, idx_table, search_fuzzy_table, search_table};
use crate::catalog::{Catalog, TableSchema};
use crate::config::EngineConfig;
use crate::error::SiltError;
use crate::index::{read_index_record, read_search_record};
use crate::predicate::{self, EvalCtx, SearchSets};
use crate::query::{Cmp, Connective, Query, WhereClause, WhereLeaf};
use crate::row::{self, Key, Row};
use crate::tokenizer::{
    ColumnHits, RowMatch, SearchThreshold, Tokenizers, WordHit, has_contiguous_sequence, score_row,
};
use crate::trie::TrieIndex;

/// Everything the selector needs, borrowed from the engine.
pub struct SelectCtx<'a> {
    pub adapter: &'a dyn StorageAdapter,
    pub catalog: &'a Catalog,
    pub tries: &'a HashMap<(String, String), TrieIndex>,
    pub tokenizers: &'a Tokenizers,
    pub config: &'a EngineConfig,
}

/// Select the rows a query's WHERE/range/trie clauses describe. The
/// returned set is fully filtered; later stages only reshape it.
pub fn select_rows(ctx: &SelectCtx<'_>, q: &Query) -> Result<Vec<Row>, SiltError> {
    let table = q
        .table
        .name()
        .ok_or_else(|| SiltError::InternalError("selector called with an instance table".into()))?;
    let schema = ctx.catalog.get(table)?;

    // Join does its own cartesian; the seed is empty.
    if q.join.is_some() {
        return Ok(Vec::new());
    }

    if let Some(trie) = &q.trie {
        let pks = ctx
            .tries
            .get(&(table.to_string(), trie.column.clone()))
            .map(|t| t.prefix(&trie.search))
            .unwrap_or_default();
        debug!(table, column = %trie.column, hits = pks.len(), "trie prefix lookup");
        return ctx.adapter.batch_read(table, &pks);
    }

    if let Some((limit, offset)) = q.range {
        return range_strategy(ctx, table, limit, offset);
    }

    match &q.where_clause {
        None => full_scan(ctx.adapter, table),
        Some(WhereClause::Func(f)) => {
            let rows = full_scan(ctx.adapter, table)?;
            Ok(rows
                .into_iter()
                .enumerate()
                .filter(|(i, r)| f(r, *i))
                .map(|(_, r)| r)
                .collect())
        }
        Some(clause) => where_strategy(ctx, schema, clause),
    }
}

fn full_scan(adapter: &dyn StorageAdapter, table: &str) -> Result<Vec<Row>, SiltError> {
    let count = adapter.table_count(table)? as usize;
    adapter.offset_read(table, 0, count)
}

/// Direct positional range over pk order. A negative limit reads the last
/// `|limit|` rows, skipping `offset` from the end.
fn range_strategy(
    ctx: &SelectCtx<'_>,
    table: &str,
    limit: i64,
    offset: usize,
) -> Result<Vec<Row>, SiltError> {
    if limit == 0 {
        return Ok(Vec::new());
    }
    if limit > 0 {
        return ctx.adapter.offset_read(table, offset, limit as usize);
    }
    let count = ctx.adapter.table_count(table)? as usize;
    let take = limit.unsigned_abs() as usize;
    let end = count.saturating_sub(offset);
    let start = end.saturating_sub(take);
    ctx.adapter.offset_read(table, start, end - start)
}

fn where_strategy(
    ctx: &SelectCtx<'_>,
    schema: &TableSchema,
    clause: &WhereClause,
) -> Result<Vec<Row>, SiltError> {
    match clause {
        WhereClause::Leaf(leaf) if fast_eligible(schema, leaf) => {
            let rows = execute_fast_leaf(ctx, schema, leaf)?;
            Ok(dedup_by_pk(schema, rows))
        }
        WhereClause::List { first, rest } => {
            let all_fast = fast_eligible(schema, first)
                && rest.iter().all(|(_, l)| fast_eligible(schema, l));
            if all_fast {
                return fast_list(ctx, schema, first, rest);
            }
            // Fast AND-prefix + slow remainder, only when the whole list is
            // AND-connected (left-to-right OR semantics would not survive
            // the subset split).
            if fast_eligible(schema, first)
                && rest.iter().all(|(conn, _)| *conn == Connective::And)
            {
                let split = rest
                    .iter()
                    .position(|(_, l)| !fast_eligible(schema, l))
                    .unwrap_or(rest.len());
                let mut rows = execute_fast_leaf(ctx, schema, first)?;
                for (_, leaf) in &rest[..split] {
                    let next_pks = pk_set(schema, &execute_fast_leaf(ctx, schema, leaf)?);
                    rows.retain(|r| pk_of(schema, r).is_some_and(|pk| next_pks.contains(&pk)));
                }
                let remainder = &rest[split..];
                let (slow_first, slow_rest) = match remainder.split_first() {
                    Some(((_, leaf), tail)) => (leaf.clone(), tail.to_vec()),
                    None => return Ok(dedup_by_pk(schema, rows)),
                };
                let sub = WhereClause::List {
                    first: slow_first,
                    rest: slow_rest,
                };
                return slow_filter(ctx, schema, &sub, dedup_by_pk(schema, rows));
            }
            let rows = full_scan(ctx.adapter, &schema.name)?;
            slow_filter(ctx, schema, clause, rows)
        }
        _ => {
            let rows = full_scan(ctx.adapter, &schema.name)?;
            slow_filter(ctx, schema, clause, rows)
        }
    }
}

/// Evaluate a clause over candidate rows, pre-executing any `search(...)`
/// leaves into pk sets for the evaluator.
fn slow_filter(
    ctx: &SelectCtx<'_>,
    schema: &TableSchema,
    clause: &WhereClause,
    rows: Vec<Row>,
) -> Result<Vec<Row>, SiltError> {
    let mut sets = SearchSets::new();
    for leaf in clause.leaves() {
        if leaf.search_columns().is_some() && !sets.contains_key(&leaf.cache_key()) {
            let matched = execute_search_leaf(ctx, schema, leaf)?;
            sets.insert(leaf.cache_key(), pk_set(schema, &matched));
        }
    }
    let eval = EvalCtx {
        ignore_first_path: false,
        pk_column: &schema.pk_column,
        search_sets: Some(&sets),
    };
    let mut out = Vec::new();
    for (i, r) in rows.into_iter().enumerate() {
        if predicate::matches(&eval, clause, &r, i)? {
            out.push(r);
        }
    }
    Ok(out)
}

/// Run every leaf of an all-fast list and combine the result sets by pk,
/// left to right: AND intersects, OR unions (first-seen order kept).
fn fast_list(
    ctx: &SelectCtx<'_>,
    schema: &TableSchema,
    first: &WhereLeaf,
    rest: &[(Connective, WhereLeaf)],
) -> Result<Vec<Row>, SiltError> {
    let mut acc = dedup_by_pk(schema, execute_fast_leaf(ctx, schema, first)?);
    for (conn, leaf) in rest {
        let next = dedup_by_pk(schema, execute_fast_leaf(ctx, schema, leaf)?);
        match conn {
            Connective::And => {
                let keep = pk_set(schema, &next);
                acc.retain(|r| pk_of(schema, r).is_some_and(|pk| keep.contains(&pk)));
            }
            Connective::Or => {
                let seen = pk_set(schema, &acc);
                for r in next {
                    if pk_of(schema, &r).is_none_or(|pk| !seen.contains(&pk)) {
                        acc.push(r);
                    }
                }
            }
        }
    }
    Ok(acc)
}

fn fast_eligible(schema: &TableSchema, leaf: &WhereLeaf) -> bool {
    if leaf.search_columns().is_some() {
        return matches!(leaf.cmp, Cmp::Eq | Cmp::Gt | Cmp::Lt);
    }
    (leaf.path == schema.pk_column || schema.secondary_indexes.contains(&leaf.path))
        && matches!(leaf.cmp, Cmp::Eq | Cmp::In | Cmp::Between)
}

fn execute_fast_leaf(
    ctx: &SelectCtx<'_>,
    schema: &TableSchema,
    leaf: &WhereLeaf,
) -> Result<Vec<Row>, SiltError> {
    if leaf.search_columns().is_some() {
        return execute_search_leaf(ctx, schema, leaf);
    }
    let table = &schema.name;
    if leaf.path == schema.pk_column {
        return match leaf.cmp {
            Cmp::Eq => {
                let Some(key) = Key::from_value(&leaf.value) else {
                    return Ok(Vec::new());
                };
                Ok(ctx.adapter.read(table, &key)?.into_iter().collect())
            }
            Cmp::In => {
                let keys = value_keys(&leaf.value);
                ctx.adapter.batch_read(table, &keys)
            }
            Cmp::Between => {
                let Some((lo, hi)) = between_bounds(&leaf.value) else {
                    return Ok(Vec::new());
                };
                ctx.adapter.range_read(table, &lo, &hi)
            }
            _ => Ok(Vec::new()),
        };
    }

    // Secondary index: resolve pks through the index table, then fetch.
    let index = idx_table(table, &leaf.path);
    let pks: Vec<Key> = match leaf.cmp {
        Cmp::Eq => index_pks(ctx.adapter, &index, &leaf.value)?,
        Cmp::In => {
            let mut out = Vec::new();
            if let Value::Array(items) = &leaf.value {
                for item in items {
                    out.extend(index_pks(ctx.adapter, &index, item)?);
                }
            }
            out
        }
        Cmp::Between => {
            let Some((lo, hi)) = between_bounds(&leaf.value) else {
                return Ok(Vec::new());
            };
            let mut out = Vec::new();
            for record_row in ctx.adapter.range_read(&index, &lo, &hi)? {
                if let Ok(record) =
                    serde_json::from_value::<crate::index::IndexRecord>(Value::Object(record_row))
                {
                    out.extend(record.rows.iter().filter_map(Key::from_value));
                }
            }
            out
        }
        _ => Vec::new(),
    };
    ctx.adapter.batch_read(table, &pks)
}

fn index_pks(
    adapter: &dyn StorageAdapter,
    index: &str,
    value: &Value,
) -> Result<Vec<Key>, SiltError> {
    let Some(key) = Key::from_value(value) else {
        return Ok(Vec::new());
    };
    Ok(read_index_record(adapter, index, &key)?
        .map(|r| r.rows.iter().filter_map(Key::from_value).collect())
        .unwrap_or_default())
}

fn between_bounds(value: &Value) -> Option<(Key, Key)> {
    match value {
        Value::Array(items) if items.len() == 2 => {
            Some((Key::from_value(&items[0])?, Key::from_value(&items[1])?))
        }
        _ => None,
    }
}

fn value_keys(value: &Value) -> Vec<Key> {
    match value {
        Value::Array(items) => items.iter().filter_map(Key::from_value).collect(),
        other => Key::from_value(other).into_iter().collect(),
    }
}

fn pk_of(schema: &TableSchema, r: &Row) -> Option<Key> {
    Key::from_value(&row::path_value(r, &schema.pk_column, false))
}

fn pk_set(schema: &TableSchema, rows: &[Row]) -> HashSet<Key> {
    rows.iter().filter_map(|r| pk_of(schema, r)).collect()
}

fn dedup_by_pk(schema: &TableSchema, rows: Vec<Row>) -> Vec<Row> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(rows.len());
    for r in rows {
        match pk_of(schema, &r) {
            Some(pk) => {
                if seen.insert(pk) {
                    out.push(r);
                }
            }
            None => out.push(r),
        }
    }
    out
}

// ── Search leaf execution ────────────────────────────────────────────────

/// Term and threshold of a search leaf. `=` is exact; `>`/`<` are fuzzy
/// with the bound carried as `["term", bound]` (a bare term means 0).
fn parse_search_value(leaf: &WhereLeaf) -> Result<(String, SearchThreshold), SiltError> {
    let (term, bound) = match &leaf.value {
        Value::String(s) => (s.clone(), 0.0),
        Value::Array(items) if items.len() == 2 => {
            let term = items[0]
                .as_str()
                .ok_or_else(|| SiltError::InvalidArgument("search term must be a string".into()))?
                .to_string();
            (term, row::coerce_f64(&items[1]).unwrap_or(0.0))
        }
        _ => {
            return Err(SiltError::InvalidArgument(
                "search value must be a term or [term, bound] pair".into(),
            ));
        }
    };
    let threshold = match leaf.cmp {
        Cmp::Eq => SearchThreshold::Exact,
        Cmp::Gt => SearchThreshold::Above(bound),
        Cmp::Lt => SearchThreshold::Below(bound),
        other => {
            return Err(SiltError::InvalidArgument(format!(
                "search does not support the {} operator",
                other.as_str()
            )));
        }
    };
    Ok((term, threshold))
}

/// Execute one `search(cols) op value` leaf: look up index records per
/// query token (enumerating the fuzzy word index in fuzzy mode), score per
/// §scoring rules, normalize to the best row, filter by threshold, and
/// return full rows adorned with `_weight` and `_locations`.
pub fn execute_search_leaf(
    ctx: &SelectCtx<'_>,
    schema: &TableSchema,
    leaf: &WhereLeaf,
) -> Result<Vec<Row>, SiltError> {
    let columns = leaf
        .search_columns()
        .ok_or_else(|| SiltError::InternalError("not a search leaf".into()))?;
    let (term, threshold) = parse_search_value(leaf)?;
    let fuzzy = threshold.is_fuzzy();

    let mut matches: BTreeMap<Key, RowMatch> = BTreeMap::new();
    let mut query_len = 0usize;

    for column in &columns {
        let Some(spec) = schema.search_indexes.get(column) else {
            continue;
        };
        let query_tokens = ctx.tokenizers.tokenize(column, spec.mode, &term);
        if query_tokens.is_empty() {
            continue;
        }
        query_len = query_len.max(query_tokens.len());
        let exact_table = search_table(&schema.name, column);
        let fuzzy_table = search_fuzzy_table(&schema.name, column);

        for (term_idx, token) in query_tokens.iter().enumerate() {
            if let Some(record) = read_search_record(ctx.adapter, &exact_table, &token.normalized)? {
                for entry in &record.rows {
                    add_hit(&mut matches, column, spec.boost, &entry.pk, &record.word, entry, 0, term_idx);
                }
            }
            if fuzzy {
                for word_key in ctx.adapter.table_keys(&fuzzy_table)? {
                    let Key::Str(word) = &word_key else { continue };
                    if word == &token.normalized {
                        continue;
                    }
                    if !ctx.tokenizers.fuzzy_matches(
                        &token.normalized,
                        word,
                        ctx.config.fuzzy_distance_divisor,
                    ) {
                        continue;
                    }
                    let distance = ctx.tokenizers.fuzzy.distance(&token.normalized, word);
                    if let Some(record) = read_search_record(ctx.adapter, &fuzzy_table, word)? {
                        for entry in &record.rows {
                            add_hit(
                                &mut matches,
                                column,
                                spec.boost,
                                &entry.pk,
                                &record.word,
                                entry,
                                distance,
                                term_idx,
                            );
                        }
                    }
                }
            }
        }

    }

    // Exact multi-term queries must appear contiguously in at least one
    // matched column; other rows are discarded.
    if !fuzzy && query_len > 1 {
        matches.retain(|_, m| {
            m.columns
                .values()
                .any(|col| has_contiguous_sequence(col, query_len))
        });
    }

    // Score, normalize to the maximum, filter by threshold.
    let mut scored: Vec<(Key, f64)> = matches
        .iter()
        .map(|(pk, m)| (pk.clone(), score_row(m, fuzzy)))
        .collect();
    let max = scored.iter().map(|(_, s)| *s).fold(0.0_f64, f64::max);
    if max > 0.0 {
        for (_, s) in &mut scored {
            *s /= max;
        }
    }
    scored.retain(|(_, weight)| threshold.keeps(*weight));
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    debug!(
        table = %schema.name,
        term = %term,
        fuzzy,
        hits = scored.len(),
        "search leaf executed"
    );

    let mut out = Vec::with_capacity(scored.len());
    for (pk, weight) in scored {
        let Some(mut r) = ctx.adapter.read(&schema.name, &pk)? else {
            continue;
        };
        r.insert("_weight".into(), Value::from(weight));
        r.insert("_locations".into(), locations_of(&matches[&pk]));
        out.push(r);
    }
    Ok(out)
}

#[allow(clippy::too_many_arguments)]
fn add_hit(
    matches: &mut BTreeMap<Key, RowMatch>,
    column: &str,
    boost: f64,
    pk_value: &Value,
    word: &str,
    entry: &crate::index::SearchEntry,
    distance: usize,
    term_idx: usize,
) {
    let Some(pk) = Key::from_value(pk_value) else {
        return;
    };
    let row_match = matches.entry(pk).or_default();
    let col = row_match
        .columns
        .entry(column.to_string())
        .or_insert_with(|| ColumnHits {
            boost,
            hits: Vec::new(),
        });
    if let Some(hit) = col.hits.iter_mut().find(|h| h.word == word) {
        hit.terms.insert(term_idx);
        hit.distance = hit.distance.min(distance);
    } else {
        col.hits.push(WordHit {
            word: word.to_string(),
            positions: entry.positions.clone(),
            doc_len: entry.doc_len,
            distance,
            terms: [term_idx].into_iter().collect(),
        });
    }
}

/// `_locations`: per column, the matched words and their token positions.
fn locations_of(m: &RowMatch) -> Value {
    let mut cols = serde_json::Map::new();
    for (column, hits) in &m.columns {
        let list: Vec<Value> = hits
            .hits
            .iter()
            .map(|h| {
                serde_json::json!({
                    "word": h.word,
                    "loc": h.positions,
                })
            })
            .collect();
        cols.insert(column.clone(), Value::Array(list));
    }
    Value::Object(cols)
}
