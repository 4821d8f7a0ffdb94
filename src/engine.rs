//! The engine: query dispatch, write fan-out, and the result cache.
//!
//! `Silt` owns the storage adapter, the catalog, the in-memory tries, the
//! function registry, and a per-table result cache keyed by query
//! fingerprint. It is the single context object every component receives
//! state through; there are no hidden globals.
//!
//! Control flow for a SELECT: cache probe → row selector → mutation stages
//! → cache store. For an UPSERT/DELETE: row selector (when WHERE is
//! present), then per row: local view projection, storage write/delete,
//! derived-index maintenance, ORM synchronization, remote view projection
//! — with the per-row steps chained in that order so the derived-state
//! invariants hold after every row.

use std::collections::HashMap;

use serde_json::Value;
use tracing::debug;

use crate::adapter::StorageAdapter;
use crate::catalog::{Catalog, TableSchema};
use crate::config::EngineConfig;
use crate::error::SiltError;
use crate::exec::operators::{group_by, having, join, order_by, orm_expand, project};
use crate::exec::selector::{self, SelectCtx};
use crate::functions::FunctionRegistry;
use crate::hash::fingerprint;
use crate::index::{self, IndexWriter};
use crate::orm;
use crate::predicate::{self, EvalCtx};
use crate::query::{Action, Query, TableRef, WhereClause};
use crate::row::{self, Key, Row};
use crate::tokenizer::Tokenizers;
use crate::trie::TrieIndex;
use crate::view;

/// Comment tag on writes issued by the ORM synchronizer; suppresses
/// another round of synchronization.
pub const ORM_SKIP_COMMENT: &str = "_orm_skip";

/// Comment tag forcing full re-tokenization, bypassing the content-hash
/// skip. Recovery path for drifted search indexes.
pub const REBUILD_SEARCH_COMMENT: &str = "_rebuild_search_index";

/// Result envelope for writes.
#[derive(Debug, Clone)]
pub struct WriteSummary {
    pub msg: String,
    pub affected_row_pks: Vec<Key>,
    pub affected_rows: Vec<Row>,
}

/// What a query evaluates to.
#[derive(Debug, Clone)]
pub enum QueryResult {
    Rows(Vec<Row>),
    Write(WriteSummary),
    Tables(Vec<String>),
}

impl QueryResult {
    /// The row list, empty for non-row results.
    pub fn rows(self) -> Vec<Row> {
        match self {
            QueryResult::Rows(rows) => rows,
            _ => Vec::new(),
        }
    }

    pub fn write(self) -> Option<WriteSummary> {
        match self {
            QueryResult::Write(w) => Some(w),
            _ => None,
        }
    }
}

/// The embedded database engine.
pub struct Silt {
    adapter: Box<dyn StorageAdapter>,
    catalog: Catalog,
    config: EngineConfig,
    functions: FunctionRegistry,
    tokenizers: Tokenizers,
    tries: HashMap<(String, String), TrieIndex>,
    /// table → fingerprint → frozen result rows.
    cache: HashMap<String, HashMap<u64, Vec<Row>>>,
    connected: bool,
}

impl Silt {
    pub fn new(adapter: Box<dyn StorageAdapter>) -> Self {
        Silt::with_config(adapter, EngineConfig::default())
    }

    pub fn with_config(adapter: Box<dyn StorageAdapter>, config: EngineConfig) -> Self {
        Silt {
            adapter,
            catalog: Catalog::default(),
            config,
            functions: FunctionRegistry::with_builtins(),
            tokenizers: Tokenizers::default(),
            tries: HashMap::new(),
            cache: HashMap::new(),
            connected: false,
        }
    }

    /// Register a table schema. Must precede `connect`.
    pub fn register(&mut self, schema: TableSchema) {
        self.catalog.register(schema);
    }

    pub fn functions_mut(&mut self) -> &mut FunctionRegistry {
        &mut self.functions
    }

    pub fn set_tokenizers(&mut self, tokenizers: Tokenizers) {
        self.tokenizers = tokenizers;
    }

    /// Direct adapter access, for invariant checks and tooling.
    pub fn adapter(&self) -> &dyn StorageAdapter {
        self.adapter.as_ref()
    }

    /// Resolve the catalog, create all tables (including the reserved
    /// derived-index tables), and rebuild the in-memory tries.
    pub fn connect(&mut self) -> Result<(), SiltError> {
        self.adapter.connect()?;
        self.catalog.resolve()?;
        for schema in self.catalog.schemas() {
            self.adapter
                .make_table(&schema.name, &schema.pk_column, schema.pk_kind)?;
        }
        let schemas: Vec<TableSchema> = self.catalog.schemas().cloned().collect();
        for schema in &schemas {
            index::make_index_tables(self.adapter.as_mut(), schema)?;
        }
        self.rebuild_tries(&schemas)?;
        self.connected = true;
        debug!(tables = schemas.len(), "engine connected");
        Ok(())
    }

    fn rebuild_tries(&mut self, schemas: &[TableSchema]) -> Result<(), SiltError> {
        self.tries.clear();
        for schema in schemas {
            for column in &schema.trie_columns {
                let mut trie = TrieIndex::new();
                let count = self.adapter.table_count(&schema.name)? as usize;
                for r in self.adapter.offset_read(&schema.name, 0, count)? {
                    if let Value::String(s) = row::path_value(&r, column, false)
                        && let Some(pk) =
                            Key::from_value(&row::path_value(&r, &schema.pk_column, false))
                    {
                        trie.insert(&s, pk);
                    }
                }
                self.tries.insert((schema.name.clone(), column.clone()), trie);
            }
        }
        Ok(())
    }

    pub fn disconnect(&mut self) -> Result<(), SiltError> {
        self.connected = false;
        self.adapter.disconnect()
    }

    /// Tear down all storage and state.
    pub fn destroy(&mut self) -> Result<(), SiltError> {
        self.cache.clear();
        self.tries.clear();
        self.connected = false;
        self.adapter.destroy()
    }

    /// Execute one query descriptor.
    pub fn execute(&mut self, q: Query) -> Result<QueryResult, SiltError> {
        if !self.connected {
            return Err(SiltError::NotConnected);
        }
        validate(&q)?;
        debug!(action = q.action.as_str(), "dispatching query");

        if let TableRef::Rows(_) = &q.table {
            return self.execute_instance(q);
        }

        match q.action {
            Action::Select => self.exec_select(q),
            Action::Upsert => self.exec_upsert(q),
            Action::Delete => self.exec_delete(q),
            Action::Drop => self.exec_drop(q),
            Action::ShowTables => Ok(QueryResult::Tables(self.catalog.table_names())),
            Action::Describe => {
                let table = table_name(&q)?;
                Ok(QueryResult::Rows(self.catalog.describe_rows(&table)?))
            }
        }
    }

    // ── SELECT ───────────────────────────────────────────────────────────

    fn exec_select(&mut self, q: Query) -> Result<QueryResult, SiltError> {
        let table = table_name(&q)?;
        let cacheable = self.cacheable(&q);
        let fp = fingerprint(&q);

        if cacheable
            && let Some(rows) = self.cache.get(&table).and_then(|c| c.get(&fp))
        {
            debug!(table = %table, fingerprint = fp, "result cache hit");
            return Ok(QueryResult::Rows(rows.clone()));
        }

        let rows = self.compute_select(&q)?;
        if cacheable {
            self.cache
                .entry(table)
                .or_default()
                .insert(fp, rows.clone());
        }
        Ok(QueryResult::Rows(rows))
    }

    fn cacheable(&self, q: &Query) -> bool {
        self.config.cache_enabled
            && q.join.is_none()
            && q.orm.is_empty()
            && matches!(q.table, TableRef::Name(_))
            && !matches!(q.where_clause, Some(WhereClause::Func(_)))
            && !matches!(q.having, Some(WhereClause::Func(_)))
    }

    fn compute_select(&self, q: &Query) -> Result<Vec<Row>, SiltError> {
        let table = table_name(q)?;
        let schema = self.catalog.get(&table)?;
        let joined = q.join.is_some();

        let mut rows = if let Some(spec) = &q.join {
            let mut rows = join::apply(self.adapter.as_ref(), &self.catalog, &table, spec)?;
            // WHERE and range alongside a join run post-join.
            if let Some(clause) = &q.where_clause {
                let sets = predicate::SearchSets::new();
                let ctx = EvalCtx {
                    ignore_first_path: true,
                    pk_column: &schema.pk_column,
                    search_sets: Some(&sets),
                };
                let mut kept = Vec::new();
                for (i, r) in rows.into_iter().enumerate() {
                    if predicate::matches(&ctx, clause, &r, i)? {
                        kept.push(r);
                    }
                }
                rows = kept;
            }
            if let Some((limit, offset)) = q.range {
                rows = positional_range(rows, limit, offset);
            }
            rows
        } else {
            let ctx = SelectCtx {
                adapter: self.adapter.as_ref(),
                catalog: &self.catalog,
                tries: &self.tries,
                tokenizers: &self.tokenizers,
                config: &self.config,
            };
            selector::select_rows(&ctx, q)?
        };

        let buckets = if q.group_by.is_empty() {
            None
        } else {
            let grouped = group_by::apply(rows, &q.group_by, joined);
            rows = grouped.rows;
            Some(grouped.buckets)
        };

        if !q.orm.is_empty() {
            orm_expand::apply(
                self.adapter.as_ref(),
                &self.catalog,
                schema,
                &self.config,
                &q.orm,
                &mut rows,
            )?;
        }

        let mut rows = project::apply(
            &self.functions,
            &q.select_args,
            rows,
            buckets.as_deref(),
            joined,
        )?;

        if let Some(clause) = &q.having {
            rows = having::apply(clause, &schema.pk_column, joined, rows)?;
        }

        order_by::sort(&mut rows, &q.order_by, joined);

        if let Some(offset) = q.offset {
            rows.drain(..offset.min(rows.len()));
        }
        if let Some(limit) = q.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    // ── UPSERT ───────────────────────────────────────────────────────────

    fn exec_upsert(&mut self, q: Query) -> Result<QueryResult, SiltError> {
        let table = table_name(&q)?;
        let schema = self.catalog.get_cloned(&table)?;
        let partial = q
            .upsert_row
            .clone()
            .ok_or_else(|| SiltError::InvalidQuery("upsert requires a row".into()))?;

        let mut pks = Vec::new();
        let mut rows = Vec::new();

        if q.where_clause.is_some() || q.range.is_some() || q.trie.is_some() {
            // Update every matching row.
            let ctx = SelectCtx {
                adapter: self.adapter.as_ref(),
                catalog: &self.catalog,
                tries: &self.tries,
                tokenizers: &self.tokenizers,
                config: &self.config,
            };
            let targets = selector::select_rows(&ctx, &q)?;
            let target_pks: Vec<Key> = targets
                .iter()
                .filter_map(|r| Key::from_value(&row::path_value(r, &schema.pk_column, false)))
                .collect();
            for pk in target_pks {
                let (pk, stored) = self.write_row(&table, partial.clone(), Some(pk), &q.comments)?;
                pks.push(pk);
                rows.push(stored);
            }
        } else {
            let supplied_pk = partial
                .get(&schema.pk_column)
                .and_then(Key::from_value);
            let (pk, stored) = self.write_row(&table, partial, supplied_pk, &q.comments)?;
            pks.push(pk);
            rows.push(stored);
        }

        Ok(QueryResult::Write(WriteSummary {
            msg: format!("{} row(s) upserted", rows.len()),
            affected_row_pks: pks,
            affected_rows: rows,
        }))
    }

    /// Write one row and fan out to everything derived from it, in order:
    /// local view projection, storage write, index maintenance, ORM
    /// synchronization, remote view projection. The pre-write lookup runs
    /// only when the caller supplied a pk — adapter-assigned keys cannot
    /// have prior state.
    fn write_row(
        &mut self,
        table: &str,
        partial: Row,
        supplied_pk: Option<Key>,
        comments: &[String],
    ) -> Result<(Key, Row), SiltError> {
        let schema = self.catalog.get_cloned(table)?;
        let old = match &supplied_pk {
            Some(pk) => self.adapter.read(table, pk)?,
            None => None,
        };

        let mut merged = old.clone().unwrap_or_default();
        row::merge_shallow(&mut merged, &partial);
        if old.is_none() {
            schema.apply_defaults(&mut merged);
        }

        view::project_local(self.adapter.as_ref(), &schema, old.as_ref(), &mut merged)?;

        let stored = self.adapter.write(table, supplied_pk, merged)?;
        let pk = Key::from_value(&row::path_value(&stored, &schema.pk_column, false))
            .ok_or_else(|| SiltError::InternalError("write returned a row without a key".into()))?;

        let rebuild = comments.iter().any(|c| c == REBUILD_SEARCH_COMMENT);
        {
            let mut writer = IndexWriter {
                adapter: self.adapter.as_mut(),
                tries: &mut self.tries,
                tokenizers: &self.tokenizers,
            };
            writer.on_write(&schema, &pk, old.as_ref(), &stored, rebuild)?;
        }
        self.cache.remove(table);

        if !comments.iter().any(|c| c == ORM_SKIP_COMMENT) {
            let patches =
                orm::plan_sync_on_write(self.adapter.as_ref(), &schema, &pk, old.as_ref(), &stored)?;
            for patch in patches {
                self.write_row(
                    &patch.table,
                    patch.partial,
                    Some(patch.pk),
                    &[ORM_SKIP_COMMENT.to_string()],
                )?;
            }
        }

        let updates =
            view::plan_remote(self.adapter.as_ref(), &self.catalog, &schema, &pk, Some(&stored))?;
        for update in updates {
            self.write_row(&update.table, update.partial, Some(update.pk), comments)?;
        }

        Ok((pk, stored))
    }

    // ── DELETE ───────────────────────────────────────────────────────────

    fn exec_delete(&mut self, q: Query) -> Result<QueryResult, SiltError> {
        let table = table_name(&q)?;
        let schema = self.catalog.get_cloned(&table)?;

        let targets = if q.where_clause.is_some() || q.range.is_some() || q.trie.is_some() {
            let ctx = SelectCtx {
                adapter: self.adapter.as_ref(),
                catalog: &self.catalog,
                tries: &self.tries,
                tokenizers: &self.tokenizers,
                config: &self.config,
            };
            selector::select_rows(&ctx, &q)?
        } else {
            let count = self.adapter.table_count(&table)? as usize;
            self.adapter.offset_read(&table, 0, count)?
        };

        let mut pks = Vec::new();
        for r in &targets {
            let Some(pk) = Key::from_value(&row::path_value(r, &schema.pk_column, false)) else {
                continue;
            };
            self.delete_row(&schema, &pk, r, &q.comments)?;
            pks.push(pk);
        }
        self.cache.remove(&table);

        Ok(QueryResult::Write(WriteSummary {
            msg: format!("{} row(s) deleted", pks.len()),
            affected_row_pks: pks,
            affected_rows: targets,
        }))
    }

    fn delete_row(
        &mut self,
        schema: &TableSchema,
        pk: &Key,
        old: &Row,
        comments: &[String],
    ) -> Result<(), SiltError> {
        {
            let mut writer = IndexWriter {
                adapter: self.adapter.as_mut(),
                tries: &mut self.tries,
                tokenizers: &self.tokenizers,
            };
            writer.on_delete(schema, pk, old)?;
        }
        self.adapter.delete(&schema.name, pk)?;
        self.cache.remove(&schema.name);

        if !comments.iter().any(|c| c == ORM_SKIP_COMMENT) {
            let patches = orm::plan_sync_on_delete(self.adapter.as_ref(), schema, pk, old)?;
            for patch in patches {
                self.write_row(
                    &patch.table,
                    patch.partial,
                    Some(patch.pk),
                    &[ORM_SKIP_COMMENT.to_string()],
                )?;
            }
        }

        let updates =
            view::plan_remote(self.adapter.as_ref(), &self.catalog, schema, pk, None)?;
        for update in updates {
            self.write_row(&update.table, update.partial, Some(update.pk), comments)?;
        }
        Ok(())
    }

    // ── DROP / recovery ──────────────────────────────────────────────────

    fn exec_drop(&mut self, q: Query) -> Result<QueryResult, SiltError> {
        let table = table_name(&q)?;
        let schema = self.catalog.get_cloned(&table)?;
        self.adapter.drop_table(&table)?;
        for index_table in index::index_tables_of(&schema) {
            self.adapter.drop_table(&index_table)?;
        }
        for column in &schema.trie_columns {
            self.tries.remove(&(table.clone(), column.clone()));
        }
        self.cache.remove(&table);
        Ok(QueryResult::Write(WriteSummary {
            msg: format!("table {table} dropped"),
            affected_row_pks: Vec::new(),
            affected_rows: Vec::new(),
        }))
    }

    /// Re-tokenize every row of a table, bypassing the content-hash skip.
    /// Recovery for drifted search indexes.
    pub fn rebuild_search_index(&mut self, table: &str) -> Result<(), SiltError> {
        let schema = self.catalog.get_cloned(table)?;
        let count = self.adapter.table_count(table)? as usize;
        let rows = self.adapter.offset_read(table, 0, count)?;
        for r in rows {
            let Some(pk) = Key::from_value(&row::path_value(&r, &schema.pk_column, false)) else {
                continue;
            };
            let mut writer = IndexWriter {
                adapter: self.adapter.as_mut(),
                tries: &mut self.tries,
                tokenizers: &self.tokenizers,
            };
            writer.on_write(&schema, &pk, Some(&r), &r, true)?;
        }
        self.cache.remove(table);
        Ok(())
    }

    // ── Instance tables ──────────────────────────────────────────────────

    /// Ad-hoc row lists: WHERE/range-only SELECT, shallow-merge UPSERT,
    /// filtering DELETE, empty DROP — all in memory, never cached.
    fn execute_instance(&mut self, q: Query) -> Result<QueryResult, SiltError> {
        let TableRef::Rows(rows) = q.table.clone() else {
            return Err(SiltError::InternalError("instance path without rows".into()));
        };
        let eval = EvalCtx::plain("id");

        match q.action {
            Action::Select => {
                let mut out = Vec::new();
                for (i, r) in rows.into_iter().enumerate() {
                    let keep = match &q.where_clause {
                        Some(clause) => predicate::matches(&eval, clause, &r, i)?,
                        None => true,
                    };
                    if keep {
                        out.push(r);
                    }
                }
                if let Some((limit, offset)) = q.range {
                    out = positional_range(out, limit, offset);
                }
                Ok(QueryResult::Rows(out))
            }
            Action::Upsert => {
                let patch = q
                    .upsert_row
                    .clone()
                    .ok_or_else(|| SiltError::InvalidQuery("upsert requires a row".into()))?;
                let mut out = Vec::with_capacity(rows.len());
                for (i, mut r) in rows.into_iter().enumerate() {
                    let hit = match &q.where_clause {
                        Some(clause) => predicate::matches(&eval, clause, &r, i)?,
                        None => true,
                    };
                    if hit {
                        row::merge_shallow(&mut r, &patch);
                    }
                    out.push(r);
                }
                Ok(QueryResult::Rows(out))
            }
            Action::Delete => {
                let mut out = Vec::new();
                for (i, r) in rows.into_iter().enumerate() {
                    let hit = match &q.where_clause {
                        Some(clause) => predicate::matches(&eval, clause, &r, i)?,
                        None => true,
                    };
                    if !hit {
                        out.push(r);
                    }
                }
                Ok(QueryResult::Rows(out))
            }
            Action::Drop => Ok(QueryResult::Rows(Vec::new())),
            _ => Err(SiltError::InstanceTableUnsupported("this action")),
        }
    }
}

fn table_name(q: &Query) -> Result<String, SiltError> {
    q.table
        .name()
        .map(str::to_string)
        .ok_or_else(|| SiltError::InternalError("named-table path got an instance table".into()))
}

/// `(limit, offset)` slice over an in-memory row list; negative limit
/// counts from the end.
fn positional_range(rows: Vec<Row>, limit: i64, offset: usize) -> Vec<Row> {
    if limit == 0 {
        return Vec::new();
    }
    if limit > 0 {
        return rows
            .into_iter()
            .skip(offset)
            .take(limit as usize)
            .collect();
    }
    let take = limit.unsigned_abs() as usize;
    let end = rows.len().saturating_sub(offset);
    let start = end.saturating_sub(take);
    rows.into_iter().take(end).skip(start).collect()
}

/// Reject query shapes the engine cannot execute: join+orm together, more
/// than one of {where, range, trie}, and named-table-only clauses on
/// instance tables.
fn validate(q: &Query) -> Result<(), SiltError> {
    if q.join.is_some() && !q.orm.is_empty() {
        return Err(SiltError::InvalidQuery(
            "join and orm cannot be combined in one query".into(),
        ));
    }
    let clause_count = [
        q.where_clause.is_some(),
        q.range.is_some(),
        q.trie.is_some(),
    ]
    .iter()
    .filter(|b| **b)
    .count();
    if clause_count > 1 && q.join.is_none() {
        return Err(SiltError::InvalidQuery(
            "only one of where, range, and trie may be used".into(),
        ));
    }

    if let TableRef::Rows(_) = &q.table {
        if q.join.is_some() {
            return Err(SiltError::InstanceTableUnsupported("join"));
        }
        if !q.orm.is_empty() {
            return Err(SiltError::InstanceTableUnsupported("orm"));
        }
        if q.trie.is_some() {
            return Err(SiltError::InstanceTableUnsupported("trie"));
        }
        if let Some(clause) = &q.where_clause
            && clause.leaves().iter().any(|l| l.search_columns().is_some())
        {
            return Err(SiltError::InstanceTableUnsupported("search"));
        }
    }
    Ok(())
}
