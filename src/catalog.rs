//! Catalog layer — table descriptors and schema resolution.
//!
//! The catalog holds one [`TableSchema`] per user table: primary key,
//! columns, secondary/search/trie index declarations, denormalized view
//! definitions, and ORM relationships. `resolve()` runs at connect time:
//! it validates cross-table references, computes the inverse view lists,
//! and rejects cyclic view-projection graphs (projection runs one hop per
//! write, so it converges only on a DAG).

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use serde_json::Value;

use crate::error::SiltError;
use crate::row::{KeyKind, Row};
use crate::tokenizer::TokenizeMode;

/// Declared type of a column. Values are semi-structured, so this is a
/// hint for defaults and describe output, not an enforcement gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Int,
    Float,
    Bool,
    String,
    Array,
    Object,
    Any,
}

impl ColumnKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnKind::Int => "int",
            ColumnKind::Float => "float",
            ColumnKind::Bool => "bool",
            ColumnKind::String => "string",
            ColumnKind::Array => "array",
            ColumnKind::Object => "object",
            ColumnKind::Any => "any",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ColumnSpec {
    pub name: String,
    pub kind: ColumnKind,
    pub default: Option<Value>,
}

/// What happens to projected columns when the referenced row disappears:
/// LIVE nulls them, GHOST keeps the last copied snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewMode {
    Live,
    Ghost,
}

/// A denormalized view: this table copies columns from a row of `source`,
/// located via the local `pk_column` value.
#[derive(Debug, Clone)]
pub struct ViewSpec {
    pub source: String,
    /// Local column holding the source row's primary key.
    pub pk_column: String,
    /// `(local_column, source_column)` pairs to copy.
    pub columns: Vec<(String, String)>,
    pub mode: ViewMode,
}

/// Whether a relationship column holds one pk or an array of pks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Single,
    Many,
}

/// A directed ORM edge: `this_table.this_column ↔ from_table.from_column`.
/// The synchronizer keeps both sides consistent per the arities.
#[derive(Debug, Clone)]
pub struct OrmRelation {
    pub this_column: String,
    pub this_arity: Arity,
    pub from_table: String,
    pub from_column: String,
    pub from_arity: Arity,
}

/// Full-text index declaration for one column.
#[derive(Debug, Clone)]
pub struct SearchSpec {
    /// Added to the relevance score of every row matched via this column.
    pub boost: f64,
    pub mode: TokenizeMode,
}

/// Descriptor for one user table.
#[derive(Debug, Clone)]
pub struct TableSchema {
    pub name: String,
    pub pk_column: String,
    pub pk_kind: KeyKind,
    pub columns: Vec<ColumnSpec>,
    pub secondary_indexes: BTreeSet<String>,
    pub search_indexes: BTreeMap<String, SearchSpec>,
    pub trie_columns: BTreeSet<String>,
    /// Views this table maintains locally (it copies columns *from* the
    /// view's source table).
    pub views: Vec<ViewSpec>,
    pub orm: Vec<OrmRelation>,
    /// Tables whose views project *from* this table. Filled by `resolve()`.
    pub viewed_by: Vec<String>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, pk_column: impl Into<String>, pk_kind: KeyKind) -> Self {
        let pk_column = pk_column.into();
        let pk_col_kind = match pk_kind {
            KeyKind::Int => ColumnKind::Int,
            KeyKind::Str => ColumnKind::String,
        };
        TableSchema {
            name: name.into(),
            pk_column: pk_column.clone(),
            pk_kind,
            columns: vec![ColumnSpec {
                name: pk_column,
                kind: pk_col_kind,
                default: None,
            }],
            secondary_indexes: BTreeSet::new(),
            search_indexes: BTreeMap::new(),
            trie_columns: BTreeSet::new(),
            views: Vec::new(),
            orm: Vec::new(),
            viewed_by: Vec::new(),
        }
    }

    pub fn column(mut self, name: impl Into<String>, kind: ColumnKind) -> Self {
        self.columns.push(ColumnSpec {
            name: name.into(),
            kind,
            default: None,
        });
        self
    }

    pub fn column_default(
        mut self,
        name: impl Into<String>,
        kind: ColumnKind,
        default: Value,
    ) -> Self {
        self.columns.push(ColumnSpec {
            name: name.into(),
            kind,
            default: Some(default),
        });
        self
    }

    /// Declare a secondary index on a column.
    pub fn index(mut self, column: impl Into<String>) -> Self {
        self.secondary_indexes.insert(column.into());
        self
    }

    /// Declare a full-text search index on a column.
    pub fn search(mut self, column: impl Into<String>, boost: f64, mode: TokenizeMode) -> Self {
        self.search_indexes
            .insert(column.into(), SearchSpec { boost, mode });
        self
    }

    /// Declare a trie (prefix) index on a column.
    pub fn trie(mut self, column: impl Into<String>) -> Self {
        self.trie_columns.insert(column.into());
        self
    }

    /// Declare a denormalized view copying columns from `source`.
    pub fn view(
        mut self,
        source: impl Into<String>,
        pk_column: impl Into<String>,
        columns: Vec<(String, String)>,
        mode: ViewMode,
    ) -> Self {
        self.views.push(ViewSpec {
            source: source.into(),
            pk_column: pk_column.into(),
            columns,
            mode,
        });
        self
    }

    /// Declare an ORM relationship edge.
    pub fn relation(
        mut self,
        this_column: impl Into<String>,
        this_arity: Arity,
        from_table: impl Into<String>,
        from_column: impl Into<String>,
        from_arity: Arity,
    ) -> Self {
        self.orm.push(OrmRelation {
            this_column: this_column.into(),
            this_arity,
            from_table: from_table.into(),
            from_column: from_column.into(),
            from_arity,
        });
        self
    }

    pub fn column_spec(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Fill declared defaults into a fresh row's missing columns.
    pub fn apply_defaults(&self, row: &mut Row) {
        for col in &self.columns {
            if let Some(default) = &col.default {
                row.entry(col.name.clone()).or_insert_with(|| default.clone());
            }
        }
    }

    pub fn relation_for(&self, column: &str) -> Option<&OrmRelation> {
        self.orm.iter().find(|r| r.this_column == column)
    }
}

/// All registered table descriptors.
#[derive(Debug, Default, Clone)]
pub struct Catalog {
    tables: BTreeMap<String, TableSchema>,
}

impl Catalog {
    pub fn register(&mut self, schema: TableSchema) {
        self.tables.insert(schema.name.clone(), schema);
    }

    pub fn get(&self, name: &str) -> Result<&TableSchema, SiltError> {
        self.tables
            .get(name)
            .ok_or_else(|| SiltError::TableNotFound(name.to_string()))
    }

    pub fn get_cloned(&self, name: &str) -> Result<TableSchema, SiltError> {
        self.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<TableSchema> {
        self.tables.remove(name)
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    pub fn schemas(&self) -> impl Iterator<Item = &TableSchema> {
        self.tables.values()
    }

    /// Validate cross-table references, compute inverse view lists, index
    /// every view's lookup column, and reject cyclic projection graphs.
    pub fn resolve(&mut self) -> Result<(), SiltError> {
        // Referential checks first, against an immutable snapshot.
        for schema in self.tables.values() {
            for view in &schema.views {
                if !self.tables.contains_key(&view.source) {
                    return Err(SiltError::TableNotFound(view.source.clone()));
                }
                if schema.column_spec(&view.pk_column).is_none() {
                    return Err(SiltError::UnknownColumn {
                        table: schema.name.clone(),
                        column: view.pk_column.clone(),
                    });
                }
            }
            for rel in &schema.orm {
                if !self.tables.contains_key(&rel.from_table) {
                    return Err(SiltError::TableNotFound(rel.from_table.clone()));
                }
            }
        }

        // Remote projection locates dependent rows through a secondary
        // index on the view's pk column, so that index must exist.
        let mut inverse: HashMap<String, Vec<String>> = HashMap::new();
        for (name, schema) in &mut self.tables {
            for view in &schema.views {
                inverse.entry(view.source.clone()).or_default().push(name.clone());
                schema.secondary_indexes.insert(view.pk_column.clone());
            }
        }
        for (name, schema) in &mut self.tables {
            let mut viewers = inverse.remove(name).unwrap_or_default();
            viewers.sort();
            viewers.dedup();
            schema.viewed_by = viewers;
        }

        self.check_projection_cycles()
    }

    /// Kahn's algorithm over projection edges (source → viewing table).
    /// Any nodes left after the peel are part of a cycle.
    fn check_projection_cycles(&self) -> Result<(), SiltError> {
        let mut out_edges: HashMap<&str, Vec<&str>> = HashMap::new();
        let mut in_degree: HashMap<&str, usize> = HashMap::new();
        for name in self.tables.keys() {
            in_degree.insert(name.as_str(), 0);
        }
        for (name, schema) in &self.tables {
            for view in &schema.views {
                out_edges
                    .entry(view.source.as_str())
                    .or_default()
                    .push(name.as_str());
                *in_degree.entry(name.as_str()).or_insert(0) += 1;
            }
        }

        let mut queue: VecDeque<&str> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(n, _)| *n)
            .collect();
        let mut visited = 0usize;
        while let Some(node) = queue.pop_front() {
            visited += 1;
            for next in out_edges.get(node).into_iter().flatten() {
                let d = in_degree.get_mut(next).expect("node registered");
                *d -= 1;
                if *d == 0 {
                    queue.push_back(next);
                }
            }
        }

        if visited == self.tables.len() {
            Ok(())
        } else {
            let mut cycle: Vec<String> = in_degree
                .iter()
                .filter(|(_, d)| **d > 0)
                .map(|(n, _)| n.to_string())
                .collect();
            cycle.sort();
            Err(SiltError::CycleDetected(cycle))
        }
    }

    /// Rows for `describe`: one per column, with index/search/trie flags.
    pub fn describe_rows(&self, table: &str) -> Result<Vec<Row>, SiltError> {
        let schema = self.get(table)?;
        let mut out = Vec::with_capacity(schema.columns.len());
        for col in &schema.columns {
            let mut row = Row::new();
            row.insert("column".into(), Value::String(col.name.clone()));
            row.insert("type".into(), Value::String(col.kind.as_str().into()));
            row.insert(
                "default".into(),
                col.default.clone().unwrap_or(Value::Null),
            );
            row.insert("pk".into(), Value::Bool(col.name == schema.pk_column));
            row.insert(
                "indexed".into(),
                Value::Bool(schema.secondary_indexes.contains(&col.name)),
            );
            row.insert(
                "search".into(),
                Value::Bool(schema.search_indexes.contains_key(&col.name)),
            );
            row.insert(
                "trie".into(),
                Value::Bool(schema.trie_columns.contains(&col.name)),
            );
            out.push(row);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> TableSchema {
        TableSchema::new("users", "id", KeyKind::Int).column("name", ColumnKind::String)
    }

    #[test]
    fn test_resolve_fills_inverse_view_list_and_indexes_lookup_column() {
        let mut catalog = Catalog::default();
        catalog.register(users());
        catalog.register(
            TableSchema::new("orders", "id", KeyKind::Int)
                .column("userId", ColumnKind::Int)
                .column("userName", ColumnKind::String)
                .view(
                    "users",
                    "userId",
                    vec![("userName".into(), "name".into())],
                    ViewMode::Live,
                ),
        );
        catalog.resolve().unwrap();
        assert_eq!(catalog.get("users").unwrap().viewed_by, vec!["orders"]);
        assert!(
            catalog
                .get("orders")
                .unwrap()
                .secondary_indexes
                .contains("userId")
        );
    }

    #[test]
    fn test_resolve_rejects_projection_cycle() {
        let mut catalog = Catalog::default();
        catalog.register(
            TableSchema::new("a", "id", KeyKind::Int)
                .column("bId", ColumnKind::Int)
                .column("bName", ColumnKind::String)
                .view("b", "bId", vec![("bName".into(), "name".into())], ViewMode::Live),
        );
        catalog.register(
            TableSchema::new("b", "id", KeyKind::Int)
                .column("aId", ColumnKind::Int)
                .column("aName", ColumnKind::String)
                .view("a", "aId", vec![("aName".into(), "name".into())], ViewMode::Live),
        );
        let err = catalog.resolve().unwrap_err();
        assert!(matches!(err, SiltError::CycleDetected(_)));
    }

    #[test]
    fn test_resolve_rejects_unknown_view_source() {
        let mut catalog = Catalog::default();
        catalog.register(
            TableSchema::new("orders", "id", KeyKind::Int)
                .column("userId", ColumnKind::Int)
                .view("ghosts", "userId", vec![], ViewMode::Live),
        );
        assert!(matches!(
            catalog.resolve(),
            Err(SiltError::TableNotFound(t)) if t == "ghosts"
        ));
    }

    #[test]
    fn test_apply_defaults_only_fills_missing() {
        let schema = TableSchema::new("t", "id", KeyKind::Int)
            .column_default("status", ColumnKind::String, Value::String("new".into()));
        let mut row = Row::new();
        row.insert("id".into(), Value::from(1));
        schema.apply_defaults(&mut row);
        assert_eq!(row["status"], Value::String("new".into()));

        let mut row2 = Row::new();
        row2.insert("status".into(), Value::String("done".into()));
        schema.apply_defaults(&mut row2);
        assert_eq!(row2["status"], Value::String("done".into()));
    }
}
