//! The structured query descriptor.
//!
//! Queries arrive pre-structured (there is no SQL parser): a descriptor
//! names the action, the target table (or an ad-hoc instance row list), and
//! the clauses. Builder methods keep test and embedding code terse.
//!
//! The WHERE tree is either a single leaf `(path, cmp, value)` or a flat
//! list of leaves joined by `AND`/`OR` connectives, evaluated left to right.
//! A caller-supplied closure may replace the tree entirely.

use std::fmt;
use std::sync::Arc;

use serde_json::{Value, json};

use crate::row::Row;

/// What a query does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Select,
    Upsert,
    Delete,
    Drop,
    ShowTables,
    Describe,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Select => "select",
            Action::Upsert => "upsert",
            Action::Delete => "delete",
            Action::Drop => "drop",
            Action::ShowTables => "show tables",
            Action::Describe => "describe",
        }
    }
}

/// The query target: a registered table, or a literal row list
/// ("instance table") that is filtered in memory.
#[derive(Debug, Clone)]
pub enum TableRef {
    Name(String),
    Rows(Vec<Row>),
}

impl TableRef {
    pub fn name(&self) -> Option<&str> {
        match self {
            TableRef::Name(n) => Some(n),
            TableRef::Rows(_) => None,
        }
    }
}

/// Comparison operators for WHERE/HAVING leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cmp {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    In,
    NotIn,
    Regex,
    Like,
    NotLike,
    Between,
    Have,
    NotHave,
    Intersect,
    NotIntersect,
}

impl Cmp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Cmp::Eq => "=",
            Cmp::Neq => "!=",
            Cmp::Lt => "<",
            Cmp::Lte => "<=",
            Cmp::Gt => ">",
            Cmp::Gte => ">=",
            Cmp::In => "IN",
            Cmp::NotIn => "NOT IN",
            Cmp::Regex => "REGEX",
            Cmp::Like => "LIKE",
            Cmp::NotLike => "NOT LIKE",
            Cmp::Between => "BETWEEN",
            Cmp::Have => "HAVE",
            Cmp::NotHave => "NOT HAVE",
            Cmp::Intersect => "INTERSECT",
            Cmp::NotIntersect => "NOT INTERSECT",
        }
    }

    pub fn parse(s: &str) -> Option<Cmp> {
        Some(match s {
            "=" => Cmp::Eq,
            "!=" => Cmp::Neq,
            "<" => Cmp::Lt,
            "<=" => Cmp::Lte,
            ">" => Cmp::Gt,
            ">=" => Cmp::Gte,
            "IN" => Cmp::In,
            "NOT IN" => Cmp::NotIn,
            "REGEX" => Cmp::Regex,
            "LIKE" => Cmp::Like,
            "NOT LIKE" => Cmp::NotLike,
            "BETWEEN" => Cmp::Between,
            "HAVE" => Cmp::Have,
            "NOT HAVE" => Cmp::NotHave,
            "INTERSECT" => Cmp::Intersect,
            "NOT INTERSECT" => Cmp::NotIntersect,
            _ => return None,
        })
    }
}

/// Logical connective between adjacent leaves in a WHERE list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connective {
    And,
    Or,
}

/// One WHERE/HAVING condition: `path cmp value`.
///
/// `path` may be dotted (`a.b.c`), end in `.length`, or take the form
/// `search(col1,col2)` to match against the full-text index.
#[derive(Debug, Clone)]
pub struct WhereLeaf {
    pub path: String,
    pub cmp: Cmp,
    pub value: Value,
}

impl WhereLeaf {
    pub fn new(path: impl Into<String>, cmp: Cmp, value: Value) -> Self {
        WhereLeaf {
            path: path.into(),
            cmp,
            value,
        }
    }

    /// The column list of a `search(col1,col2,…)` path, or `None` for a
    /// plain column path.
    pub fn search_columns(&self) -> Option<Vec<String>> {
        let inner = self
            .path
            .strip_prefix("search(")
            .and_then(|rest| rest.strip_suffix(')'))?;
        Some(
            inner
                .split(',')
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect(),
        )
    }

    /// Identity of this leaf for the search side cache.
    pub fn cache_key(&self) -> String {
        format!("{}\u{1E}{}\u{1E}{}", self.path, self.cmp.as_str(), self.value)
    }
}

/// A caller-supplied row predicate. Queries carrying one are never cached.
pub type RowPredicate = Arc<dyn Fn(&Row, usize) -> bool + Send + Sync>;

/// A WHERE/HAVING tree: one leaf, a flat connective list, or a closure.
#[derive(Clone)]
pub enum WhereClause {
    Leaf(WhereLeaf),
    List {
        first: WhereLeaf,
        rest: Vec<(Connective, WhereLeaf)>,
    },
    Func(RowPredicate),
}

impl WhereClause {
    pub fn leaf(path: impl Into<String>, cmp: Cmp, value: Value) -> Self {
        WhereClause::Leaf(WhereLeaf::new(path, cmp, value))
    }

    pub fn func(f: impl Fn(&Row, usize) -> bool + Send + Sync + 'static) -> Self {
        WhereClause::Func(Arc::new(f))
    }

    /// Extend with `AND leaf`, converting a single leaf into a list.
    pub fn and(self, path: impl Into<String>, cmp: Cmp, value: Value) -> Self {
        self.extend(Connective::And, WhereLeaf::new(path, cmp, value))
    }

    /// Extend with `OR leaf`, converting a single leaf into a list.
    pub fn or(self, path: impl Into<String>, cmp: Cmp, value: Value) -> Self {
        self.extend(Connective::Or, WhereLeaf::new(path, cmp, value))
    }

    fn extend(self, conn: Connective, leaf: WhereLeaf) -> Self {
        match self {
            WhereClause::Leaf(first) => WhereClause::List {
                first,
                rest: vec![(conn, leaf)],
            },
            WhereClause::List { first, mut rest } => {
                rest.push((conn, leaf));
                WhereClause::List { first, rest }
            }
            WhereClause::Func(_) => panic!("cannot extend a function predicate"),
        }
    }

    /// All leaves, in order. Empty for a function predicate.
    pub fn leaves(&self) -> Vec<&WhereLeaf> {
        match self {
            WhereClause::Leaf(l) => vec![l],
            WhereClause::List { first, rest } => {
                let mut out = vec![first];
                out.extend(rest.iter().map(|(_, l)| l));
                out
            }
            WhereClause::Func(_) => vec![],
        }
    }

    fn to_canonical_value(&self) -> Value {
        match self {
            WhereClause::Leaf(l) => json!([l.path, l.cmp.as_str(), l.value]),
            WhereClause::List { first, rest } => {
                let mut items = vec![json!([first.path, first.cmp.as_str(), first.value])];
                for (conn, l) in rest {
                    items.push(json!(match conn {
                        Connective::And => "AND",
                        Connective::Or => "OR",
                    }));
                    items.push(json!([l.path, l.cmp.as_str(), l.value]));
                }
                Value::Array(items)
            }
            WhereClause::Func(_) => json!("<fn>"),
        }
    }
}

impl fmt::Debug for WhereClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WhereClause::Leaf(l) => f.debug_tuple("Leaf").field(l).finish(),
            WhereClause::List { first, rest } => f
                .debug_struct("List")
                .field("first", first)
                .field("rest", rest)
                .finish(),
            WhereClause::Func(_) => f.write_str("Func(<closure>)"),
        }
    }
}

/// Join kinds. `Right` swaps the scan order; `Outer` pads both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Left,
    Inner,
    Right,
    Outer,
    Cross,
}

impl JoinKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JoinKind::Left => "left",
            JoinKind::Inner => "inner",
            JoinKind::Right => "right",
            JoinKind::Outer => "outer",
            JoinKind::Cross => "cross",
        }
    }
}

/// Join predicate: `left_path cmp right_path` (both sides are paths).
#[derive(Debug, Clone)]
pub struct JoinOn {
    pub left: String,
    pub cmp: Cmp,
    pub right: String,
}

#[derive(Debug, Clone)]
pub struct JoinSpec {
    pub kind: JoinKind,
    pub table: String,
    pub on: Option<JoinOn>,
}

/// Prefix lookup against a trie-indexed column.
#[derive(Debug, Clone)]
pub struct TrieSpec {
    pub column: String,
    pub search: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Asc => "asc",
            Direction::Desc => "desc",
        }
    }
}

/// Per-row relationship expansion: resolve `row[key]` against the related
/// table and run a sub-select with these clauses.
#[derive(Debug, Clone)]
pub struct OrmSpec {
    pub key: String,
    pub select: Option<Vec<String>>,
    pub where_clause: Option<WhereClause>,
    /// Rows per expansion; `None` falls back to the engine default.
    pub limit: Option<usize>,
    pub offset: usize,
    pub order_by: Vec<(String, Direction)>,
    pub group_by: Vec<(String, Direction)>,
}

impl OrmSpec {
    pub fn key(key: impl Into<String>) -> Self {
        OrmSpec {
            key: key.into(),
            select: None,
            where_clause: None,
            limit: None,
            offset: 0,
            order_by: Vec::new(),
            group_by: Vec::new(),
        }
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn order_by(mut self, col: impl Into<String>, dir: Direction) -> Self {
        self.order_by.push((col.into(), dir));
        self
    }
}

/// The query descriptor. Built with the methods below; executed by the
/// engine's dispatcher.
#[derive(Debug, Clone)]
pub struct Query {
    pub action: Action,
    pub table: TableRef,
    /// Column/function expressions for SELECT. Empty means all columns.
    pub select_args: Vec<String>,
    /// The row (possibly partial) for UPSERT.
    pub upsert_row: Option<Row>,
    pub where_clause: Option<WhereClause>,
    /// `(limit, offset)` over primary-key order. Negative limit reads from
    /// the end of the table.
    pub range: Option<(i64, usize)>,
    pub trie: Option<TrieSpec>,
    pub join: Option<JoinSpec>,
    pub group_by: Vec<(String, Direction)>,
    pub order_by: Vec<(String, Direction)>,
    pub having: Option<WhereClause>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
    pub orm: Vec<OrmSpec>,
    /// Engine-reserved markers: `_orm_skip`, `_rebuild_search_index`.
    pub comments: Vec<String>,
    /// Transient caller id; cleared before fingerprinting.
    pub query_id: Option<String>,
}

impl Query {
    fn new(action: Action, table: TableRef) -> Self {
        Query {
            action,
            table,
            select_args: Vec::new(),
            upsert_row: None,
            where_clause: None,
            range: None,
            trie: None,
            join: None,
            group_by: Vec::new(),
            order_by: Vec::new(),
            having: None,
            offset: None,
            limit: None,
            orm: Vec::new(),
            comments: Vec::new(),
            query_id: None,
        }
    }

    pub fn select(table: impl Into<String>) -> Self {
        Query::new(Action::Select, TableRef::Name(table.into()))
    }

    pub fn select_rows(rows: Vec<Row>) -> Self {
        Query::new(Action::Select, TableRef::Rows(rows))
    }

    pub fn upsert(table: impl Into<String>, row: Row) -> Self {
        let mut q = Query::new(Action::Upsert, TableRef::Name(table.into()));
        q.upsert_row = Some(row);
        q
    }

    pub fn delete(table: impl Into<String>) -> Self {
        Query::new(Action::Delete, TableRef::Name(table.into()))
    }

    pub fn drop(table: impl Into<String>) -> Self {
        Query::new(Action::Drop, TableRef::Name(table.into()))
    }

    pub fn show_tables() -> Self {
        Query::new(Action::ShowTables, TableRef::Name(String::new()))
    }

    pub fn describe(table: impl Into<String>) -> Self {
        Query::new(Action::Describe, TableRef::Name(table.into()))
    }

    // ── Chainable clauses ────────────────────────────────────────────────

    pub fn columns<I, S>(mut self, cols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select_args = cols.into_iter().map(Into::into).collect();
        self
    }

    pub fn filter(mut self, clause: WhereClause) -> Self {
        self.where_clause = Some(clause);
        self
    }

    pub fn range(mut self, limit: i64, offset: usize) -> Self {
        self.range = Some((limit, offset));
        self
    }

    pub fn trie(mut self, column: impl Into<String>, search: impl Into<String>) -> Self {
        self.trie = Some(TrieSpec {
            column: column.into(),
            search: search.into(),
        });
        self
    }

    pub fn join(mut self, kind: JoinKind, table: impl Into<String>, on: Option<JoinOn>) -> Self {
        self.join = Some(JoinSpec {
            kind,
            table: table.into(),
            on,
        });
        self
    }

    pub fn group_by(mut self, col: impl Into<String>, dir: Direction) -> Self {
        self.group_by.push((col.into(), dir));
        self
    }

    pub fn order_by(mut self, col: impl Into<String>, dir: Direction) -> Self {
        self.order_by.push((col.into(), dir));
        self
    }

    pub fn having(mut self, clause: WhereClause) -> Self {
        self.having = Some(clause);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn orm(mut self, spec: OrmSpec) -> Self {
        self.orm.push(spec);
        self
    }

    pub fn comment(mut self, c: impl Into<String>) -> Self {
        self.comments.push(c.into());
        self
    }

    pub fn with_query_id(mut self, id: impl Into<String>) -> Self {
        self.query_id = Some(id.into());
        self
    }

    pub fn has_comment(&self, c: &str) -> bool {
        self.comments.iter().any(|x| x == c)
    }

    /// The descriptor as a JSON value with transient fields (`query_id`)
    /// cleared. Input to the cache fingerprint.
    pub fn to_canonical_value(&self) -> Value {
        json!({
            "action": self.action.as_str(),
            "table": match &self.table {
                TableRef::Name(n) => json!(n),
                TableRef::Rows(_) => json!("<instance>"),
            },
            "select": self.select_args,
            "row": self.upsert_row.clone().map(Value::Object),
            "where": self.where_clause.as_ref().map(|w| w.to_canonical_value()),
            "range": self.range.map(|(l, o)| json!([l, o])),
            "trie": self.trie.as_ref().map(|t| json!([t.column, t.search])),
            "join": self.join.as_ref().map(|j| {
                json!([
                    j.kind.as_str(),
                    j.table,
                    j.on.as_ref().map(|on| json!([on.left, on.cmp.as_str(), on.right])),
                ])
            }),
            "groupBy": dirs_to_value(&self.group_by),
            "orderBy": dirs_to_value(&self.order_by),
            "having": self.having.as_ref().map(|w| w.to_canonical_value()),
            "offset": self.offset,
            "limit": self.limit,
            "orm": self.orm.iter().map(orm_to_value).collect::<Vec<_>>(),
            "comments": self.comments,
        })
    }
}

fn dirs_to_value(dirs: &[(String, Direction)]) -> Value {
    Value::Array(
        dirs.iter()
            .map(|(c, d)| json!([c, d.as_str()]))
            .collect(),
    )
}

fn orm_to_value(spec: &OrmSpec) -> Value {
    json!({
        "key": spec.key,
        "select": spec.select,
        "where": spec.where_clause.as_ref().map(|w| w.to_canonical_value()),
        "limit": spec.limit,
        "offset": spec.offset,
        "orderBy": dirs_to_value(&spec.order_by),
        "groupBy": dirs_to_value(&spec.group_by),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_columns_parsing() {
        let leaf = WhereLeaf::new("search(title, body)", Cmp::Eq, json!("fox"));
        assert_eq!(
            leaf.search_columns(),
            Some(vec!["title".to_string(), "body".to_string()])
        );
        let plain = WhereLeaf::new("title", Cmp::Eq, json!("fox"));
        assert_eq!(plain.search_columns(), None);
    }

    #[test]
    fn test_where_builder_produces_flat_list() {
        let w = WhereClause::leaf("age", Cmp::Eq, json!(30))
            .and("city", Cmp::Eq, json!("A"))
            .or("city", Cmp::Eq, json!("B"));
        let leaves = w.leaves();
        assert_eq!(leaves.len(), 3);
        assert_eq!(leaves[1].path, "city");
    }

    #[test]
    fn test_canonical_value_clears_query_id() {
        let q = Query::select("users").with_query_id("abc");
        let v = q.to_canonical_value();
        assert!(v.get("query_id").is_none());
        assert_eq!(v["table"], json!("users"));
    }
}
