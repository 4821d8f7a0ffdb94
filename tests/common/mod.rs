//! Shared harness for the end-to-end tests: an engine over the in-memory
//! adapter with canned schemas.

#![allow(dead_code)]

use serde_json::Value;
use silt::{
    Arity, ColumnKind, KeyKind, MemoryAdapter, Query, Row, Silt, TableSchema, TokenizeMode,
    ViewMode, WriteSummary,
};

/// Unwrap a `json!` object literal into a row.
pub fn obj(v: Value) -> Row {
    match v {
        Value::Object(map) => map,
        _ => panic!("not an object"),
    }
}

/// One-time tracing setup; `RUST_LOG=silt=debug cargo test` shows the
/// engine's dispatch and index-maintenance spans.
fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub struct TestDb {
    pub db: Silt,
}

impl TestDb {
    pub fn with_schemas(schemas: Vec<TableSchema>) -> Self {
        init_tracing();
        let mut db = Silt::new(Box::new(MemoryAdapter::new()));
        for schema in schemas {
            db.register(schema);
        }
        db.connect().expect("connect");
        TestDb { db }
    }

    pub fn upsert(&mut self, table: &str, v: Value) -> WriteSummary {
        self.db
            .execute(Query::upsert(table, obj(v)))
            .expect("upsert")
            .write()
            .expect("write summary")
    }

    pub fn select(&mut self, q: Query) -> Vec<Row> {
        self.db.execute(q).expect("select").rows()
    }
}

// ── Canned schemas ───────────────────────────────────────────────────────

/// `users { id PK, name, age idx, city idx }`
pub fn users_schema() -> TableSchema {
    TableSchema::new("users", "id", KeyKind::Int)
        .column("name", ColumnKind::String)
        .column("age", ColumnKind::Int)
        .column("city", ColumnKind::String)
        .index("age")
        .index("city")
}

/// `docs { id PK, body search(english-meta, boost 1) }`
pub fn docs_schema() -> TableSchema {
    TableSchema::new("docs", "id", KeyKind::Int).column("body", ColumnKind::String).search(
        "body",
        1.0,
        TokenizeMode::EnglishMeta,
    )
}

/// `posts { id PK, tags: [] } ↔ tags { id PK, posts: [] }`
pub fn posts_tags_schemas() -> Vec<TableSchema> {
    vec![
        TableSchema::new("posts", "id", KeyKind::Int)
            .column("title", ColumnKind::String)
            .column("tags", ColumnKind::Array)
            .relation("tags", Arity::Many, "tags", "posts", Arity::Many),
        TableSchema::new("tags", "id", KeyKind::Int)
            .column("label", ColumnKind::String)
            .column("posts", ColumnKind::Array)
            .relation("posts", Arity::Many, "posts", "tags", Arity::Many),
    ]
}

/// `orders { id PK, userId, userName := users.name (LIVE) }`
pub fn users_orders_schemas(mode: ViewMode) -> Vec<TableSchema> {
    vec![
        TableSchema::new("users", "id", KeyKind::Int).column("name", ColumnKind::String),
        TableSchema::new("orders", "id", KeyKind::Int)
            .column("userId", ColumnKind::Int)
            .column("total", ColumnKind::Float)
            .column("userName", ColumnKind::String)
            .view(
                "users",
                "userId",
                vec![("userName".to_string(), "name".to_string())],
                mode,
            ),
    ]
}
