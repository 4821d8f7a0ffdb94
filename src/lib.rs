//! silt — an embedded, multi-backend row database engine.
//!
//! The engine executes structured query descriptors (select / upsert /
//! delete / drop, plus show-tables / describe) against any storage backend
//! that offers point reads, point writes, and ordered range scans. On top
//! of that minimal surface it maintains everything derived:
//!
//! - **Secondary indexes** — value → pk lists, diffed on every write.
//! - **Full-text indexes** — tokenized exact and fuzzy word records with
//!   positional data, reconciled through per-row token snapshots.
//! - **Trie indexes** — in-memory prefix lookups.
//! - **View projections** — denormalized columns copied between tables,
//!   locally before a write and remotely after it.
//! - **ORM relationships** — symmetric back-references across two tables,
//!   kept consistent by diffing every mutation.
//!
//! Reads pick the cheapest selection strategy available (pk lookup,
//! secondary-index lookup, trie prefix, positional range, full-text
//! search, full scan), then run the mutation stages: join, group-by, ORM
//! expansion, projection with registered functions, having, order-by,
//! offset, limit. Results of cacheable selects are kept per table and
//! invalidated wholesale by the first write to that table.
//!
//! # Example
//!
//! ```
//! use silt::{ColumnKind, KeyKind, MemoryAdapter, Query, Silt, TableSchema};
//! use serde_json::json;
//!
//! let mut db = Silt::new(Box::new(MemoryAdapter::new()));
//! db.register(
//!     TableSchema::new("users", "id", KeyKind::Int)
//!         .column("name", ColumnKind::String)
//!         .index("name"),
//! );
//! db.connect().unwrap();
//!
//! let row = match json!({"id": 1, "name": "Ada"}) {
//!     serde_json::Value::Object(map) => map,
//!     _ => unreachable!(),
//! };
//! db.execute(Query::upsert("users", row)).unwrap();
//! let rows = db.execute(Query::select("users")).unwrap().rows();
//! assert_eq!(rows.len(), 1);
//! ```

pub mod adapter;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod exec;
pub mod functions;
pub mod hash;
pub mod index;
pub mod memory;
pub mod orm;
pub mod predicate;
pub mod query;
pub mod row;
pub mod tokenizer;
pub mod trie;
pub mod view;

pub use adapter::StorageAdapter;
pub use catalog::{Arity, Catalog, ColumnKind, TableSchema, ViewMode};
pub use config::EngineConfig;
pub use engine::{ORM_SKIP_COMMENT, QueryResult, REBUILD_SEARCH_COMMENT, Silt, WriteSummary};
pub use error::SiltError;
pub use memory::MemoryAdapter;
pub use query::{
    Action, Cmp, Connective, Direction, JoinKind, JoinOn, OrmSpec, Query, TableRef, WhereClause,
    WhereLeaf,
};
pub use row::{Key, KeyKind, Row};
pub use tokenizer::{TokenizeMode, Tokenizers};
