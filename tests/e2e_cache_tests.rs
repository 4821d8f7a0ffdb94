//! Result cache: fingerprint stability, hit/miss behavior, wholesale
//! invalidation on write, and the non-cacheable query shapes.

mod common;

use common::{TestDb, obj, users_schema};
use serde_json::json;
use silt::hash::fingerprint;
use silt::{Cmp, EngineConfig, MemoryAdapter, Query, Silt, WhereClause};

fn seeded() -> TestDb {
    let mut t = TestDb::with_schemas(vec![users_schema()]);
    t.upsert("users", json!({"id": 1, "name": "Ada", "age": 30, "city": "A"}));
    t.upsert("users", json!({"id": 2, "name": "Grace", "age": 30, "city": "B"}));
    t
}

#[test]
fn test_fingerprint_is_stable_across_query_ids() {
    let a = Query::select("users")
        .filter(WhereClause::leaf("age", Cmp::Eq, json!(30)))
        .with_query_id("first");
    let b = Query::select("users")
        .filter(WhereClause::leaf("age", Cmp::Eq, json!(30)))
        .with_query_id("second");
    assert_eq!(fingerprint(&a), fingerprint(&b));

    let c = Query::select("users").filter(WhereClause::leaf("age", Cmp::Eq, json!(31)));
    assert_ne!(fingerprint(&a), fingerprint(&c));
}

#[test]
fn test_repeat_select_is_served_and_correct() {
    let mut t = seeded();
    let q = || Query::select("users").filter(WhereClause::leaf("age", Cmp::Eq, json!(30)));
    let first = t.select(q());
    let second = t.select(q());
    assert_eq!(first, second);
    assert_eq!(second.len(), 2);
}

#[test]
fn test_write_invalidates_table_cache() {
    let mut t = seeded();
    let q = || Query::select("users").filter(WhereClause::leaf("age", Cmp::Eq, json!(30)));
    assert_eq!(t.select(q()).len(), 2);

    // The cached result must not outlive this write.
    t.upsert("users", json!({"id": 3, "name": "Edsger", "age": 30, "city": "A"}));
    assert_eq!(t.select(q()).len(), 3);

    t.db.execute(Query::delete("users").filter(WhereClause::leaf("id", Cmp::Eq, json!(1))))
        .unwrap();
    assert_eq!(t.select(q()).len(), 2);
}

#[test]
fn test_drop_invalidates_table_cache() {
    let mut t = seeded();
    let q = || Query::select("users");
    assert_eq!(t.select(q()).len(), 2);
    t.db.execute(Query::drop("users")).unwrap();
    assert!(t.select(q()).is_empty());
}

#[test]
fn test_function_where_bypasses_cache() {
    let mut t = seeded();
    // Two closures with identical fingerprints but different behavior:
    // were they cached, the second would return the first's rows.
    let young = Query::select("users").filter(WhereClause::func(|r, _| r["age"] == json!(30)));
    let named = Query::select("users").filter(WhereClause::func(|r, _| r["name"] == json!("Ada")));
    assert_eq!(t.select(young), t.select(Query::select("users").filter(
        WhereClause::func(|r, _| r["age"] == json!(30)),
    )));
    assert_eq!(t.select(named).len(), 1);
}

#[test]
fn test_cache_disabled_still_correct() {
    let mut db = Silt::with_config(
        Box::new(MemoryAdapter::new()),
        EngineConfig {
            cache_enabled: false,
            ..EngineConfig::default()
        },
    );
    db.register(users_schema());
    db.connect().unwrap();
    db.execute(Query::upsert(
        "users",
        obj(json!({"id": 1, "name": "Ada", "age": 30, "city": "A"})),
    ))
    .unwrap();
    let rows = db.execute(Query::select("users")).unwrap().rows();
    assert_eq!(rows.len(), 1);
}

#[test]
fn test_writes_to_other_tables_do_not_affect_results() {
    let mut t = TestDb::with_schemas(vec![
        users_schema(),
        silt::TableSchema::new("logs", "id", silt::KeyKind::Int),
    ]);
    t.upsert("users", json!({"id": 1, "name": "Ada", "age": 30, "city": "A"}));
    let q = || Query::select("users");
    assert_eq!(t.select(q()).len(), 1);
    t.upsert("logs", json!({"id": 1}));
    assert_eq!(t.select(q()).len(), 1);
}
