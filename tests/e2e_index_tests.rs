//! Secondary-index maintenance invariants: the index tables must mirror
//! live row state after every write, update, and delete.

mod common;

use common::{TestDb, users_schema};
use serde_json::json;
use silt::index::read_index_record;
use silt::{Cmp, Key, Query, WhereClause};

fn seeded() -> TestDb {
    let mut t = TestDb::with_schemas(vec![users_schema()]);
    t.upsert("users", json!({"id": 1, "name": "Ada", "age": 30, "city": "A"}));
    t.upsert("users", json!({"id": 2, "name": "Grace", "age": 30, "city": "B"}));
    t.upsert("users", json!({"id": 3, "name": "Edsger", "age": 40, "city": "A"}));
    t
}

/// The pks recorded under one index key.
fn index_pks(t: &TestDb, table: &str, key: Key) -> Vec<i64> {
    read_index_record(t.db.adapter(), table, &key)
        .unwrap()
        .map(|r| r.rows.iter().filter_map(|v| v.as_i64()).collect())
        .unwrap_or_default()
}

#[test]
fn test_index_records_mirror_rows() {
    let t = seeded();
    assert_eq!(index_pks(&t, "_users_idx_age", Key::Int(30)), vec![1, 2]);
    assert_eq!(index_pks(&t, "_users_idx_age", Key::Int(40)), vec![3]);
    assert_eq!(
        index_pks(&t, "_users_idx_city", Key::Str("A".into())),
        vec![1, 3]
    );
}

#[test]
fn test_update_moves_pk_between_keys() {
    let mut t = seeded();
    t.upsert("users", json!({"id": 1, "age": 40}));
    assert_eq!(index_pks(&t, "_users_idx_age", Key::Int(30)), vec![2]);
    assert_eq!(index_pks(&t, "_users_idx_age", Key::Int(40)), vec![1, 3]);
}

#[test]
fn test_emptied_key_record_is_deleted() {
    let mut t = seeded();
    t.upsert("users", json!({"id": 3, "age": 30}));
    let record = read_index_record(t.db.adapter(), "_users_idx_age", &Key::Int(40)).unwrap();
    assert!(record.is_none(), "age=40 has no rows left");
}

#[test]
fn test_delete_retracts_from_all_indexes() {
    let mut t = seeded();
    t.db.execute(Query::delete("users").filter(WhereClause::leaf("id", Cmp::Eq, json!(1))))
        .unwrap();
    assert_eq!(index_pks(&t, "_users_idx_age", Key::Int(30)), vec![2]);
    assert_eq!(index_pks(&t, "_users_idx_city", Key::Str("A".into())), vec![3]);
}

#[test]
fn test_idempotent_upsert_keeps_index_identical() {
    let mut t = seeded();
    t.upsert("users", json!({"id": 2, "name": "Grace", "age": 30, "city": "B"}));
    t.upsert("users", json!({"id": 2, "name": "Grace", "age": 30, "city": "B"}));
    assert_eq!(index_pks(&t, "_users_idx_age", Key::Int(30)), vec![1, 2]);
    assert_eq!(index_pks(&t, "_users_idx_city", Key::Str("B".into())), vec![2]);
}

#[test]
fn test_where_update_maintains_indexes_for_every_matched_row() {
    let mut t = seeded();
    // Move everyone in city A to city C in one query.
    let q = Query::upsert("users", common::obj(json!({"city": "C"})))
        .filter(WhereClause::leaf("city", Cmp::Eq, json!("A")));
    let summary = t.db.execute(q).unwrap().write().unwrap();
    assert_eq!(summary.affected_row_pks.len(), 2);

    assert!(index_pks(&t, "_users_idx_city", Key::Str("A".into())).is_empty());
    assert_eq!(
        index_pks(&t, "_users_idx_city", Key::Str("C".into())),
        vec![1, 3]
    );
}

#[test]
fn test_round_trip_upsert_then_pk_select() {
    let mut t = seeded();
    let rows = t.select(Query::select("users").filter(WhereClause::leaf("id", Cmp::Eq, json!(3))));
    assert_eq!(rows[0]["name"], json!("Edsger"));
    assert_eq!(rows[0]["age"], json!(40));
}

#[test]
fn test_drop_clears_rows_and_index_tables() {
    let mut t = seeded();
    t.db.execute(Query::drop("users")).unwrap();
    let rows = t.select(Query::select("users"));
    assert!(rows.is_empty());
    assert!(index_pks(&t, "_users_idx_age", Key::Int(30)).is_empty());
}
