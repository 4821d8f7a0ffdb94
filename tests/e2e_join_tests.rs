//! Join kinds, post-join WHERE/range, and joins combined with the
//! ordering/limit stages.

mod common;

use common::{TestDb, users_orders_schemas};
use serde_json::{Value, json};
use silt::{Cmp, Direction, JoinKind, JoinOn, Query, ViewMode, WhereClause};

fn seeded() -> TestDb {
    let mut t = TestDb::with_schemas(users_orders_schemas(ViewMode::Ghost));
    t.upsert("users", json!({"id": 1, "name": "Ada"}));
    t.upsert("users", json!({"id": 2, "name": "Grace"}));
    t.upsert("users", json!({"id": 3, "name": "Zoe"}));
    t.upsert("orders", json!({"id": 10, "userId": 1, "total": 5.0}));
    t.upsert("orders", json!({"id": 11, "userId": 2, "total": 7.0}));
    t.upsert("orders", json!({"id": 12, "userId": 2, "total": 9.0}));
    t.upsert("orders", json!({"id": 13, "userId": 99, "total": 1.0}));
    t
}

fn on_user() -> Option<JoinOn> {
    Some(JoinOn {
        left: "orders.userId".into(),
        cmp: Cmp::Eq,
        right: "users.id".into(),
    })
}

#[test]
fn test_inner_join_keys_rows_by_table_column() {
    let mut t = seeded();
    let rows = t.select(Query::select("orders").join(JoinKind::Inner, "users", on_user()));
    assert_eq!(rows.len(), 3, "order 13 has no matching user");
    assert_eq!(rows[0]["orders.id"], json!(10));
    assert_eq!(rows[0]["users.name"], json!("Ada"));
}

#[test]
fn test_left_join_pads_unmatched_with_nulls() {
    let mut t = seeded();
    let rows = t.select(Query::select("orders").join(JoinKind::Left, "users", on_user()));
    assert_eq!(rows.len(), 4);
    let dangling = rows
        .iter()
        .find(|r| r["orders.id"] == json!(13))
        .expect("unmatched order present");
    assert_eq!(dangling["users.name"], Value::Null);
}

#[test]
fn test_right_join_drives_from_joined_table() {
    let mut t = seeded();
    let rows = t.select(Query::select("orders").join(JoinKind::Right, "users", on_user()));
    // Three users; Zoe has no orders and is padded.
    assert_eq!(rows.len(), 4);
    let zoe = rows
        .iter()
        .find(|r| r["users.name"] == json!("Zoe"))
        .expect("order-less user present");
    assert_eq!(zoe["orders.id"], Value::Null);
}

#[test]
fn test_outer_join_pads_both_sides() {
    let mut t = seeded();
    let rows = t.select(Query::select("orders").join(JoinKind::Outer, "users", on_user()));
    // 3 matches + dangling order 13 + order-less Zoe.
    assert_eq!(rows.len(), 5);
}

#[test]
fn test_cross_join_is_cartesian() {
    let mut t = seeded();
    let rows = t.select(Query::select("orders").join(JoinKind::Cross, "users", None));
    assert_eq!(rows.len(), 12);
}

#[test]
fn test_where_applies_post_join() {
    let mut t = seeded();
    let rows = t.select(
        Query::select("orders")
            .join(JoinKind::Inner, "users", on_user())
            .filter(WhereClause::leaf("users.name", Cmp::Eq, json!("Grace"))),
    );
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r["users.name"] == json!("Grace")));
}

#[test]
fn test_range_applies_post_join() {
    let mut t = seeded();
    let rows = t.select(
        Query::select("orders")
            .join(JoinKind::Inner, "users", on_user())
            .range(2, 1),
    );
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["orders.id"], json!(11));
}

#[test]
fn test_join_order_by_limit_scenario() {
    // Scenario: inner join, order by user name ascending, limit 2 — the two
    // alphabetically-first users' orders, keyed "orders.*" / "users.*".
    let mut t = seeded();
    let rows = t.select(
        Query::select("orders")
            .join(JoinKind::Inner, "users", on_user())
            .order_by("users.name", Direction::Asc)
            .limit(2),
    );
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["users.name"], json!("Ada"));
    assert_eq!(rows[0]["orders.id"], json!(10));
    assert_eq!(rows[1]["users.name"], json!("Grace"));
    assert!(rows[0].contains_key("orders.total"));
}

#[test]
fn test_join_with_aggregate_per_group() {
    let mut t = seeded();
    let rows = t.select(
        Query::select("orders")
            .join(JoinKind::Inner, "users", on_user())
            .group_by("users.name", Direction::Asc)
            .columns(["users.name", "SUM(orders.total) AS spent"]),
    );
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["users.name"], json!("Ada"));
    assert_eq!(rows[0]["spent"], json!(5.0));
    assert_eq!(rows[1]["users.name"], json!("Grace"));
    assert_eq!(rows[1]["spent"], json!(16.0));
}

#[test]
fn test_join_with_orm_is_fatal() {
    let mut t = seeded();
    let q = Query::select("orders")
        .join(JoinKind::Inner, "users", on_user())
        .orm(silt::OrmSpec::key("x"));
    assert!(matches!(
        t.db.execute(q),
        Err(silt::SiltError::InvalidQuery(_))
    ));
}
