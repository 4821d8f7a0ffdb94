//! Group-by: sort then bucket.
//!
//! Rows are sorted by the grouping columns, then bucketed by a composite
//! key of the grouping values (record-separated, so values containing
//! dots cannot collide). The bucket index is retained for aggregate
//! evaluation in the projection stage.

use crate::hash::composite_key;
use crate::query::Direction;
use crate::row::{self, Row};

/// Group-sort without bucketing, for ORM sub-selects (their aggregates
/// never run, so only the ordering matters).
pub fn apply_sort_only(rows: &mut [Row], specs: &[(String, Direction)]) {
    super::order_by::sort(rows, specs, false);
}

/// Sorted rows plus bucket membership (row indices per bucket, in order).
#[derive(Debug)]
pub struct Grouped {
    pub rows: Vec<Row>,
    pub buckets: Vec<Vec<usize>>,
}

pub fn apply(mut rows: Vec<Row>, specs: &[(String, Direction)], joined: bool) -> Grouped {
    super::order_by::sort(&mut rows, specs, joined);

    let mut buckets: Vec<Vec<usize>> = Vec::new();
    let mut last_key: Option<String> = None;
    for (i, r) in rows.iter().enumerate() {
        let values: Vec<_> = specs
            .iter()
            .map(|(col, _)| row::path_value(r, col, joined))
            .collect();
        let key = composite_key(&values.iter().collect::<Vec<_>>());
        if last_key.as_deref() != Some(key.as_str()) {
            buckets.push(Vec::new());
            last_key = Some(key);
        }
        buckets
            .last_mut()
            .expect("bucket pushed above")
            .push(i);
    }

    Grouped { rows, buckets }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn rows(vals: &[Value]) -> Vec<Row> {
        vals.iter()
            .map(|v| match v {
                Value::Object(m) => m.clone(),
                _ => panic!("not an object"),
            })
            .collect()
    }

    #[test]
    fn test_buckets_follow_sorted_keys() {
        let input = rows(&[
            json!({"city": "B", "n": 1}),
            json!({"city": "A", "n": 2}),
            json!({"city": "B", "n": 3}),
        ]);
        let grouped = apply(input, &[("city".into(), Direction::Asc)], false);
        assert_eq!(grouped.buckets.len(), 2);
        assert_eq!(grouped.rows[0]["city"], json!("A"));
        assert_eq!(grouped.buckets[0], vec![0]);
        assert_eq!(grouped.buckets[1], vec![1, 2]);
    }

    #[test]
    fn test_dotted_values_do_not_merge_buckets() {
        let input = rows(&[
            json!({"a": "x.y", "b": "z"}),
            json!({"a": "x", "b": "y.z"}),
        ]);
        let grouped = apply(
            input,
            &[("a".into(), Direction::Asc), ("b".into(), Direction::Asc)],
            false,
        );
        assert_eq!(grouped.buckets.len(), 2);
    }
}
