//! Stable, direction-aware ordering over dotted paths.

use std::cmp::Ordering;

use crate::query::Direction;
use crate::row::{self, Row};

/// Sort rows by the spec list, first spec most significant. The sort is
/// stable, so equal rows keep their selection order.
pub fn sort(rows: &mut [Row], specs: &[(String, Direction)], joined: bool) {
    if specs.is_empty() {
        return;
    }
    rows.sort_by(|a, b| {
        for (col, dir) in specs {
            let av = row::path_value(a, col, joined);
            let bv = row::path_value(b, col, joined);
            let ord = row::cmp_values(&av, &bv);
            let ord = match dir {
                Direction::Asc => ord,
                Direction::Desc => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
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
    fn test_multi_column_directions() {
        let mut input = rows(&[
            json!({"a": 1, "b": 1}),
            json!({"a": 0, "b": 2}),
            json!({"a": 1, "b": 3}),
        ]);
        sort(
            &mut input,
            &[
                ("a".into(), Direction::Asc),
                ("b".into(), Direction::Desc),
            ],
            false,
        );
        assert_eq!(input[0]["a"], json!(0));
        assert_eq!(input[1]["b"], json!(3));
        assert_eq!(input[2]["b"], json!(1));
    }

    #[test]
    fn test_stable_on_ties() {
        let mut input = rows(&[
            json!({"a": 1, "tag": "first"}),
            json!({"a": 1, "tag": "second"}),
        ]);
        sort(&mut input, &[("a".into(), Direction::Asc)], false);
        assert_eq!(input[0]["tag"], json!("first"));
    }
}
