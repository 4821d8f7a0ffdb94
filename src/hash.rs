//! xxHash-based fingerprints, content hashes, and composite keys.
//!
//! Three hash consumers live in the engine: the result cache keys entries by
//! a stable fingerprint of the query descriptor, the full-text index writer
//! gates re-tokenization on a content hash of the column text, and group-by
//! buckets rows by a composite key built from the grouping values.

use serde_json::Value;
use xxhash_rust::xxh64;

use crate::query::Query;

/// Fixed seed for deterministic hashing.
const SEED: u64 = 0x517cc1b727220a95;

/// Record separator for composite keys. Prevents `("ab","c")` and
/// `("a","bc")` from producing the same key.
const SEP: char = '\x1E';

/// Marker for null values inside composite keys, distinct from the
/// literal string `"NULL"`.
const NULL_MARK: &str = "\x00NULL\x00";

/// Compute a 64-bit content hash of a text value.
///
/// Used by the full-text index writer to skip re-tokenization when a
/// column's text did not change between writes.
pub fn content_hash(input: &str) -> u64 {
    xxh64::xxh64(input.as_bytes(), SEED)
}

/// Build a composite key from multiple values.
///
/// Used for group-by bucket keys. Values are joined with a record
/// separator so embedded dots or separators in the data cannot make two
/// distinct key tuples collide.
pub fn composite_key(parts: &[&Value]) -> String {
    let mut combined = String::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            combined.push(SEP);
        }
        match part {
            Value::Null => combined.push_str(NULL_MARK),
            Value::String(s) => combined.push_str(s),
            other => combined.push_str(&other.to_string()),
        }
    }
    combined
}

/// Compute the stable fingerprint of a query descriptor.
///
/// The descriptor is serialized to canonical JSON (object keys sorted,
/// transient fields cleared) and hashed. Two queries that differ only in
/// `query_id` fingerprint identically; the cache relies on this.
pub fn fingerprint(query: &Query) -> u64 {
    let value = query.to_canonical_value();
    let mut buf = String::new();
    write_canonical(&value, &mut buf);
    xxh64::xxh64(buf.as_bytes(), SEED)
}

/// Serialize a JSON value with object keys in sorted order.
///
/// `serde_json::Map` preserves insertion order, which is not stable across
/// two descriptors built in different clause order.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            out.push('{');
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for (i, k) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*k).clone()).to_string());
                out.push(':');
                write_canonical(&map[*k], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}
