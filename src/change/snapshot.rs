//! Content-addressed snapshot store
//!
//! Snapshot ids are the sha-256 of the canonical JSON serialization (object
//! keys sorted, no whitespace), so equal content always maps to one row.

use rusqlite::{params, OptionalExtension};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::errors::{LixError, LixResult};
use crate::storage::{to_hex, Backend};

/// Serialize with object keys sorted at every level
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(item, out);
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
        scalar => out.push_str(&scalar.to_string()),
    }
}

pub fn snapshot_id(canonical: &str) -> String {
    to_hex(&Sha256::digest(canonical.as_bytes()))
}

/// Store content and return its id; `true` when a new row was written
pub fn insert_snapshot(backend: &Backend, content: &Value) -> LixResult<(String, bool)> {
    let canonical = canonical_json(content);
    let id = snapshot_id(&canonical);
    let inserted = backend.connection().execute(
        "INSERT OR IGNORE INTO lix_internal_snapshot (id, content) VALUES (?1, ?2)",
        params![id, canonical],
    )?;
    Ok((id, inserted > 0))
}

pub fn snapshot_content(backend: &Backend, id: &str) -> LixResult<Option<Value>> {
    let raw: Option<String> = backend
        .connection()
        .query_row(
            "SELECT content FROM lix_internal_snapshot WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()?;
    match raw {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| LixError::CorruptState(format!("snapshot '{}' is not JSON: {}", id, e))),
        None => Ok(None),
    }
}

pub fn snapshot_count(backend: &Backend) -> LixResult<usize> {
    let count: i64 = backend.connection().query_row(
        "SELECT COUNT(*) FROM lix_internal_snapshot",
        [],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_json_sorts_keys() {
        let a = json!({"b": 1, "a": {"d": [1, {"z": 0, "y": 1}], "c": null}});
        assert_eq!(
            canonical_json(&a),
            r#"{"a":{"c":null,"d":[1,{"y":1,"z":0}]},"b":1}"#
        );
    }

    #[test]
    fn test_equal_content_shares_snapshot() {
        let backend = Backend::open_in_memory().unwrap();
        let (first, inserted) = insert_snapshot(&backend, &json!({"x": 1, "y": 2})).unwrap();
        assert!(inserted);
        let (second, inserted) = insert_snapshot(&backend, &json!({"y": 2, "x": 1})).unwrap();
        assert!(!inserted);
        assert_eq!(first, second);
        assert_eq!(snapshot_count(&backend).unwrap(), 1);
        assert_eq!(first.len(), 64);
    }

    #[test]
    fn test_snapshot_content_round_trip() {
        let backend = Backend::open_in_memory().unwrap();
        let content = json!({"key": "greeting", "value": "hello"});
        let (id, _) = insert_snapshot(&backend, &content).unwrap();
        assert_eq!(snapshot_content(&backend, &id).unwrap(), Some(content));
        assert_eq!(snapshot_content(&backend, "missing").unwrap(), None);
    }
}
