//! SQL Preprocessor Tests
//!
//! Queries over the virtual views must return exactly what the resolver
//! returns for the same entities, whatever shape the query takes.

use std::collections::BTreeMap;

use lix::change::{write_change, ChangeInput};
use lix::schema::{KEY_VALUE_SCHEMA_KEY, LIX_FILE_ID};
use lix::state::resolve;
use lix::storage::SqlValue;
use lix::version::{create_version, CreateVersionOptions, GLOBAL_VERSION_ID, MAIN_VERSION_ID};
use lix::{Lix, LixConfig};
use serde_json::{json, Value};

// =============================================================================
// Test Utilities
// =============================================================================

const KEYS: &[&str] = &["a", "b", "c", "d"];
const VERSIONS: &[&str] = &[GLOBAL_VERSION_ID, MAIN_VERSION_ID, "draft"];

fn text(s: &str) -> SqlValue {
    SqlValue::Text(s.to_string())
}

/// Values spread over three inheriting versions, with one tombstone
fn layered() -> Lix {
    let mut lix = Lix::open(LixConfig::deterministic(8)).unwrap();
    let writes: &[(&str, &str, Option<i64>)] = &[
        (GLOBAL_VERSION_ID, "a", Some(1)),
        (GLOBAL_VERSION_ID, "b", Some(1)),
        (GLOBAL_VERSION_ID, "c", Some(1)),
        (MAIN_VERSION_ID, "b", Some(2)),
        (MAIN_VERSION_ID, "c", None),
    ];
    for (version, key, value) in writes {
        write_one(&mut lix, version, key, *value);
    }
    lix.commit().unwrap();
    create_version(
        &mut lix,
        CreateVersionOptions::with_id("draft")
            .inherits_from(lix::version::InheritsFrom::Version(MAIN_VERSION_ID.to_string())),
    )
    .unwrap();
    write_one(&mut lix, "draft", "d", Some(3));
    write_one(&mut lix, "draft", "a", Some(3));
    lix
}

fn write_one(lix: &mut Lix, version: &str, key: &str, value: Option<i64>) {
    let input = match value {
        Some(value) => ChangeInput::new(key, KEY_VALUE_SCHEMA_KEY, json!({"key": key, "value": value})),
        None => ChangeInput::tombstone(key, KEY_VALUE_SCHEMA_KEY),
    };
    write_change(lix, Some(version), input).unwrap();
}

fn resolved(lix: &mut Lix, version: &str) -> BTreeMap<String, Value> {
    let mut out = BTreeMap::new();
    for key in KEYS {
        if let Some(entity) = resolve(lix, key, KEY_VALUE_SCHEMA_KEY, LIX_FILE_ID, version).unwrap() {
            out.insert(key.to_string(), entity.snapshot_content["value"].clone());
        }
    }
    out
}

// =============================================================================
// Views Agree With The Resolver
// =============================================================================

#[test]
fn test_state_all_matches_resolve() {
    let mut lix = layered();
    for version in VERSIONS {
        let rows = lix
            .execute(
                "SELECT entity_id, snapshot_content FROM state_all \
                 WHERE schema_key = ? AND version_id = ? ORDER BY entity_id",
                &[text(KEY_VALUE_SCHEMA_KEY), text(version)],
            )
            .unwrap();
        let mut from_sql = BTreeMap::new();
        for row in 0..rows.len() {
            let content: Value =
                serde_json::from_str(rows.get_text(row, "snapshot_content").unwrap()).unwrap();
            from_sql.insert(
                rows.get_text(row, "entity_id").unwrap().to_string(),
                content["value"].clone(),
            );
        }
        let expected = resolved(&mut lix, version);
        let user_keys: BTreeMap<_, _> = from_sql
            .into_iter()
            .filter(|(key, _)| KEYS.contains(&key.as_str()))
            .collect();
        assert_eq!(user_keys, expected, "{version}");
    }
}

#[test]
fn test_entity_view_follows_active_version() {
    let mut lix = layered();
    for version in VERSIONS {
        lix.execute("UPDATE active_version SET version_id = ?", &[text(version)])
            .unwrap();
        let rows = lix
            .execute("SELECT key, value FROM key_value ORDER BY key", &[])
            .unwrap();
        let mut from_sql = BTreeMap::new();
        for row in 0..rows.len() {
            let key = rows.get_text(row, "key").unwrap();
            if KEYS.contains(&key) {
                let value = rows.get(row, "value").unwrap();
                from_sql.insert(key.to_string(), lix::storage::sql_to_json(value));
            }
        }
        assert_eq!(from_sql, resolved(&mut lix, version), "{version}");
    }
}

#[test]
fn test_inheritance_columns() {
    let mut lix = layered();
    let rows = lix
        .execute(
            "SELECT key, lixcol_inherited_from_version_id AS origin FROM key_value_all \
             WHERE lixcol_version_id = 'draft' AND key IN ('a', 'b', 'd') ORDER BY key",
            &[],
        )
        .unwrap();
    let origins: Vec<Option<&str>> = (0..rows.len()).map(|r| rows.get_text(r, "origin")).collect();
    assert_eq!(origins, vec![None, Some(MAIN_VERSION_ID), None]);
}

// =============================================================================
// Query Shapes
// =============================================================================

#[test]
fn test_join_between_views() {
    let mut lix = layered();
    let rows = lix
        .execute(
            "SELECT v.name AS name, count(*) AS n FROM key_value_all kv \
             JOIN version v ON v.id = kv.lixcol_version_id \
             WHERE kv.key IN ('a', 'b', 'c', 'd') GROUP BY v.name ORDER BY v.name",
            &[],
        )
        .unwrap();
    let counts: Vec<(String, SqlValue)> = (0..rows.len())
        .map(|r| {
            (
                rows.get_text(r, "name").unwrap().to_string(),
                rows.get(r, "n").unwrap().clone(),
            )
        })
        .collect();
    assert_eq!(
        counts,
        vec![
            ("draft".to_string(), SqlValue::Integer(3)),
            (GLOBAL_VERSION_ID.to_string(), SqlValue::Integer(3)),
            (MAIN_VERSION_ID.to_string(), SqlValue::Integer(2)),
        ]
    );
}

#[test]
fn test_cte_shadowing_a_view_name() {
    let mut lix = layered();
    let rows = lix
        .execute(
            "WITH key_value AS (SELECT 'local' AS key) SELECT key FROM key_value",
            &[],
        )
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows.get_text(0, "key"), Some("local"));
}

#[test]
fn test_cte_shadowing_state_all() {
    let mut lix = layered();
    let rows = lix
        .execute(
            "WITH state_all AS (SELECT 'x' AS entity_id) SELECT entity_id FROM state_all",
            &[],
        )
        .unwrap();
    assert_eq!(rows.rows, vec![vec![text("x")]]);
}

#[test]
fn test_cte_shadowing_active_version() {
    let mut lix = layered();
    let rows = lix
        .execute(
            "WITH active_version AS (SELECT 'zzz' AS version_id) SELECT version_id FROM active_version",
            &[],
        )
        .unwrap();
    assert_eq!(rows.rows, vec![vec![text("zzz")]]);
}

#[test]
fn test_entity_view_beside_shadowing_ctes() {
    let mut lix = layered();
    let plain = lix
        .execute("SELECT key FROM key_value WHERE key IN ('a', 'b', 'c', 'd') ORDER BY key", &[])
        .unwrap();
    let shadowed = lix
        .execute(
            "WITH state_all AS (SELECT 1 AS n), active_version AS (SELECT 'draft' AS version_id) \
             SELECT key FROM key_value WHERE key IN ('a', 'b', 'c', 'd') ORDER BY key",
            &[],
        )
        .unwrap();
    assert_eq!(plain.rows, vec![vec![text("a")], vec![text("b")]]);
    assert_eq!(shadowed.rows, plain.rows);
}

#[test]
fn test_subquery_against_active_version() {
    let mut lix = layered();
    let rows = lix
        .execute(
            "SELECT entity_id FROM state_all WHERE schema_key = 'lix_key_value' \
             AND entity_id = 'b' AND version_id IN (SELECT version_id FROM active_version)",
            &[],
        )
        .unwrap();
    assert_eq!(rows.len(), 1);
}

#[test]
fn test_batch_with_parameters_and_comments() {
    let mut lix = Lix::open(LixConfig::deterministic(8)).unwrap();
    let result = lix
        .execute(
            "-- seed two keys; then read one\n\
             INSERT INTO key_value (key, value) VALUES (?, ?);\n\
             /* ; */ INSERT INTO key_value (key, value) VALUES (?, 'semi;colon');\n\
             SELECT value FROM key_value WHERE key = ?",
            &[text("x"), text("1"), text("y"), text("y")],
        )
        .unwrap();
    assert_eq!(result.get_text(0, "value"), Some("semi;colon"));
    assert_eq!(lix.key_value("x").unwrap(), Some(json!("1")));
}

#[test]
fn test_parameter_count_is_checked_before_running() {
    let mut lix = Lix::open(LixConfig::deterministic(8)).unwrap();
    let err = lix
        .execute(
            "INSERT INTO key_value (key, value) VALUES (?, ?); SELECT ?",
            &[text("x"), text("1")],
        )
        .unwrap_err();
    assert_eq!(err.code(), "LIX_INVALID_INPUT");
    assert_eq!(lix.key_value("x").unwrap(), None);
}
