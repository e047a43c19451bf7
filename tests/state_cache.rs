//! State Cache Tests
//!
//! The cache must always hold exactly what a replay of the change log
//! produces, whatever sequence of writes, commits and version operations
//! led there. Invalidation defers the rebuild to the next read.

use lix::change::{write_change, ChangeInput};
use lix::schema::KEY_VALUE_SCHEMA_KEY;
use lix::state::{cached_rows, materialize};
use lix::version::{
    create_version, delete_version, switch_version, CreateVersionOptions, InheritsFrom,
    GLOBAL_VERSION_ID,
};
use lix::{Lix, LixConfig};
use serde_json::json;

// =============================================================================
// Test Utilities
// =============================================================================

fn open() -> Lix {
    Lix::open(LixConfig::deterministic(21)).unwrap()
}

fn set(lix: &mut Lix, version_id: Option<&str>, key: &str, value: i64) {
    write_change(
        lix,
        version_id,
        ChangeInput::new(key, KEY_VALUE_SCHEMA_KEY, json!({"key": key, "value": value})),
    )
    .unwrap();
}

fn remove(lix: &mut Lix, version_id: Option<&str>, key: &str) {
    write_change(lix, version_id, ChangeInput::tombstone(key, KEY_VALUE_SCHEMA_KEY)).unwrap();
}

fn assert_consistent(lix: &Lix) {
    let cached = cached_rows(lix.backend()).unwrap();
    let replayed = materialize(lix.backend(), None).unwrap();
    assert_eq!(cached, replayed);
}

// =============================================================================
// Consistency With Replay
// =============================================================================

#[test]
fn test_cache_tracks_writes_and_commits() {
    let mut lix = open();
    assert_consistent(&lix);

    set(&mut lix, None, "a", 1);
    set(&mut lix, None, "b", 1);
    assert_consistent(&lix);

    lix.commit().unwrap();
    assert_consistent(&lix);

    set(&mut lix, None, "a", 2);
    remove(&mut lix, None, "b");
    assert_consistent(&lix);

    lix.commit().unwrap();
    assert_consistent(&lix);
}

#[test]
fn test_cache_tracks_version_operations() {
    let mut lix = open();
    set(&mut lix, Some(GLOBAL_VERSION_ID), "shared", 1);
    set(&mut lix, None, "a", 1);
    lix.commit().unwrap();

    create_version(&mut lix, CreateVersionOptions::with_id("draft")).unwrap();
    assert_consistent(&lix);

    create_version(
        &mut lix,
        CreateVersionOptions::with_id("loose").inherits_from(InheritsFrom::None),
    )
    .unwrap();
    set(&mut lix, Some("draft"), "a", 5);
    set(&mut lix, Some("loose"), "z", 9);
    assert_consistent(&lix);

    switch_version(&mut lix, "draft").unwrap();
    lix.commit().unwrap();
    assert_consistent(&lix);

    delete_version(&mut lix, "loose").unwrap();
    assert_consistent(&lix);
    assert!(cached_rows(lix.backend())
        .unwrap()
        .iter()
        .all(|row| row.version_id != "loose"));
}

#[test]
fn test_cache_tracks_sql_writes() {
    let mut lix = open();
    lix.execute(
        "INSERT INTO key_value (key, value) VALUES ('x', '1'); \
         INSERT INTO key_value (key, value) VALUES ('y', '2')",
        &[],
    )
    .unwrap();
    lix.execute("UPDATE key_value SET value = '3' WHERE key = 'x'", &[])
        .unwrap();
    lix.execute("DELETE FROM key_value WHERE key = 'y'", &[]).unwrap();
    assert_consistent(&lix);
}

#[test]
fn test_tombstones_are_cached() {
    let mut lix = open();
    set(&mut lix, None, "gone", 1);
    remove(&mut lix, None, "gone");

    let rows = cached_rows(lix.backend()).unwrap();
    let row = rows.iter().find(|row| row.entity_id == "gone").unwrap();
    assert!(row.is_tombstone());
    assert_eq!(lix.key_value("gone").unwrap(), None);
}

// =============================================================================
// Invalidation
// =============================================================================

#[test]
fn test_stale_cache_rebuilds_once_on_read() {
    let mut lix = open();
    set(&mut lix, None, "a", 1);
    let populations = lix.metrics().cache_populations();

    lix.mark_cache_stale().unwrap();
    assert!(lix.cache_is_stale());
    assert_eq!(lix.metrics().cache_populations(), populations);

    assert_eq!(lix.key_value("a").unwrap(), Some(json!(1)));
    assert!(!lix.cache_is_stale());
    assert_eq!(lix.metrics().cache_populations(), populations + 1);

    lix.key_value("a").unwrap();
    lix.execute("SELECT * FROM key_value", &[]).unwrap();
    assert_eq!(lix.metrics().cache_populations(), populations + 1);
    assert_consistent(&lix);
}

#[test]
fn test_writes_while_stale_are_recovered_by_rebuild() {
    let mut lix = open();
    lix.mark_cache_stale().unwrap();
    set(&mut lix, None, "late", 7);
    lix.commit().unwrap();

    assert_eq!(lix.key_value("late").unwrap(), Some(json!(7)));
    assert_consistent(&lix);
}

#[test]
fn test_failed_transaction_keeps_cache_consistent() {
    let mut lix = open();
    set(&mut lix, None, "a", 1);

    let result = lix.transaction(|lix| {
        lix.execute("UPDATE key_value SET value = '2' WHERE key = 'a'", &[])?;
        lix.execute("SELECT * FROM no_such_table", &[])
    });
    assert!(result.is_err());
    assert_eq!(lix.key_value("a").unwrap(), Some(json!(1)));
    assert_consistent(&lix);
}
