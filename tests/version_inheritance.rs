//! Version Inheritance Tests
//!
//! A version resolves entities it never touched to the nearest inherited
//! version's value. Its own rows, tombstones included, always win. Cycles
//! in the inheritance chain are rejected.

use lix::change::{write_change, ChangeInput};
use lix::schema::{KEY_VALUE_SCHEMA_KEY, LIX_FILE_ID};
use lix::state::resolve;
use lix::version::{
    create_version, delete_version, set_inheritance, switch_version, CreateVersionOptions,
    InheritsFrom, GLOBAL_VERSION_ID, MAIN_VERSION_ID,
};
use lix::{Lix, LixConfig};
use serde_json::json;

// =============================================================================
// Test Utilities
// =============================================================================

fn open() -> Lix {
    Lix::open(LixConfig::deterministic(3)).unwrap()
}

fn set_in(lix: &mut Lix, version_id: &str, key: &str, value: serde_json::Value) {
    write_change(
        lix,
        Some(version_id),
        ChangeInput::new(key, KEY_VALUE_SCHEMA_KEY, json!({"key": key, "value": value})),
    )
    .unwrap();
}

fn value_in(lix: &mut Lix, version_id: &str, key: &str) -> Option<serde_json::Value> {
    resolve(lix, key, KEY_VALUE_SCHEMA_KEY, LIX_FILE_ID, version_id)
        .unwrap()
        .map(|entity| entity.snapshot_content["value"].clone())
}

// =============================================================================
// Fallback
// =============================================================================

#[test]
fn test_untouched_entities_fall_back_to_parent() {
    let mut lix = open();
    set_in(&mut lix, GLOBAL_VERSION_ID, "shared", json!(1));

    let entity = resolve(&mut lix, "shared", KEY_VALUE_SCHEMA_KEY, LIX_FILE_ID, MAIN_VERSION_ID)
        .unwrap()
        .unwrap();
    assert_eq!(entity.snapshot_content["value"], json!(1));
    assert_eq!(entity.inherited_from_version_id.as_deref(), Some(GLOBAL_VERSION_ID));
}

#[test]
fn test_own_row_overrides_parent() {
    let mut lix = open();
    set_in(&mut lix, GLOBAL_VERSION_ID, "shared", json!(1));
    let updated = lix
        .execute("UPDATE key_value SET value = 2 WHERE key = 'shared'", &[])
        .unwrap();
    assert_eq!(updated.rows_affected, 1);

    let entity = resolve(&mut lix, "shared", KEY_VALUE_SCHEMA_KEY, LIX_FILE_ID, MAIN_VERSION_ID)
        .unwrap()
        .unwrap();
    assert_eq!(entity.snapshot_content["value"], json!(2));
    assert!(entity.inherited_from_version_id.is_none());
    assert_eq!(value_in(&mut lix, GLOBAL_VERSION_ID, "shared"), Some(json!(1)));
}

#[test]
fn test_tombstone_blocks_inheritance() {
    let mut lix = open();
    set_in(&mut lix, GLOBAL_VERSION_ID, "gone", json!("here"));
    lix.write(ChangeInput::tombstone("gone", KEY_VALUE_SCHEMA_KEY)).unwrap();

    assert_eq!(value_in(&mut lix, MAIN_VERSION_ID, "gone"), None);
    assert_eq!(value_in(&mut lix, GLOBAL_VERSION_ID, "gone"), Some(json!("here")));

    let rows = lix
        .execute("SELECT key FROM key_value WHERE key = 'gone'", &[])
        .unwrap();
    assert!(rows.is_empty());
}

#[test]
fn test_insert_over_inherited_entity_is_rejected() {
    let mut lix = open();
    set_in(&mut lix, GLOBAL_VERSION_ID, "shared", json!(1));
    let err = lix
        .execute("INSERT INTO key_value (key, value) VALUES ('shared', 2)", &[])
        .unwrap_err();
    assert_eq!(err.code(), "LIX_INVALID_INPUT");
}

#[test]
fn test_chain_of_three_resolves_nearest() {
    let mut lix = open();
    create_version(
        &mut lix,
        CreateVersionOptions::with_id("child").inherits_from(InheritsFrom::Version(MAIN_VERSION_ID.into())),
    )
    .unwrap();

    set_in(&mut lix, GLOBAL_VERSION_ID, "k", json!("global"));
    assert_eq!(value_in(&mut lix, "child", "k"), Some(json!("global")));

    set_in(&mut lix, MAIN_VERSION_ID, "k", json!("main"));
    let entity = resolve(&mut lix, "k", KEY_VALUE_SCHEMA_KEY, LIX_FILE_ID, "child")
        .unwrap()
        .unwrap();
    assert_eq!(entity.snapshot_content["value"], json!("main"));
    assert_eq!(entity.inherited_from_version_id.as_deref(), Some(MAIN_VERSION_ID));
}

#[test]
fn test_no_inheritance_sees_only_own_rows() {
    let mut lix = open();
    create_version(
        &mut lix,
        CreateVersionOptions::with_id("island").inherits_from(InheritsFrom::None),
    )
    .unwrap();
    set_in(&mut lix, GLOBAL_VERSION_ID, "k", json!(1));
    assert_eq!(value_in(&mut lix, "island", "k"), None);
}

// =============================================================================
// Structure
// =============================================================================

#[test]
fn test_inheritance_cycles_are_rejected() {
    let mut lix = open();
    create_version(
        &mut lix,
        CreateVersionOptions::with_id("a").inherits_from(InheritsFrom::Version(MAIN_VERSION_ID.into())),
    )
    .unwrap();

    let err = set_inheritance(&mut lix, MAIN_VERSION_ID, Some("a")).unwrap_err();
    assert_eq!(err.code(), "LIX_INHERITANCE_CYCLE");

    let main = lix
        .versions()
        .unwrap()
        .into_iter()
        .find(|v| v.id == MAIN_VERSION_ID)
        .unwrap();
    assert_eq!(main.inherits_from_version_id.as_deref(), Some(GLOBAL_VERSION_ID));
}

#[test]
fn test_delete_rules() {
    let mut lix = open();
    create_version(&mut lix, CreateVersionOptions::with_id("temp")).unwrap();

    assert!(delete_version(&mut lix, GLOBAL_VERSION_ID).is_err());
    assert!(delete_version(&mut lix, MAIN_VERSION_ID).is_err());

    switch_version(&mut lix, "temp").unwrap();
    assert!(delete_version(&mut lix, "temp").is_err());
    switch_version(&mut lix, MAIN_VERSION_ID).unwrap();
    delete_version(&mut lix, "temp").unwrap();
    assert!(lix.versions().unwrap().iter().all(|v| v.id != "temp"));
}

#[test]
fn test_branch_starts_from_source_tip() {
    let mut lix = open();
    set_in(&mut lix, MAIN_VERSION_ID, "k", json!("before"));
    let tip = lix.commit().unwrap();

    let branch = create_version(&mut lix, CreateVersionOptions::with_id("branch")).unwrap();
    assert_eq!(branch.commit_id, tip.id);
    assert_eq!(branch.inherits_from_version_id.as_deref(), Some(GLOBAL_VERSION_ID));
    assert_eq!(value_in(&mut lix, "branch", "k"), Some(json!("before")));

    set_in(&mut lix, "branch", "k", json!("after"));
    assert_eq!(value_in(&mut lix, MAIN_VERSION_ID, "k"), Some(json!("before")));
}
