//! Physical tables
//!
//! Everything the engine persists. The change log, snapshots, commits and
//! versions are the source of truth; the per-schema cache tables (created
//! on demand by `state::cache`) are derived and rebuildable.

use rusqlite::Connection;

pub const SNAPSHOT_TABLE: &str = "lix_internal_snapshot";
pub const CHANGE_TABLE: &str = "lix_internal_change";
pub const CHANGE_EDGE_TABLE: &str = "lix_internal_change_edge";
pub const CHANGE_SET_TABLE: &str = "lix_internal_change_set";
pub const CHANGE_SET_ELEMENT_TABLE: &str = "lix_internal_change_set_element";
pub const COMMIT_TABLE: &str = "lix_internal_commit";
pub const COMMIT_EDGE_TABLE: &str = "lix_internal_commit_edge";
pub const VERSION_TABLE: &str = "lix_internal_version";
pub const VERSION_ANCESTRY_TABLE: &str = "lix_internal_version_ancestry";
pub const ACTIVE_VERSION_TABLE: &str = "lix_internal_active_version";
pub const META_TABLE: &str = "lix_internal_meta";
pub const CACHE_REGISTRY_TABLE: &str = "lix_internal_state_cache_registry";

/// Engine tables, referenced tables before the tables pointing at them
pub const ENGINE_TABLES: &[&str] = &[
    META_TABLE,
    SNAPSHOT_TABLE,
    CHANGE_TABLE,
    CHANGE_EDGE_TABLE,
    CHANGE_SET_TABLE,
    CHANGE_SET_ELEMENT_TABLE,
    COMMIT_TABLE,
    COMMIT_EDGE_TABLE,
    VERSION_TABLE,
    VERSION_ANCESTRY_TABLE,
    ACTIVE_VERSION_TABLE,
    CACHE_REGISTRY_TABLE,
];

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS lix_internal_meta (
  key TEXT PRIMARY KEY,
  value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS lix_internal_snapshot (
  id TEXT PRIMARY KEY,
  content TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS lix_internal_change (
  id TEXT PRIMARY KEY,
  entity_id TEXT NOT NULL,
  schema_key TEXT NOT NULL,
  schema_version TEXT NOT NULL,
  file_id TEXT NOT NULL,
  plugin_key TEXT NOT NULL,
  snapshot_id TEXT REFERENCES lix_internal_snapshot (id),
  created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS lix_internal_change_entity_idx
  ON lix_internal_change (entity_id, schema_key, file_id);

CREATE TABLE IF NOT EXISTS lix_internal_change_edge (
  parent_id TEXT NOT NULL,
  child_id TEXT NOT NULL,
  PRIMARY KEY (parent_id, child_id)
);

CREATE INDEX IF NOT EXISTS lix_internal_change_edge_child_idx
  ON lix_internal_change_edge (child_id);

CREATE TABLE IF NOT EXISTS lix_internal_change_set (
  id TEXT PRIMARY KEY
);

CREATE TABLE IF NOT EXISTS lix_internal_change_set_element (
  change_set_id TEXT NOT NULL,
  change_id TEXT NOT NULL,
  entity_id TEXT NOT NULL,
  schema_key TEXT NOT NULL,
  file_id TEXT NOT NULL,
  PRIMARY KEY (change_set_id, entity_id, schema_key, file_id)
);

CREATE TABLE IF NOT EXISTS lix_internal_commit (
  id TEXT PRIMARY KEY,
  change_set_id TEXT NOT NULL,
  created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS lix_internal_commit_edge (
  parent_id TEXT NOT NULL,
  child_id TEXT NOT NULL,
  PRIMARY KEY (parent_id, child_id)
);

CREATE INDEX IF NOT EXISTS lix_internal_commit_edge_child_idx
  ON lix_internal_commit_edge (child_id);

CREATE TABLE IF NOT EXISTS lix_internal_version (
  id TEXT PRIMARY KEY,
  name TEXT NOT NULL,
  commit_id TEXT NOT NULL,
  working_commit_id TEXT NOT NULL,
  inherits_from_version_id TEXT,
  hidden INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS lix_internal_version_ancestry (
  version_id TEXT NOT NULL,
  ancestor_id TEXT NOT NULL,
  depth INTEGER NOT NULL,
  PRIMARY KEY (version_id, ancestor_id)
);

CREATE TABLE IF NOT EXISTS lix_internal_active_version (
  id INTEGER PRIMARY KEY CHECK (id = 1),
  version_id TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS lix_internal_state_cache_registry (
  schema_key TEXT PRIMARY KEY,
  table_name TEXT NOT NULL
);
"#;

/// Create every engine table that does not exist yet
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();

        for table in [
            SNAPSHOT_TABLE,
            CHANGE_TABLE,
            CHANGE_EDGE_TABLE,
            CHANGE_SET_TABLE,
            CHANGE_SET_ELEMENT_TABLE,
            COMMIT_TABLE,
            COMMIT_EDGE_TABLE,
            VERSION_TABLE,
            VERSION_ANCESTRY_TABLE,
            ACTIVE_VERSION_TABLE,
            META_TABLE,
            CACHE_REGISTRY_TABLE,
        ] {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "missing table {}", table);
        }
    }
}
