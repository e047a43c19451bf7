//! Append-only change log and change-level parent edges

use rusqlite::{params, OptionalExtension, Row};

use crate::errors::LixResult;
use crate::storage::Backend;

use super::Change;

const CHANGE_COLUMNS: &str =
    "id, entity_id, schema_key, schema_version, file_id, plugin_key, snapshot_id, created_at";

fn change_from_row(row: &Row<'_>) -> rusqlite::Result<Change> {
    Ok(Change {
        id: row.get(0)?,
        entity_id: row.get(1)?,
        schema_key: row.get(2)?,
        schema_version: row.get(3)?,
        file_id: row.get(4)?,
        plugin_key: row.get(5)?,
        snapshot_id: row.get(6)?,
        created_at: row.get(7)?,
    })
}

/// Append a change row; returns `false` if the id already exists
pub fn insert_change(backend: &Backend, change: &Change) -> LixResult<bool> {
    let inserted = backend.connection().execute(
        "INSERT OR IGNORE INTO lix_internal_change \
         (id, entity_id, schema_key, schema_version, file_id, plugin_key, snapshot_id, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            change.id,
            change.entity_id,
            change.schema_key,
            change.schema_version,
            change.file_id,
            change.plugin_key,
            change.snapshot_id,
            change.created_at
        ],
    )?;
    Ok(inserted > 0)
}

pub fn get_change(backend: &Backend, id: &str) -> LixResult<Option<Change>> {
    let sql = format!("SELECT {} FROM lix_internal_change WHERE id = ?1", CHANGE_COLUMNS);
    Ok(backend
        .connection()
        .query_row(&sql, params![id], change_from_row)
        .optional()?)
}

pub fn change_exists(backend: &Backend, id: &str) -> LixResult<bool> {
    let count: i64 = backend.connection().query_row(
        "SELECT COUNT(*) FROM lix_internal_change WHERE id = ?1",
        params![id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Every change ever written for one entity, oldest first
pub fn changes_for_entity(
    backend: &Backend,
    entity_id: &str,
    schema_key: &str,
    file_id: &str,
) -> LixResult<Vec<Change>> {
    let sql = format!(
        "SELECT {} FROM lix_internal_change \
         WHERE entity_id = ?1 AND schema_key = ?2 AND file_id = ?3 \
         ORDER BY created_at, id",
        CHANGE_COLUMNS
    );
    let mut stmt = backend.connection().prepare(&sql)?;
    let rows = stmt.query_map(params![entity_id, schema_key, file_id], change_from_row)?;
    Ok(rows.collect::<Result<_, _>>()?)
}

pub fn insert_change_edge(backend: &Backend, parent_id: &str, child_id: &str) -> LixResult<()> {
    backend.connection().execute(
        "INSERT OR IGNORE INTO lix_internal_change_edge (parent_id, child_id) VALUES (?1, ?2)",
        params![parent_id, child_id],
    )?;
    Ok(())
}

pub fn change_parents(backend: &Backend, child_id: &str) -> LixResult<Vec<String>> {
    let mut stmt = backend.connection().prepare(
        "SELECT parent_id FROM lix_internal_change_edge WHERE child_id = ?1 ORDER BY parent_id",
    )?;
    let rows = stmt.query_map(params![child_id], |row| row.get(0))?;
    Ok(rows.collect::<Result<_, _>>()?)
}

/// Edges whose child is one of `child_ids`
pub fn change_edges_for(backend: &Backend, child_ids: &[String]) -> LixResult<Vec<(String, String)>> {
    let mut stmt = backend.connection().prepare(
        "SELECT parent_id, child_id FROM lix_internal_change_edge WHERE child_id = ?1 ORDER BY parent_id",
    )?;
    let mut edges = Vec::new();
    for child in child_ids {
        let rows = stmt.query_map(params![child], |row| Ok((row.get(0)?, row.get(1)?)))?;
        for edge in rows {
            edges.push(edge?);
        }
    }
    Ok(edges)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(id: &str, entity: &str, created_at: &str) -> Change {
        Change {
            id: id.to_string(),
            entity_id: entity.to_string(),
            schema_key: "lix_key_value".to_string(),
            schema_version: "1.0".to_string(),
            file_id: "lix".to_string(),
            plugin_key: "lix_own_entity".to_string(),
            snapshot_id: None,
            created_at: created_at.to_string(),
        }
    }

    #[test]
    fn test_insert_is_append_only() {
        let backend = Backend::open_in_memory().unwrap();
        assert!(insert_change(&backend, &change("c1", "a", "t1")).unwrap());
        let mut replaced = change("c1", "b", "t2");
        replaced.snapshot_id = Some("x".into());
        assert!(!insert_change(&backend, &replaced).unwrap());

        let stored = get_change(&backend, "c1").unwrap().unwrap();
        assert_eq!(stored.entity_id, "a");
        assert!(stored.is_tombstone());
    }

    #[test]
    fn test_changes_for_entity_ordered() {
        let backend = Backend::open_in_memory().unwrap();
        insert_change(&backend, &change("c2", "a", "t2")).unwrap();
        insert_change(&backend, &change("c1", "a", "t1")).unwrap();
        insert_change(&backend, &change("c3", "b", "t3")).unwrap();

        let ids: Vec<String> = changes_for_entity(&backend, "a", "lix_key_value", "lix")
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec!["c1", "c2"]);
    }

    #[test]
    fn test_change_edges() {
        let backend = Backend::open_in_memory().unwrap();
        insert_change_edge(&backend, "c1", "c2").unwrap();
        insert_change_edge(&backend, "c1", "c2").unwrap();
        insert_change_edge(&backend, "c0", "c2").unwrap();
        assert_eq!(change_parents(&backend, "c2").unwrap(), vec!["c0", "c1"]);
        assert!(change_parents(&backend, "c1").unwrap().is_empty());
        assert_eq!(change_edges_for(&backend, &["c2".to_string()]).unwrap().len(), 2);
    }
}
