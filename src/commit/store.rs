//! Persistence of change sets and commits

use rusqlite::{params, OptionalExtension};

use crate::change::Change;
use crate::errors::{LixError, LixResult};
use crate::storage::Backend;

use super::graph::CommitGraph;
use super::{ChangeSetElement, Commit};

pub fn insert_change_set(backend: &Backend, id: &str) -> LixResult<()> {
    backend.connection().execute(
        "INSERT OR IGNORE INTO lix_internal_change_set (id) VALUES (?1)",
        params![id],
    )?;
    Ok(())
}

/// Point the change set's element for this change's entity at the change
pub fn upsert_change_set_element(backend: &Backend, change_set_id: &str, change: &Change) -> LixResult<()> {
    backend.connection().execute(
        "INSERT INTO lix_internal_change_set_element \
         (change_set_id, change_id, entity_id, schema_key, file_id) VALUES (?1, ?2, ?3, ?4, ?5) \
         ON CONFLICT (change_set_id, entity_id, schema_key, file_id) \
         DO UPDATE SET change_id = excluded.change_id",
        params![
            change_set_id,
            change.id,
            change.entity_id,
            change.schema_key,
            change.file_id
        ],
    )?;
    Ok(())
}

/// Re-home every element of one change set into another
pub fn move_change_set_elements(backend: &Backend, from: &str, to: &str) -> LixResult<usize> {
    Ok(backend.connection().execute(
        "UPDATE lix_internal_change_set_element SET change_set_id = ?2 WHERE change_set_id = ?1",
        params![from, to],
    )?)
}

pub fn change_set_elements(backend: &Backend, change_set_id: &str) -> LixResult<Vec<ChangeSetElement>> {
    let mut stmt = backend.connection().prepare(
        "SELECT change_set_id, change_id, entity_id, schema_key, file_id \
         FROM lix_internal_change_set_element WHERE change_set_id = ?1 \
         ORDER BY schema_key, entity_id, file_id",
    )?;
    let rows = stmt.query_map(params![change_set_id], |row| {
        Ok(ChangeSetElement {
            change_set_id: row.get(0)?,
            change_id: row.get(1)?,
            entity_id: row.get(2)?,
            schema_key: row.get(3)?,
            file_id: row.get(4)?,
        })
    })?;
    Ok(rows.collect::<Result<_, _>>()?)
}

pub fn commit_exists(backend: &Backend, id: &str) -> LixResult<bool> {
    let count: i64 = backend.connection().query_row(
        "SELECT COUNT(*) FROM lix_internal_commit WHERE id = ?1",
        params![id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn parent_ids(backend: &Backend, id: &str) -> LixResult<Vec<String>> {
    let mut stmt = backend.connection().prepare(
        "SELECT parent_id FROM lix_internal_commit_edge WHERE child_id = ?1 ORDER BY parent_id",
    )?;
    let rows = stmt.query_map(params![id], |row| row.get(0))?;
    Ok(rows.collect::<Result<_, _>>()?)
}

pub fn get_commit(backend: &Backend, id: &str) -> LixResult<Option<Commit>> {
    let row: Option<(String, String, String)> = backend
        .connection()
        .query_row(
            "SELECT id, change_set_id, created_at FROM lix_internal_commit WHERE id = ?1",
            params![id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;
    match row {
        Some((id, change_set_id, created_at)) => {
            let parent_ids = parent_ids(backend, &id)?;
            Ok(Some(Commit {
                id,
                change_set_id,
                created_at,
                parent_ids,
            }))
        }
        None => Ok(None),
    }
}

/// Insert a commit and its parent edges; every parent must already exist
pub fn insert_commit(backend: &Backend, commit: &Commit) -> LixResult<()> {
    for parent in &commit.parent_ids {
        if !commit_exists(backend, parent)? {
            return Err(LixError::UnknownParentCommit {
                commit_id: commit.id.clone(),
                parent_id: parent.clone(),
            });
        }
    }
    backend.connection().execute(
        "INSERT INTO lix_internal_commit (id, change_set_id, created_at) VALUES (?1, ?2, ?3)",
        params![commit.id, commit.change_set_id, commit.created_at],
    )?;
    for parent in &commit.parent_ids {
        backend.connection().execute(
            "INSERT OR IGNORE INTO lix_internal_commit_edge (parent_id, child_id) VALUES (?1, ?2)",
            params![parent, commit.id],
        )?;
    }
    Ok(())
}

/// Replace a commit's parents
pub fn set_parents(backend: &Backend, commit_id: &str, parents: &[String]) -> LixResult<()> {
    backend.connection().execute(
        "DELETE FROM lix_internal_commit_edge WHERE child_id = ?1",
        params![commit_id],
    )?;
    for parent in parents {
        backend.connection().execute(
            "INSERT OR IGNORE INTO lix_internal_commit_edge (parent_id, child_id) VALUES (?1, ?2)",
            params![parent, commit_id],
        )?;
    }
    Ok(())
}

pub fn load_graph(backend: &Backend) -> LixResult<CommitGraph> {
    let mut stmt = backend
        .connection()
        .prepare("SELECT parent_id, child_id FROM lix_internal_commit_edge")?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    let edges: Vec<(String, String)> = rows.collect::<Result<_, _>>()?;
    Ok(CommitGraph::from_edges(edges))
}
