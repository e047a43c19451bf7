//! Version rows and the operations that move them

use rusqlite::{params, OptionalExtension, Row};

use crate::commit::{create_empty_commit, load_graph, set_parents};
use crate::engine::Lix;
use crate::errors::{LixError, LixResult};
use crate::observability::{log_event_with_fields, Event};
use crate::state;
use crate::storage::Backend;

use super::inheritance::rebuild_ancestry;
use super::{CreateVersionOptions, FastForward, InheritsFrom, Version, GLOBAL_VERSION_ID};

const VERSION_COLUMNS: &str =
    "id, name, commit_id, working_commit_id, inherits_from_version_id, hidden";

fn version_from_row(row: &Row<'_>) -> rusqlite::Result<Version> {
    let hidden: i64 = row.get(5)?;
    Ok(Version {
        id: row.get(0)?,
        name: row.get(1)?,
        commit_id: row.get(2)?,
        working_commit_id: row.get(3)?,
        inherits_from_version_id: row.get(4)?,
        hidden: hidden != 0,
    })
}

pub fn get_version(backend: &Backend, id: &str) -> LixResult<Option<Version>> {
    let sql = format!("SELECT {} FROM lix_internal_version WHERE id = ?1", VERSION_COLUMNS);
    Ok(backend
        .connection()
        .query_row(&sql, params![id], version_from_row)
        .optional()?)
}

pub fn list_versions(backend: &Backend) -> LixResult<Vec<Version>> {
    let sql = format!("SELECT {} FROM lix_internal_version ORDER BY id", VERSION_COLUMNS);
    let mut stmt = backend.connection().prepare(&sql)?;
    let rows = stmt.query_map([], version_from_row)?;
    Ok(rows.collect::<Result<_, _>>()?)
}

pub fn insert_version(backend: &Backend, version: &Version) -> LixResult<()> {
    backend.connection().execute(
        "INSERT INTO lix_internal_version \
         (id, name, commit_id, working_commit_id, inherits_from_version_id, hidden) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            version.id,
            version.name,
            version.commit_id,
            version.working_commit_id,
            version.inherits_from_version_id,
            i64::from(version.hidden)
        ],
    )?;
    Ok(())
}

pub fn update_version_pointers(
    backend: &Backend,
    version_id: &str,
    commit_id: &str,
    working_commit_id: &str,
) -> LixResult<()> {
    backend.connection().execute(
        "UPDATE lix_internal_version SET commit_id = ?2, working_commit_id = ?3 WHERE id = ?1",
        params![version_id, commit_id, working_commit_id],
    )?;
    Ok(())
}

/// Persisted active version; `None` before initialization
pub fn load_active_version_id(backend: &Backend) -> LixResult<Option<String>> {
    Ok(backend
        .connection()
        .query_row(
            "SELECT version_id FROM lix_internal_active_version WHERE id = 1",
            [],
            |row| row.get(0),
        )
        .optional()?)
}

pub(crate) fn store_active_version_id(backend: &Backend, version_id: &str) -> LixResult<()> {
    backend.connection().execute(
        "INSERT INTO lix_internal_active_version (id, version_id) VALUES (1, ?1) \
         ON CONFLICT (id) DO UPDATE SET version_id = excluded.version_id",
        params![version_id],
    )?;
    Ok(())
}

fn require_version(backend: &Backend, id: &str) -> LixResult<Version> {
    get_version(backend, id)?.ok_or_else(|| LixError::not_found("version", id))
}

/// Branch a new version off `from` (the active version by default)
pub fn create_version(lix: &mut Lix, options: CreateVersionOptions) -> LixResult<Version> {
    lix.transaction(|lix| {
        let id = match options.id {
            Some(id) if id.trim().is_empty() => {
                return Err(LixError::InvalidInput("version id is empty".to_string()))
            }
            Some(id) => id,
            None => lix.deterministic.uuid(),
        };
        if get_version(&lix.backend, &id)?.is_some() {
            return Err(LixError::InvalidInput(format!("version '{}' already exists", id)));
        }

        let from_id = options
            .from
            .unwrap_or_else(|| lix.active_version_id.clone());
        let from = require_version(&lix.backend, &from_id)?;

        let inherits_from_version_id = match options.inherits_from {
            InheritsFrom::Default if id == GLOBAL_VERSION_ID => None,
            InheritsFrom::Default => Some(GLOBAL_VERSION_ID.to_string()),
            InheritsFrom::None => None,
            InheritsFrom::Version(parent) => {
                require_version(&lix.backend, &parent)?;
                Some(parent)
            }
        };

        let working = create_empty_commit(lix, std::slice::from_ref(&from.commit_id))?;
        let version = Version {
            name: options.name.unwrap_or_else(|| id.clone()),
            id,
            commit_id: from.commit_id,
            working_commit_id: working.id,
            inherits_from_version_id,
            hidden: options.hidden,
        };
        insert_version(&lix.backend, &version)?;
        rebuild_ancestry(&lix.backend)?;
        state::populate_version(lix, &version.id)?;

        lix.metrics.increment_versions_created();
        log_event_with_fields(Event::VersionCreated, &[("version_id", &version.id)]);
        Ok(version)
    })
}

pub fn switch_version(lix: &mut Lix, version_id: &str) -> LixResult<()> {
    lix.transaction(|lix| {
        require_version(&lix.backend, version_id)?;
        store_active_version_id(&lix.backend, version_id)?;
        Ok(())
    })?;
    lix.active_version_id = version_id.to_string();
    log_event_with_fields(Event::VersionSwitched, &[("version_id", version_id)]);
    Ok(())
}

pub fn rename_version(lix: &mut Lix, version_id: &str, name: &str) -> LixResult<()> {
    lix.transaction(|lix| {
        require_version(&lix.backend, version_id)?;
        lix.backend.connection().execute(
            "UPDATE lix_internal_version SET name = ?2 WHERE id = ?1",
            params![version_id, name],
        )?;
        Ok(())
    })
}

/// Change which version `version_id` inherits from; cycles are rejected
pub fn set_inheritance(lix: &mut Lix, version_id: &str, parent: Option<&str>) -> LixResult<()> {
    lix.transaction(|lix| {
        require_version(&lix.backend, version_id)?;
        if let Some(parent) = parent {
            require_version(&lix.backend, parent)?;
        }
        lix.backend.connection().execute(
            "UPDATE lix_internal_version SET inherits_from_version_id = ?2 WHERE id = ?1",
            params![version_id, parent],
        )?;
        rebuild_ancestry(&lix.backend)
    })
}

/// Remove a version pointer; its commits stay in history
pub fn delete_version(lix: &mut Lix, version_id: &str) -> LixResult<()> {
    lix.transaction(|lix| {
        require_version(&lix.backend, version_id)?;
        if version_id == GLOBAL_VERSION_ID {
            return Err(LixError::InvalidInput("the global version can't be deleted".to_string()));
        }
        if version_id == lix.active_version_id {
            return Err(LixError::InvalidInput(format!(
                "version '{}' is active; switch away before deleting it",
                version_id
            )));
        }
        let heirs: i64 = lix.backend.connection().query_row(
            "SELECT COUNT(*) FROM lix_internal_version WHERE inherits_from_version_id = ?1",
            params![version_id],
            |row| row.get(0),
        )?;
        if heirs > 0 {
            return Err(LixError::InvalidInput(format!(
                "version '{}' is inherited by {} other version(s)",
                version_id, heirs
            )));
        }

        lix.backend.connection().execute(
            "DELETE FROM lix_internal_version WHERE id = ?1",
            params![version_id],
        )?;
        rebuild_ancestry(&lix.backend)?;
        state::remove_version(lix, version_id)?;
        log_event_with_fields(Event::VersionDeleted, &[("version_id", version_id)]);
        Ok(())
    })
}

/// Move a version's tip to `commit_id` when that is a pure advance
///
/// The working commit is re-parented onto the new tip, keeping its
/// uncommitted changes.
pub fn fast_forward(lix: &mut Lix, version_id: &str, commit_id: &str) -> LixResult<FastForward> {
    lix.transaction(|lix| {
        let version = require_version(&lix.backend, version_id)?;
        if version.commit_id == commit_id {
            return Ok(FastForward::UpToDate);
        }

        let graph = load_graph(&lix.backend)?;
        if graph.is_ancestor(&version.commit_id, commit_id) {
            set_parents(&lix.backend, &version.working_commit_id, &[commit_id.to_string()])?;
            update_version_pointers(
                &lix.backend,
                &version.id,
                commit_id,
                &version.working_commit_id,
            )?;
            state::mark_stale(lix)?;
            return Ok(FastForward::Advanced);
        }
        if graph.is_ancestor(commit_id, &version.commit_id) {
            return Ok(FastForward::AlreadyAhead);
        }
        Ok(FastForward::Diverged {
            merge_base: graph.merge_base(&version.commit_id, commit_id),
        })
    })
}
