//! Per-schema state cache
//!
//! One physical table per schema key holds the direct rows of every version
//! (tombstones included). The cache moves through three states:
//!
//! - absent: no table for a schema yet; created on first use
//! - fresh: rows equal a replay of the change log
//! - stale: a structural change happened; the next read rebuilds every table
//!
//! Staleness is one flag in the meta table, so invalidation never touches
//! cache rows.

use std::collections::BTreeMap;

use rusqlite::{params, OptionalExtension};
use sha2::{Digest, Sha256};

use crate::engine::Lix;
use crate::errors::LixResult;
use crate::observability::{log_event, log_event_with_fields, Event};
use crate::storage::{quote_identifier, to_hex, Backend};

use super::materialize::{materialize, DirectRow};

pub const CACHE_TABLE_PREFIX: &str = "lix_internal_state_cache_v1_";

const STALE_META_KEY: &str = "state_cache_stale";

/// Physical table name for a schema key
///
/// Characters outside `[a-z0-9_]` are replaced; keys that needed
/// replacing get a hash suffix so distinct keys never share a table.
pub fn cache_table_name(schema_key: &str) -> String {
    let sanitized: String = schema_key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    if sanitized == schema_key {
        format!("{}{}", CACHE_TABLE_PREFIX, sanitized)
    } else {
        let digest = to_hex(&Sha256::digest(schema_key.as_bytes()));
        format!("{}{}_{}", CACHE_TABLE_PREFIX, sanitized, &digest[..8])
    }
}

/// In-memory mirror of the persisted staleness flag
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateCache {
    stale: bool,
}

impl StateCache {
    pub fn load(backend: &Backend) -> LixResult<Self> {
        let stale = backend.get_meta(STALE_META_KEY)?.as_deref() == Some("1");
        Ok(Self { stale })
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    fn set(&mut self, backend: &Backend, stale: bool) -> LixResult<()> {
        backend.set_meta(STALE_META_KEY, if stale { "1" } else { "0" })?;
        self.stale = stale;
        Ok(())
    }
}

/// Create the cache table for a schema if needed; returns its name
pub fn ensure_table(backend: &Backend, schema_key: &str) -> LixResult<String> {
    let table = cache_table_name(schema_key);
    let registered: Option<String> = backend
        .connection()
        .query_row(
            "SELECT table_name FROM lix_internal_state_cache_registry WHERE schema_key = ?1",
            params![schema_key],
            |row| row.get(0),
        )
        .optional()?;
    if registered.is_some() {
        return Ok(table);
    }

    let quoted = quote_identifier(&table);
    backend.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {quoted} (
           entity_id TEXT NOT NULL,
           schema_key TEXT NOT NULL,
           file_id TEXT NOT NULL,
           version_id TEXT NOT NULL,
           plugin_key TEXT NOT NULL,
           schema_version TEXT NOT NULL,
           snapshot_content TEXT,
           is_tombstone INTEGER NOT NULL,
           change_id TEXT NOT NULL,
           commit_id TEXT NOT NULL,
           created_at TEXT NOT NULL,
           updated_at TEXT NOT NULL,
           PRIMARY KEY (entity_id, file_id, version_id)
         )"
    ))?;
    backend.connection().execute(
        "INSERT INTO lix_internal_state_cache_registry (schema_key, table_name) VALUES (?1, ?2)",
        params![schema_key, table],
    )?;
    Ok(table)
}

/// Registered cache tables by schema key
pub fn registered_tables(backend: &Backend) -> LixResult<BTreeMap<String, String>> {
    let mut stmt = backend.connection().prepare(
        "SELECT schema_key, table_name FROM lix_internal_state_cache_registry ORDER BY schema_key",
    )?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    Ok(rows.collect::<Result<_, _>>()?)
}

fn upsert_row(backend: &Backend, table: &str, row: &DirectRow) -> LixResult<()> {
    backend.connection().execute(
        &format!(
            "INSERT INTO {} (entity_id, schema_key, file_id, version_id, plugin_key, schema_version, \
             snapshot_content, is_tombstone, change_id, commit_id, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12) \
             ON CONFLICT (entity_id, file_id, version_id) DO UPDATE SET \
             plugin_key = excluded.plugin_key, schema_version = excluded.schema_version, \
             snapshot_content = excluded.snapshot_content, is_tombstone = excluded.is_tombstone, \
             change_id = excluded.change_id, commit_id = excluded.commit_id, \
             created_at = excluded.created_at, updated_at = excluded.updated_at",
            quote_identifier(table)
        ),
        params![
            row.entity_id,
            row.schema_key,
            row.file_id,
            row.version_id,
            row.plugin_key,
            row.schema_version,
            row.snapshot_content,
            i64::from(row.is_tombstone()),
            row.change_id,
            row.commit_id,
            row.created_at,
            row.updated_at
        ],
    )?;
    Ok(())
}

fn insert_rows(backend: &Backend, rows: &[DirectRow]) -> LixResult<()> {
    let mut tables: BTreeMap<&str, String> = BTreeMap::new();
    for row in rows {
        let table = match tables.get(row.schema_key.as_str()) {
            Some(table) => table.clone(),
            None => {
                let table = ensure_table(backend, &row.schema_key)?;
                tables.insert(&row.schema_key, table.clone());
                table
            }
        };
        upsert_row(backend, &table, row)?;
    }
    Ok(())
}

/// Flag the cache for a full rebuild on the next read
pub fn mark_stale(lix: &mut Lix) -> LixResult<()> {
    if lix.cache.is_stale() {
        return Ok(());
    }
    lix.cache.set(&lix.backend, true)?;
    lix.metrics.increment_cache_invalidations();
    log_event(Event::CacheMarkedStale);
    Ok(())
}

/// Rebuild the cache if it is stale; returns whether a rebuild ran
pub fn ensure_fresh(lix: &mut Lix) -> LixResult<bool> {
    if !lix.cache.is_stale() {
        return Ok(false);
    }
    repopulate(lix)?;
    Ok(true)
}

/// Replace every cache row with a replay of the change log
pub fn repopulate(lix: &mut Lix) -> LixResult<()> {
    log_event(Event::CachePopulationBegin);
    let result = lix.transaction(|lix| {
        let rows = materialize(&lix.backend, None)?;
        for table in registered_tables(&lix.backend)?.values() {
            lix.backend
                .execute(&format!("DELETE FROM {}", quote_identifier(table)), &[])?;
        }
        insert_rows(&lix.backend, &rows)?;
        lix.cache.set(&lix.backend, false)?;
        Ok(rows.len())
    });

    match result {
        Ok(count) => {
            lix.metrics.increment_cache_populations();
            log_event_with_fields(Event::CachePopulationComplete, &[("rows", &count.to_string())]);
            Ok(())
        }
        Err(err) => {
            log_event_with_fields(
                Event::CachePopulationFailed,
                &[("code", err.code()), ("reason", &err.to_string())],
            );
            Err(err)
        }
    }
}

/// Fill the direct rows of one version; a stale cache is left for the full rebuild
pub fn populate_version(lix: &mut Lix, version_id: &str) -> LixResult<()> {
    if lix.cache.is_stale() {
        return Ok(());
    }
    lix.transaction(|lix| {
        remove_version_rows(&lix.backend, version_id)?;
        let rows = materialize(&lix.backend, Some(version_id))?;
        insert_rows(&lix.backend, &rows)
    })?;
    lix.metrics.increment_cache_version_populations();
    Ok(())
}

/// Synchronously apply one freshly written direct row
pub fn write_through(lix: &mut Lix, row: &DirectRow) -> LixResult<()> {
    if lix.cache.is_stale() {
        return Ok(());
    }
    let table = ensure_table(&lix.backend, &row.schema_key)?;
    upsert_row(&lix.backend, &table, row)
}

/// Point a version's cached rows from one commit at another after sealing
pub fn retarget_commit(lix: &mut Lix, version_id: &str, from: &str, to: &str) -> LixResult<()> {
    if lix.cache.is_stale() {
        return Ok(());
    }
    for table in registered_tables(&lix.backend)?.values() {
        lix.backend.connection().execute(
            &format!(
                "UPDATE {} SET commit_id = ?3 WHERE version_id = ?1 AND commit_id = ?2",
                quote_identifier(table)
            ),
            params![version_id, from, to],
        )?;
    }
    Ok(())
}

fn remove_version_rows(backend: &Backend, version_id: &str) -> LixResult<()> {
    for table in registered_tables(backend)?.values() {
        backend.connection().execute(
            &format!("DELETE FROM {} WHERE version_id = ?1", quote_identifier(table)),
            params![version_id],
        )?;
    }
    Ok(())
}

/// Drop the cached rows of a deleted version
pub fn remove_version(lix: &mut Lix, version_id: &str) -> LixResult<()> {
    remove_version_rows(&lix.backend, version_id)
}

/// All cached direct rows, ordered like `materialize` output
pub fn cached_rows(backend: &Backend) -> LixResult<Vec<DirectRow>> {
    let mut rows = Vec::new();
    for table in registered_tables(backend)?.values() {
        let mut stmt = backend.connection().prepare(&format!(
            "SELECT version_id, entity_id, schema_key, schema_version, file_id, plugin_key, \
             snapshot_content, change_id, commit_id, created_at, updated_at FROM {}",
            quote_identifier(table)
        ))?;
        let mapped = stmt.query_map([], |row| {
            Ok(DirectRow {
                version_id: row.get(0)?,
                entity_id: row.get(1)?,
                schema_key: row.get(2)?,
                schema_version: row.get(3)?,
                file_id: row.get(4)?,
                plugin_key: row.get(5)?,
                snapshot_content: row.get(6)?,
                change_id: row.get(7)?,
                commit_id: row.get(8)?,
                created_at: row.get(9)?,
                updated_at: row.get(10)?,
            })
        })?;
        for row in mapped {
            rows.push(row?);
        }
    }
    rows.sort_by(|a, b| {
        (&a.version_id, &a.schema_key, &a.entity_id, &a.file_id)
            .cmp(&(&b.version_id, &b.schema_key, &b.entity_id, &b.file_id))
    });
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_name_sanitizing() {
        assert_eq!(
            cache_table_name("lix_key_value"),
            "lix_internal_state_cache_v1_lix_key_value"
        );
        let dotted = cache_table_name("plugin.line");
        let underscored = cache_table_name("plugin_line");
        assert!(dotted.starts_with("lix_internal_state_cache_v1_plugin_line_"));
        assert_ne!(dotted, underscored);
        assert_ne!(cache_table_name("Upper"), cache_table_name("upper"));
    }

    #[test]
    fn test_ensure_table_registers_once() {
        let backend = Backend::open_in_memory().unwrap();
        let first = ensure_table(&backend, "lix_key_value").unwrap();
        let second = ensure_table(&backend, "lix_key_value").unwrap();
        assert_eq!(first, second);
        assert!(backend.table_exists(&first).unwrap());
        assert_eq!(registered_tables(&backend).unwrap().len(), 1);
    }

    #[test]
    fn test_stale_flag_persists() {
        let backend = Backend::open_in_memory().unwrap();
        let mut cache = StateCache::load(&backend).unwrap();
        assert!(!cache.is_stale());
        cache.set(&backend, true).unwrap();
        assert!(StateCache::load(&backend).unwrap().is_stale());
    }
}
