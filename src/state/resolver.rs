//! Point lookups of resolved entity state

use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use serde_json::Value;

use crate::engine::Lix;
use crate::errors::LixResult;
use crate::storage::quote_identifier;
use crate::version::ancestry_chain;

use super::cache::{ensure_fresh, ensure_table};

/// Current value of an entity as seen from one version
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedEntity {
    pub entity_id: String,
    pub schema_key: String,
    pub file_id: String,
    pub version_id: String,
    pub schema_version: String,
    pub plugin_key: String,
    pub snapshot_content: Value,
    /// Version the value was inherited from; `None` for the version's own rows
    pub inherited_from_version_id: Option<String>,
    pub change_id: String,
    pub commit_id: String,
    pub created_at: String,
    pub updated_at: String,
}

struct CachedRow {
    schema_version: String,
    plugin_key: String,
    snapshot_content: Option<String>,
    change_id: String,
    commit_id: String,
    created_at: String,
    updated_at: String,
}

/// Direct row winning for an entity when walking a version's inheritance chain
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct VisibleRow {
    /// Version holding the row
    pub version_id: String,
    pub depth: usize,
    pub change_id: String,
    pub created_at: String,
    pub is_tombstone: bool,
}

fn lookup_chain(
    lix: &mut Lix,
    entity_id: &str,
    schema_key: &str,
    file_id: &str,
    version_id: &str,
) -> LixResult<Option<(String, usize, CachedRow)>> {
    ensure_fresh(lix)?;
    let table = quote_identifier(&ensure_table(&lix.backend, schema_key)?);
    let sql = format!(
        "SELECT schema_version, plugin_key, snapshot_content, change_id, commit_id, created_at, updated_at \
         FROM {} WHERE entity_id = ?1 AND file_id = ?2 AND version_id = ?3",
        table
    );

    for (ancestor, depth) in ancestry_chain(&lix.backend, version_id)? {
        let row = lix
            .backend
            .connection()
            .query_row(&sql, params![entity_id, file_id, ancestor], |row| {
                Ok(CachedRow {
                    schema_version: row.get(0)?,
                    plugin_key: row.get(1)?,
                    snapshot_content: row.get(2)?,
                    change_id: row.get(3)?,
                    commit_id: row.get(4)?,
                    created_at: row.get(5)?,
                    updated_at: row.get(6)?,
                })
            })
            .optional()?;
        if let Some(row) = row {
            return Ok(Some((ancestor, depth, row)));
        }
    }
    Ok(None)
}

/// The row an entity currently resolves to, tombstones included
pub(crate) fn visible_row(
    lix: &mut Lix,
    entity_id: &str,
    schema_key: &str,
    file_id: &str,
    version_id: &str,
) -> LixResult<Option<VisibleRow>> {
    Ok(lookup_chain(lix, entity_id, schema_key, file_id, version_id)?.map(
        |(ancestor, depth, row)| VisibleRow {
            version_id: ancestor,
            depth,
            is_tombstone: row.snapshot_content.is_none(),
            change_id: row.change_id,
            created_at: row.created_at,
        },
    ))
}

/// Resolve an entity in `version_id`, following inheritance
///
/// Walks the version's inheritance chain nearest first; the first version
/// holding a direct row decides. A tombstone there means not found.
pub fn resolve(
    lix: &mut Lix,
    entity_id: &str,
    schema_key: &str,
    file_id: &str,
    version_id: &str,
) -> LixResult<Option<ResolvedEntity>> {
    let Some((ancestor, depth, row)) =
        lookup_chain(lix, entity_id, schema_key, file_id, version_id)?
    else {
        return Ok(None);
    };
    let Some(content) = row.snapshot_content else {
        return Ok(None);
    };
    Ok(Some(ResolvedEntity {
        entity_id: entity_id.to_string(),
        schema_key: schema_key.to_string(),
        file_id: file_id.to_string(),
        version_id: version_id.to_string(),
        schema_version: row.schema_version,
        plugin_key: row.plugin_key,
        snapshot_content: serde_json::from_str(&content)?,
        inherited_from_version_id: (depth > 0).then_some(ancestor),
        change_id: row.change_id,
        commit_id: row.commit_id,
        created_at: row.created_at,
        updated_at: row.updated_at,
    }))
}
