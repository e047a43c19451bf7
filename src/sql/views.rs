//! SQL bodies of the virtual views

use std::collections::BTreeSet;

use crate::schema::{PropertyKind, SchemaDescriptor, ViewScope};
use crate::storage::{quote_identifier, quote_literal};

pub const STATE_VIEW: &str = "state";
pub const STATE_ALL_VIEW: &str = "state_all";
pub const ACTIVE_VERSION_VIEW: &str = "active_version";
/// Name view bodies use for `state_all` when a statement shadows it
pub const STATE_ALL_RELATION: &str = "lix_internal_state_all";
pub const VERSION_VIEW: &str = "version";

/// Columns of `state_all`, in order
pub const STATE_COLUMNS: &[&str] = &[
    "entity_id",
    "schema_key",
    "file_id",
    "version_id",
    "plugin_key",
    "schema_version",
    "snapshot_content",
    "inherited_from_version_id",
    "change_id",
    "commit_id",
    "created_at",
    "updated_at",
];

/// Metadata columns of entity views and the `state_all` column behind each
const LIXCOL_COLUMNS: &[(&str, &str)] = &[
    ("lixcol_entity_id", "entity_id"),
    ("lixcol_schema_key", "schema_key"),
    ("lixcol_file_id", "file_id"),
    ("lixcol_plugin_key", "plugin_key"),
    ("lixcol_schema_version", "schema_version"),
    ("lixcol_inherited_from_version_id", "inherited_from_version_id"),
    ("lixcol_change_id", "change_id"),
    ("lixcol_commit_id", "commit_id"),
    ("lixcol_created_at", "created_at"),
    ("lixcol_updated_at", "updated_at"),
];

pub const LIXCOL_VERSION_ID: &str = "lixcol_version_id";
pub const LIXCOL_FILE_ID: &str = "lixcol_file_id";

/// Body of a read-only system view, `None` for other names
pub fn system_view_sql(name: &str) -> Option<&'static str> {
    let sql = match name {
        "change" => {
            "SELECT c.id AS id, c.entity_id AS entity_id, c.schema_key AS schema_key, \
             c.schema_version AS schema_version, c.file_id AS file_id, c.plugin_key AS plugin_key, \
             c.snapshot_id AS snapshot_id, s.content AS snapshot_content, c.created_at AS created_at \
             FROM lix_internal_change AS c LEFT JOIN lix_internal_snapshot AS s ON s.id = c.snapshot_id"
        }
        "change_set" => "SELECT id FROM lix_internal_change_set",
        "change_set_element" => {
            "SELECT change_set_id, change_id, entity_id, schema_key, file_id \
             FROM lix_internal_change_set_element"
        }
        "commit" => "SELECT id, change_set_id, created_at FROM lix_internal_commit",
        "commit_edge" => "SELECT parent_id, child_id FROM lix_internal_commit_edge",
        "version" => {
            "SELECT id, name, commit_id, working_commit_id, inherits_from_version_id, hidden \
             FROM lix_internal_version"
        }
        "state" => {
            "SELECT * FROM state_all WHERE version_id IN (SELECT version_id FROM active_version)"
        }
        _ => return None,
    };
    Some(sql)
}

/// Body of an entity view over `state_all`
pub fn entity_view_sql(schema: &SchemaDescriptor, scope: ViewScope) -> String {
    let mut columns = Vec::with_capacity(schema.properties.len() + LIXCOL_COLUMNS.len() + 1);
    for property in &schema.properties {
        let path = quote_literal(&format!("$.{}", property.name));
        let extract = format!("json_extract(snapshot_content, {})", path);
        let expr = match property.kind {
            PropertyKind::Bytes => format!("unhex({})", extract),
            _ => extract,
        };
        columns.push(format!("{} AS {}", expr, quote_identifier(&property.name)));
    }
    for (alias, column) in LIXCOL_COLUMNS {
        columns.push(format!("{} AS {}", column, alias));
    }
    if scope == ViewScope::All {
        columns.push(format!("version_id AS {}", LIXCOL_VERSION_ID));
    }

    let mut sql = format!(
        "SELECT {} FROM state_all WHERE schema_key = {}",
        columns.join(", "),
        quote_literal(&schema.key)
    );
    if scope == ViewScope::Active {
        sql.push_str(" AND version_id IN (SELECT version_id FROM active_version)");
    }
    sql
}

/// `state_all` over the given cache tables
///
/// Each version sees its own direct rows and those of its ancestors; the
/// nearest one wins and a winning tombstone hides the entity. `versions`
/// restricts the versions produced, `None` produces every version.
pub fn state_all_sql(tables: &[String], versions: Option<&BTreeSet<String>>) -> String {
    if tables.is_empty() {
        let nulls: Vec<String> = STATE_COLUMNS
            .iter()
            .map(|column| format!("NULL AS {}", column))
            .collect();
        return format!("SELECT {} WHERE 0 = 1", nulls.join(", "));
    }

    let union = tables
        .iter()
        .map(|table| {
            format!(
                "SELECT entity_id, schema_key, file_id, version_id, plugin_key, schema_version, \
                 snapshot_content, is_tombstone, change_id, commit_id, created_at, updated_at \
                 FROM {}",
                quote_identifier(table)
            )
        })
        .collect::<Vec<_>>()
        .join(" UNION ALL ");

    let scope = match versions {
        Some(versions) => {
            let list: Vec<String> = versions.iter().map(|v| quote_literal(v)).collect();
            format!(" WHERE a.version_id IN ({})", list.join(", "))
        }
        None => String::new(),
    };

    format!(
        "SELECT entity_id, schema_key, file_id, version_id, plugin_key, schema_version, \
         snapshot_content, inherited_from_version_id, change_id, commit_id, created_at, updated_at \
         FROM (SELECT c.entity_id AS entity_id, c.schema_key AS schema_key, c.file_id AS file_id, \
         a.version_id AS version_id, c.plugin_key AS plugin_key, c.schema_version AS schema_version, \
         c.snapshot_content AS snapshot_content, c.is_tombstone AS is_tombstone, \
         CASE WHEN a.depth = 0 THEN NULL ELSE c.version_id END AS inherited_from_version_id, \
         c.change_id AS change_id, c.commit_id AS commit_id, c.created_at AS created_at, \
         c.updated_at AS updated_at, \
         ROW_NUMBER() OVER (PARTITION BY a.version_id, c.entity_id, c.schema_key, c.file_id ORDER BY a.depth) AS lix_rank \
         FROM lix_internal_version_ancestry AS a JOIN ({}) AS c ON c.version_id = a.ancestor_id{}) AS lix_resolved \
         WHERE lix_rank = 1 AND is_tombstone = 0",
        union, scope
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaRegistry;

    #[test]
    fn test_entity_view_projects_properties_and_metadata() {
        let registry = SchemaRegistry::with_builtins();
        let (schema, scope) = registry.by_view_name("key_value").unwrap();
        let sql = entity_view_sql(schema, scope);
        assert!(sql.contains("json_extract(snapshot_content, '$.key') AS \"key\""));
        assert!(sql.contains("entity_id AS lixcol_entity_id"));
        assert!(sql.contains("version_id IN (SELECT version_id FROM active_version)"));
        assert!(!sql.contains("lixcol_version_id"));
    }

    #[test]
    fn test_all_view_exposes_version_id() {
        let registry = SchemaRegistry::with_builtins();
        let (schema, scope) = registry.by_view_name("key_value_all").unwrap();
        let sql = entity_view_sql(schema, scope);
        assert!(sql.contains("version_id AS lixcol_version_id"));
        assert!(!sql.contains("active_version"));
    }

    #[test]
    fn test_bytes_are_unhexed() {
        let registry = SchemaRegistry::with_builtins();
        let (schema, scope) = registry.by_view_name("file").unwrap();
        assert!(entity_view_sql(schema, scope).contains("unhex(json_extract(snapshot_content, '$.data'))"));
    }

    #[test]
    fn test_state_all_without_tables_is_empty_relation() {
        let sql = state_all_sql(&[], None);
        assert!(sql.ends_with("WHERE 0 = 1"));
        assert!(sql.contains("NULL AS entity_id"));
    }

    #[test]
    fn test_state_all_scopes_versions() {
        let versions = BTreeSet::from(["main".to_string()]);
        let sql = state_all_sql(&["cache_a".to_string()], Some(&versions));
        assert!(sql.contains("FROM \"cache_a\""));
        assert!(sql.contains("WHERE a.version_id IN ('main')"));
    }
}
