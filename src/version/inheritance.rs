//! Version inheritance
//!
//! Each version inherits from at most one other version. The transitive
//! chains are materialized into `lix_internal_version_ancestry` as
//! `(version_id, ancestor_id, depth)` rows, depth 0 being the version itself,
//! so state reads can resolve inheritance with one join.

use std::collections::{BTreeMap, BTreeSet};

use rusqlite::params;

use crate::errors::{LixError, LixResult};
use crate::storage::Backend;

/// Inheritance chain of `start`, nearest first, starting with `(start, 0)`
///
/// A parent that is not a known version ends the chain.
pub fn chain_from_parents(
    parents: &BTreeMap<String, Option<String>>,
    start: &str,
) -> LixResult<Vec<(String, usize)>> {
    let mut chain = vec![(start.to_string(), 0)];
    let mut visited = BTreeSet::from([start.to_string()]);
    let mut current = start.to_string();

    while let Some(Some(parent)) = parents.get(&current) {
        if !parents.contains_key(parent) {
            break;
        }
        if !visited.insert(parent.clone()) {
            return Err(LixError::InheritanceCycle {
                version_id: parent.clone(),
            });
        }
        chain.push((parent.clone(), chain.len()));
        current = parent.clone();
    }
    Ok(chain)
}

fn load_parents(backend: &Backend) -> LixResult<BTreeMap<String, Option<String>>> {
    let mut stmt = backend
        .connection()
        .prepare("SELECT id, inherits_from_version_id FROM lix_internal_version")?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    Ok(rows.collect::<Result<_, _>>()?)
}

/// Recompute the ancestry table from the version rows
pub fn rebuild_ancestry(backend: &Backend) -> LixResult<()> {
    let parents = load_parents(backend)?;
    let mut rows = Vec::new();
    for version_id in parents.keys() {
        for (ancestor, depth) in chain_from_parents(&parents, version_id)? {
            rows.push((version_id.clone(), ancestor, depth));
        }
    }

    backend
        .connection()
        .execute("DELETE FROM lix_internal_version_ancestry", [])?;
    let mut insert = backend.connection().prepare(
        "INSERT INTO lix_internal_version_ancestry (version_id, ancestor_id, depth) VALUES (?1, ?2, ?3)",
    )?;
    for (version_id, ancestor, depth) in rows {
        insert.execute(params![version_id, ancestor, depth as i64])?;
    }
    Ok(())
}

/// Materialized chain of one version, nearest first; empty for unknown versions
pub fn ancestry_chain(backend: &Backend, version_id: &str) -> LixResult<Vec<(String, usize)>> {
    let mut stmt = backend.connection().prepare(
        "SELECT ancestor_id, depth FROM lix_internal_version_ancestry \
         WHERE version_id = ?1 ORDER BY depth",
    )?;
    let rows = stmt.query_map(params![version_id], |row| {
        let depth: i64 = row.get(1)?;
        Ok((row.get::<_, String>(0)?, depth as usize))
    })?;
    Ok(rows.collect::<Result<_, _>>()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parents(pairs: &[(&str, Option<&str>)]) -> BTreeMap<String, Option<String>> {
        pairs
            .iter()
            .map(|(id, parent)| (id.to_string(), parent.map(str::to_string)))
            .collect()
    }

    #[test]
    fn test_chain_walks_to_root() {
        let map = parents(&[("global", None), ("main", Some("global")), ("feature", Some("main"))]);
        let chain = chain_from_parents(&map, "feature").unwrap();
        assert_eq!(
            chain,
            vec![
                ("feature".to_string(), 0),
                ("main".to_string(), 1),
                ("global".to_string(), 2)
            ]
        );
    }

    #[test]
    fn test_cycle_rejected() {
        let map = parents(&[("a", Some("b")), ("b", Some("c")), ("c", Some("a"))]);
        let err = chain_from_parents(&map, "a").unwrap_err();
        assert_eq!(err.code(), "LIX_INHERITANCE_CYCLE");
    }

    #[test]
    fn test_self_inheritance_rejected() {
        let map = parents(&[("a", Some("a"))]);
        assert!(chain_from_parents(&map, "a").is_err());
    }

    #[test]
    fn test_dangling_parent_ends_chain() {
        let map = parents(&[("a", Some("deleted"))]);
        assert_eq!(chain_from_parents(&map, "a").unwrap().len(), 1);
    }
}
