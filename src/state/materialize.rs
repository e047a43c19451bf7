//! Replay of the change log into per-version direct rows
//!
//! For every version, walk the commit graph breadth-first from its working
//! commit. The direct value of an entity is the change found at the smallest
//! commit depth, ties broken by newest `created_at` and then by largest
//! change id. Inheritance is not applied here; the cache stores direct rows
//! and resolves inheritance at read time.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::commit::CommitGraph;
use crate::errors::{LixError, LixResult};
use crate::storage::Backend;

/// Winning change of one entity in one version, inheritance not applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectRow {
    pub version_id: String,
    pub entity_id: String,
    pub schema_key: String,
    pub schema_version: String,
    pub file_id: String,
    pub plugin_key: String,
    /// Canonical JSON; `None` for tombstones
    pub snapshot_content: Option<String>,
    pub change_id: String,
    pub commit_id: String,
    /// Oldest change of the entity visible from the version
    pub created_at: String,
    /// The winning change's timestamp
    pub updated_at: String,
}

impl DirectRow {
    pub fn is_tombstone(&self) -> bool {
        self.snapshot_content.is_none()
    }
}

#[derive(Debug, Clone)]
struct Candidate {
    change_id: String,
    entity_id: String,
    schema_key: String,
    schema_version: String,
    file_id: String,
    plugin_key: String,
    content: Option<String>,
    created_at: String,
}

struct Winner<'a> {
    candidate: &'a Candidate,
    commit_id: &'a str,
    depth: usize,
    first_seen: &'a str,
}

fn unreadable(err: rusqlite::Error) -> LixError {
    LixError::ChangeLogUnreadable(err)
}

fn load_candidates(backend: &Backend) -> LixResult<BTreeMap<String, Vec<Candidate>>> {
    let mut stmt = backend
        .connection()
        .prepare(
            "SELECT cse.change_set_id, c.id, c.entity_id, c.schema_key, c.schema_version, \
                    c.file_id, c.plugin_key, s.content, c.created_at \
             FROM lix_internal_change_set_element cse \
             JOIN lix_internal_change c ON c.id = cse.change_id \
             LEFT JOIN lix_internal_snapshot s ON s.id = c.snapshot_id",
        )
        .map_err(unreadable)?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                Candidate {
                    change_id: row.get(1)?,
                    entity_id: row.get(2)?,
                    schema_key: row.get(3)?,
                    schema_version: row.get(4)?,
                    file_id: row.get(5)?,
                    plugin_key: row.get(6)?,
                    content: row.get(7)?,
                    created_at: row.get(8)?,
                },
            ))
        })
        .map_err(unreadable)?;

    let mut by_change_set: BTreeMap<String, Vec<Candidate>> = BTreeMap::new();
    for row in rows {
        let (change_set_id, candidate) = row.map_err(unreadable)?;
        by_change_set.entry(change_set_id).or_default().push(candidate);
    }
    Ok(by_change_set)
}

fn load_pairs(backend: &Backend, sql: &str) -> LixResult<Vec<(String, String)>> {
    let mut stmt = backend.connection().prepare(sql).map_err(unreadable)?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
        .map_err(unreadable)?;
    rows.collect::<Result<_, _>>().map_err(unreadable)
}

/// Direct rows of every version (or only `version_id`), ordered by
/// version, schema, entity and file
pub fn materialize(backend: &Backend, version_id: Option<&str>) -> LixResult<Vec<DirectRow>> {
    let versions = load_pairs(
        backend,
        "SELECT id, working_commit_id FROM lix_internal_version ORDER BY id",
    )?;
    let commit_change_sets: BTreeMap<String, String> =
        load_pairs(backend, "SELECT id, change_set_id FROM lix_internal_commit")?
            .into_iter()
            .collect();
    let graph = CommitGraph::from_edges(load_pairs(
        backend,
        "SELECT parent_id, child_id FROM lix_internal_commit_edge",
    )?);
    let candidates = load_candidates(backend)?;

    let mut rows = Vec::new();
    for (id, working_commit_id) in versions {
        if version_id.is_some_and(|wanted| wanted != id) {
            continue;
        }
        rows.extend(materialize_version(
            &id,
            &working_commit_id,
            &graph,
            &commit_change_sets,
            &candidates,
        ));
    }
    Ok(rows)
}

fn materialize_version(
    version_id: &str,
    working_commit_id: &str,
    graph: &CommitGraph,
    commit_change_sets: &BTreeMap<String, String>,
    candidates: &BTreeMap<String, Vec<Candidate>>,
) -> Vec<DirectRow> {
    let mut winners: BTreeMap<(&str, &str, &str), Winner<'_>> = BTreeMap::new();

    for (commit_id, depth) in graph.depths_from(working_commit_id) {
        let Some((commit_id, change_set_id)) = commit_change_sets.get_key_value(&commit_id) else {
            continue;
        };
        let Some(elements) = candidates.get(change_set_id) else {
            continue;
        };
        for candidate in elements {
            let key = (
                candidate.schema_key.as_str(),
                candidate.entity_id.as_str(),
                candidate.file_id.as_str(),
            );
            match winners.get_mut(&key) {
                None => {
                    winners.insert(
                        key,
                        Winner {
                            candidate,
                            commit_id: commit_id.as_str(),
                            depth,
                            first_seen: candidate.created_at.as_str(),
                        },
                    );
                }
                Some(current) => {
                    if candidate.created_at.as_str() < current.first_seen {
                        current.first_seen = candidate.created_at.as_str();
                    }
                    if beats(candidate, depth, current) {
                        current.candidate = candidate;
                        current.commit_id = commit_id.as_str();
                        current.depth = depth;
                    }
                }
            }
        }
    }

    winners
        .into_values()
        .map(|winner| DirectRow {
            version_id: version_id.to_string(),
            entity_id: winner.candidate.entity_id.clone(),
            schema_key: winner.candidate.schema_key.clone(),
            schema_version: winner.candidate.schema_version.clone(),
            file_id: winner.candidate.file_id.clone(),
            plugin_key: winner.candidate.plugin_key.clone(),
            snapshot_content: winner.candidate.content.clone(),
            change_id: winner.candidate.change_id.clone(),
            commit_id: winner.commit_id.to_string(),
            created_at: winner.first_seen.to_string(),
            updated_at: winner.candidate.created_at.clone(),
        })
        .collect()
}

fn beats(candidate: &Candidate, depth: usize, current: &Winner<'_>) -> bool {
    match depth.cmp(&current.depth) {
        Ordering::Less => true,
        Ordering::Greater => false,
        Ordering::Equal => {
            (candidate.created_at.as_str(), candidate.change_id.as_str())
                > (
                    current.candidate.created_at.as_str(),
                    current.candidate.change_id.as_str(),
                )
        }
    }
}
