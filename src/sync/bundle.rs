//! Bundles: the unit of history exchanged between instances
//!
//! A bundle carries sealed commits only. Working commits and their
//! uncommitted changes stay local.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::change::{
    change_edges_for, change_exists, get_change, insert_change, insert_change_edge,
    insert_snapshot, snapshot_content, Change,
};
use crate::commit::{
    change_set_elements, commit_exists, create_empty_commit, get_commit, insert_change_set,
    insert_commit, load_graph, ChangeSetElement, Commit,
};
use crate::engine::Lix;
use crate::errors::{LixError, LixResult};
use crate::observability::{log_event_with_fields, Event, Logger};
use crate::state;
use crate::version::{
    fast_forward, get_version, insert_version, list_versions, rebuild_ancestry, set_inheritance,
    FastForward, Version,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleCommit {
    #[serde(flatten)]
    pub commit: Commit,
    pub elements: Vec<ChangeSetElement>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleSnapshot {
    pub id: String,
    pub content: Value,
}

/// Where a version points in the sending instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionHead {
    pub id: String,
    pub name: String,
    pub commit_id: String,
    pub inherits_from_version_id: Option<String>,
    #[serde(default)]
    pub hidden: bool,
}

impl From<&Version> for VersionHead {
    fn from(version: &Version) -> Self {
        Self {
            id: version.id.clone(),
            name: version.name.clone(),
            commit_id: version.commit_id.clone(),
            inherits_from_version_id: version.inherits_from_version_id.clone(),
            hidden: version.hidden,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Bundle {
    /// Parents precede children
    pub commits: Vec<BundleCommit>,
    pub changes: Vec<Change>,
    pub snapshots: Vec<BundleSnapshot>,
    /// `(parent_id, child_id)` change edges of the bundled changes
    pub change_edges: Vec<(String, String)>,
    pub versions: Vec<VersionHead>,
}

impl Bundle {
    pub fn is_empty(&self) -> bool {
        self.commits.is_empty()
    }
}

/// Outcome for one version after applying a bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum VersionStatus {
    Created,
    UpToDate,
    Advanced,
    AlreadyAhead,
    Diverged { merge_base: Option<String> },
}

impl From<FastForward> for VersionStatus {
    fn from(outcome: FastForward) -> Self {
        match outcome {
            FastForward::UpToDate => VersionStatus::UpToDate,
            FastForward::Advanced => VersionStatus::Advanced,
            FastForward::AlreadyAhead => VersionStatus::AlreadyAhead,
            FastForward::Diverged { merge_base } => VersionStatus::Diverged { merge_base },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionReport {
    pub version_id: String,
    /// Tip of the version on the receiving side after the apply
    pub commit_id: String,
    #[serde(flatten)]
    pub status: VersionStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub commits_applied: usize,
    pub versions: Vec<VersionReport>,
}

impl SyncReport {
    pub fn diverged(&self) -> impl Iterator<Item = &VersionReport> {
        self.versions
            .iter()
            .filter(|report| matches!(report.status, VersionStatus::Diverged { .. }))
    }
}

/// Every sealed commit reachable from a version tip that is not an
/// inclusive ancestor of `known`
///
/// Ids in `known` this instance has never seen are ignored.
pub fn export_bundle(lix: &Lix, known: &[String]) -> LixResult<Bundle> {
    let versions = list_versions(&lix.backend)?;
    let graph = load_graph(&lix.backend)?;

    let tips: Vec<String> = versions.iter().map(|v| v.commit_id.clone()).collect();
    let mut known_here = Vec::new();
    for id in known {
        if commit_exists(&lix.backend, id)? {
            known_here.push(id.clone());
        }
    }
    let reachable = graph.ancestors_of_all(&tips);
    let excluded = graph.ancestors_of_all(&known_here);
    let missing: BTreeSet<String> = reachable.difference(&excluded).cloned().collect();

    let mut bundle = Bundle {
        versions: versions.iter().map(VersionHead::from).collect(),
        ..Bundle::default()
    };
    let mut change_ids = BTreeSet::new();
    let mut snapshot_ids = BTreeSet::new();

    for id in graph.topological_order(&missing) {
        let commit = get_commit(&lix.backend, &id)?
            .ok_or_else(|| LixError::CorruptState(format!("commit '{}' is missing", id)))?;
        let elements = change_set_elements(&lix.backend, &commit.change_set_id)?;
        for element in &elements {
            if !change_ids.insert(element.change_id.clone()) {
                continue;
            }
            let change = get_change(&lix.backend, &element.change_id)?.ok_or_else(|| {
                LixError::CorruptState(format!("change '{}' is missing", element.change_id))
            })?;
            if let Some(snapshot_id) = &change.snapshot_id {
                if snapshot_ids.insert(snapshot_id.clone()) {
                    let content = snapshot_content(&lix.backend, snapshot_id)?.ok_or_else(|| {
                        LixError::CorruptState(format!("snapshot '{}' is missing", snapshot_id))
                    })?;
                    bundle.snapshots.push(BundleSnapshot {
                        id: snapshot_id.clone(),
                        content,
                    });
                }
            }
            bundle.changes.push(change);
        }
        bundle.commits.push(BundleCommit { commit, elements });
    }

    let change_ids: Vec<String> = change_ids.into_iter().collect();
    bundle.change_edges = change_edges_for(&lix.backend, &change_ids)?;
    Ok(bundle)
}

/// Apply a bundle inside one transaction
///
/// Already-present commits are skipped. A commit whose parent is neither
/// present nor earlier in the bundle fails the whole apply. Existing
/// versions fast-forward when possible; unknown versions are created.
pub fn apply_bundle(lix: &mut Lix, bundle: &Bundle) -> LixResult<SyncReport> {
    lix.transaction(|lix| {
        for snapshot in &bundle.snapshots {
            let (id, _) = insert_snapshot(&lix.backend, &snapshot.content)?;
            if id != snapshot.id {
                return Err(LixError::CorruptState(format!(
                    "snapshot '{}' doesn't match its content",
                    snapshot.id
                )));
            }
        }

        let bundled: BTreeSet<&str> = bundle.changes.iter().map(|c| c.id.as_str()).collect();
        for change in &bundle.changes {
            insert_change(&lix.backend, change)?;
        }
        for (parent, child) in &bundle.change_edges {
            insert_change_edge(&lix.backend, parent, child)?;
        }

        let mut applied = 0;
        for entry in &bundle.commits {
            if commit_exists(&lix.backend, &entry.commit.id)? {
                continue;
            }
            insert_change_set(&lix.backend, &entry.commit.change_set_id)?;
            for element in &entry.elements {
                if element.change_set_id != entry.commit.change_set_id {
                    return Err(LixError::CorruptState(format!(
                        "element of change set '{}' bundled with commit '{}'",
                        element.change_set_id, entry.commit.id
                    )));
                }
                let known = bundled.contains(element.change_id.as_str())
                    || change_exists(&lix.backend, &element.change_id)?;
                if !known {
                    return Err(LixError::CorruptState(format!(
                        "commit '{}' references unknown change '{}'",
                        entry.commit.id, element.change_id
                    )));
                }
                lix.backend.connection().execute(
                    "INSERT OR IGNORE INTO lix_internal_change_set_element \
                     (change_set_id, change_id, entity_id, schema_key, file_id) \
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    rusqlite::params![
                        element.change_set_id,
                        element.change_id,
                        element.entity_id,
                        element.schema_key,
                        element.file_id
                    ],
                )?;
            }
            insert_commit(&lix.backend, &entry.commit)?;
            applied += 1;
        }

        let versions = apply_version_heads(lix, &bundle.versions)?;
        Ok(SyncReport {
            commits_applied: applied,
            versions,
        })
    })
}

fn apply_version_heads(lix: &mut Lix, heads: &[VersionHead]) -> LixResult<Vec<VersionReport>> {
    let mut reports = Vec::with_capacity(heads.len());
    let mut created = Vec::new();

    for head in heads {
        if !commit_exists(&lix.backend, &head.commit_id)? {
            return Err(LixError::CorruptState(format!(
                "version '{}' points at commit '{}' that the bundle doesn't carry",
                head.id, head.commit_id
            )));
        }
        let status = match get_version(&lix.backend, &head.id)? {
            Some(_) => VersionStatus::from(fast_forward(lix, &head.id, &head.commit_id)?),
            None => {
                create_remote_version(lix, head)?;
                created.push(head);
                VersionStatus::Created
            }
        };
        if let VersionStatus::Diverged { merge_base } = &status {
            Logger::warn(
                Event::SyncVersionDiverged.as_str(),
                &[
                    ("version_id", &head.id),
                    ("commit_id", &head.commit_id),
                    ("merge_base", merge_base.as_deref().unwrap_or("none")),
                ],
            );
        }
        let commit_id = get_version(&lix.backend, &head.id)?
            .map(|version| version.commit_id)
            .unwrap_or_else(|| head.commit_id.clone());
        reports.push(VersionReport {
            version_id: head.id.clone(),
            commit_id,
            status,
        });
    }

    // Inheritance is wired once every head exists.
    for head in created {
        if let Some(parent) = &head.inherits_from_version_id {
            if get_version(&lix.backend, parent)?.is_some() {
                set_inheritance(lix, &head.id, Some(parent))?;
            }
        }
    }
    let moved = reports
        .iter()
        .any(|r| matches!(r.status, VersionStatus::Created | VersionStatus::Advanced));
    if moved {
        state::mark_stale(lix)?;
    }
    Ok(reports)
}

/// Create a version the sending side has and this side lacks, with a fresh
/// working commit on top of its tip
fn create_remote_version(lix: &mut Lix, head: &VersionHead) -> LixResult<()> {
    let working = create_empty_commit(lix, std::slice::from_ref(&head.commit_id))?;
    insert_version(
        &lix.backend,
        &Version {
            id: head.id.clone(),
            name: head.name.clone(),
            commit_id: head.commit_id.clone(),
            working_commit_id: working.id,
            inherits_from_version_id: None,
            hidden: head.hidden,
        },
    )?;
    rebuild_ancestry(&lix.backend)?;
    lix.metrics.increment_versions_created();
    log_event_with_fields(Event::VersionCreated, &[("version_id", &head.id)]);
    Ok(())
}
