//! Commit graph
//!
//! Commits bundle a change set and point at zero or more parent commits.
//! Every version owns a *working commit* whose parent is the version's tip;
//! writes accumulate in the working commit's change set until
//! [`commit_version`] seals them into a new tip commit and moves the working
//! commit on top of it.

mod graph;
mod lca;
mod store;

use serde::{Deserialize, Serialize};

use crate::engine::Lix;
use crate::errors::{LixError, LixResult};
use crate::observability::{log_event_with_fields, Event};
use crate::state;
use crate::version::{get_version, update_version_pointers};

pub use graph::{AncestorQuery, CommitGraph};
pub use lca::lowest_common_ancestor;
pub use store::{
    change_set_elements, commit_exists, get_commit, insert_change_set, insert_commit, load_graph,
    move_change_set_elements, parent_ids, set_parents, upsert_change_set_element,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub id: String,
    pub change_set_id: String,
    pub created_at: String,
    pub parent_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSetElement {
    pub change_set_id: String,
    pub change_id: String,
    pub entity_id: String,
    pub schema_key: String,
    pub file_id: String,
}

/// Create a commit over an existing change set
pub fn create_commit(lix: &mut Lix, change_set_id: &str, parents: &[String]) -> LixResult<Commit> {
    lix.transaction(|lix| {
        let commit = Commit {
            id: lix.deterministic.uuid(),
            change_set_id: change_set_id.to_string(),
            created_at: lix.deterministic.timestamp(),
            parent_ids: parents.to_vec(),
        };
        insert_commit(&lix.backend, &commit)?;
        lix.metrics.increment_commits_created();
        Ok(commit)
    })
}

/// Create an empty change set and a commit on top of `parents`
pub fn create_empty_commit(lix: &mut Lix, parents: &[String]) -> LixResult<Commit> {
    lix.transaction(|lix| {
        let change_set_id = lix.deterministic.uuid();
        insert_change_set(&lix.backend, &change_set_id)?;
        create_commit(lix, &change_set_id, parents)
    })
}

/// Inclusive ancestors of a commit, bounded by `query`
pub fn ancestors_of(lix: &Lix, commit_id: &str, query: AncestorQuery) -> LixResult<Vec<Commit>> {
    let graph = load_graph(&lix.backend)?;
    let mut commits = Vec::new();
    for id in graph.ancestors(commit_id, query) {
        match get_commit(&lix.backend, &id)? {
            Some(commit) => commits.push(commit),
            None => {
                return Err(LixError::CorruptState(format!(
                    "commit edge references missing commit '{}'",
                    id
                )))
            }
        }
    }
    Ok(commits)
}

/// Seal the version's working changes into a new commit on top of its tip
///
/// The elements of the working change set move into a fresh change set and
/// commit, which becomes the version's tip; the working commit stays and is
/// re-parented onto it. Working commit ids therefore never appear in history
/// that leaves the instance. With no working changes nothing is sealed and
/// the current tip is returned.
pub fn commit_version(lix: &mut Lix, version_id: &str) -> LixResult<Commit> {
    lix.transaction(|lix| {
        let version = get_version(&lix.backend, version_id)?
            .ok_or_else(|| LixError::not_found("version", version_id))?;
        let working = get_commit(&lix.backend, &version.working_commit_id)?.ok_or_else(|| {
            LixError::CorruptState(format!(
                "working commit '{}' of version '{}' is missing",
                version.working_commit_id, version.id
            ))
        })?;

        if change_set_elements(&lix.backend, &working.change_set_id)?.is_empty() {
            return get_commit(&lix.backend, &version.commit_id)?.ok_or_else(|| {
                LixError::CorruptState(format!("tip commit '{}' is missing", version.commit_id))
            });
        }

        let change_set_id = lix.deterministic.uuid();
        insert_change_set(&lix.backend, &change_set_id)?;
        move_change_set_elements(&lix.backend, &working.change_set_id, &change_set_id)?;
        let sealed = create_commit(lix, &change_set_id, std::slice::from_ref(&version.commit_id))?;

        set_parents(&lix.backend, &working.id, std::slice::from_ref(&sealed.id))?;
        update_version_pointers(&lix.backend, &version.id, &sealed.id, &working.id)?;
        state::retarget_commit(lix, &version.id, &working.id, &sealed.id)?;

        log_event_with_fields(
            Event::CommitCreated,
            &[("commit_id", &sealed.id), ("version_id", &version.id)],
        );
        Ok(sealed)
    })
}
