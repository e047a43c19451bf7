//! Writes into a version's working change set

use crate::commit::{get_commit, upsert_change_set_element};
use crate::engine::Lix;
use crate::errors::{LixError, LixResult};
use crate::state::{self, DirectRow};
use crate::version::get_version;

use super::log::{insert_change, insert_change_edge};
use super::snapshot::{canonical_json, insert_snapshot};
use super::{Change, ChangeContent, ChangeInput};

/// Record a change in the working commit of `version_id` (the active
/// version when `None`)
///
/// Content is validated first. The new change gets an edge from the change
/// the entity currently resolves to, own or inherited, and the version's
/// direct row in the cache is updated in the same transaction.
pub fn write_change(lix: &mut Lix, version_id: Option<&str>, input: ChangeInput) -> LixResult<Change> {
    let version_id = version_id
        .map(str::to_string)
        .unwrap_or_else(|| lix.active_version_id.clone());

    lix.transaction(|lix| {
        let version = get_version(&lix.backend, &version_id)?
            .ok_or_else(|| LixError::not_found("version", &version_id))?;

        let snapshot = match &input.content {
            ChangeContent::Snapshot(content) => {
                lix.schemas.validate(&input.schema_key, content)?;
                let (id, inserted) = insert_snapshot(&lix.backend, content)?;
                if inserted {
                    lix.metrics.increment_snapshots_written();
                }
                Some((id, canonical_json(content)))
            }
            ChangeContent::Tombstone => None,
        };

        let previous = state::visible_row(
            lix,
            &input.entity_id,
            &input.schema_key,
            &input.file_id,
            &version.id,
        )?;

        let change = Change {
            id: lix.deterministic.uuid(),
            entity_id: input.entity_id.clone(),
            schema_key: input.schema_key.clone(),
            schema_version: input.schema_version.clone(),
            file_id: input.file_id.clone(),
            plugin_key: input.plugin_key.clone(),
            snapshot_id: snapshot.as_ref().map(|(id, _)| id.clone()),
            created_at: lix.deterministic.timestamp(),
        };
        insert_change(&lix.backend, &change)?;
        if let Some(previous) = &previous {
            insert_change_edge(&lix.backend, &previous.change_id, &change.id)?;
        }

        let working = get_commit(&lix.backend, &version.working_commit_id)?.ok_or_else(|| {
            LixError::CorruptState(format!(
                "working commit '{}' of version '{}' is missing",
                version.working_commit_id, version.id
            ))
        })?;
        upsert_change_set_element(&lix.backend, &working.change_set_id, &change)?;

        let created_at = match &previous {
            Some(previous) if previous.depth == 0 => previous.created_at.clone(),
            _ => change.created_at.clone(),
        };
        state::write_through(
            lix,
            &DirectRow {
                version_id: version.id.clone(),
                entity_id: change.entity_id.clone(),
                schema_key: change.schema_key.clone(),
                schema_version: change.schema_version.clone(),
                file_id: change.file_id.clone(),
                plugin_key: change.plugin_key.clone(),
                snapshot_content: snapshot.map(|(_, content)| content),
                change_id: change.id.clone(),
                commit_id: working.id,
                created_at,
                updated_at: change.created_at.clone(),
            },
        )?;

        lix.metrics.increment_changes_written();
        Ok(change)
    })
}
