//! Plugin change detection for file writes

use crate::change::{write_change, ChangeInput};
use crate::engine::Lix;
use crate::errors::LixResult;
use crate::observability::Logger;

/// Run the plugin matching `path` over a file's bytes and write the entity
/// changes it detects into `version_id`, owned by `file_id`
///
/// Returns the number of changes written.
pub(crate) fn sync_file_entities(
    lix: &mut Lix,
    version_id: &str,
    file_id: &str,
    path: &str,
    before: Option<&[u8]>,
    after: &[u8],
) -> LixResult<usize> {
    let plugin = lix.plugins.plugin_for_path(path);
    let detected = plugin.detect_changes(before, after)?;
    if detected.is_empty() {
        return Ok(0);
    }

    let count = detected.len();
    for change in detected {
        let input = match change.snapshot_content {
            Some(content) => ChangeInput::new(change.entity_id, change.schema_key, content),
            None => ChangeInput::tombstone(change.entity_id, change.schema_key),
        };
        write_change(
            lix,
            Some(version_id),
            input
                .file_id(file_id)
                .plugin_key(plugin.key())
                .schema_version(change.schema_version),
        )?;
    }

    Logger::trace(
        "FILE_CHANGES_DETECTED",
        &[
            ("count", &count.to_string()),
            ("file_id", file_id),
            ("plugin_key", plugin.key()),
        ],
    );
    Ok(count)
}
