//! Lowest common ancestor of a change across two instances

use std::collections::BTreeSet;

use crate::change::{change_exists, change_parents, get_change, Change};
use crate::errors::{LixError, LixResult};
use crate::storage::Backend;

/// Latest change in `change`'s ancestry (inclusive) that `target` also has
///
/// Walks change-level parent edges in `source`. Returns `None` when the
/// histories share nothing. Merge changes (more than one parent) are
/// rejected with `LIX_MULTI_PARENT_UNSUPPORTED`.
pub fn lowest_common_ancestor(
    change: &Change,
    source: &Backend,
    target: &Backend,
) -> LixResult<Option<Change>> {
    if change_exists(target, &change.id)? {
        return Ok(Some(change.clone()));
    }

    let mut visited = BTreeSet::new();
    let mut current = change.id.clone();
    visited.insert(current.clone());

    loop {
        let parents = change_parents(source, &current)?;
        let parent = match parents.as_slice() {
            [] => return Ok(None),
            [single] => single.clone(),
            _ => {
                return Err(LixError::MultiParentUnsupported {
                    change_id: current,
                    parent_count: parents.len(),
                })
            }
        };

        if !visited.insert(parent.clone()) {
            return Err(LixError::CorruptState(format!(
                "change edges loop back to '{}'",
                parent
            )));
        }
        if change_exists(target, &parent)? {
            return get_change(target, &parent);
        }
        current = parent;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::{insert_change, insert_change_edge};

    fn change(id: &str) -> Change {
        Change {
            id: id.to_string(),
            entity_id: "e".to_string(),
            schema_key: "s".to_string(),
            schema_version: "1.0".to_string(),
            file_id: "lix".to_string(),
            plugin_key: "p".to_string(),
            snapshot_id: None,
            created_at: format!("t-{}", id),
        }
    }

    fn chain(backend: &Backend, ids: &[&str]) {
        for id in ids {
            insert_change(backend, &change(id)).unwrap();
        }
        for pair in ids.windows(2) {
            insert_change_edge(backend, pair[0], pair[1]).unwrap();
        }
    }

    #[test]
    fn test_change_known_to_target_is_its_own_ancestor() {
        let source = Backend::open_in_memory().unwrap();
        let target = Backend::open_in_memory().unwrap();
        chain(&source, &["a", "b"]);
        chain(&target, &["a", "b"]);
        let found = lowest_common_ancestor(&change("b"), &source, &target).unwrap();
        assert_eq!(found.unwrap().id, "b");
    }

    #[test]
    fn test_walks_back_to_shared_change() {
        let source = Backend::open_in_memory().unwrap();
        let target = Backend::open_in_memory().unwrap();
        chain(&source, &["a", "b", "c", "d"]);
        chain(&target, &["a", "b", "x"]);
        let found = lowest_common_ancestor(&change("d"), &source, &target).unwrap();
        assert_eq!(found.unwrap().id, "b");
    }

    #[test]
    fn test_unrelated_histories() {
        let source = Backend::open_in_memory().unwrap();
        let target = Backend::open_in_memory().unwrap();
        chain(&source, &["a", "b"]);
        chain(&target, &["x", "y"]);
        assert!(lowest_common_ancestor(&change("b"), &source, &target)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_merge_change_rejected() {
        let source = Backend::open_in_memory().unwrap();
        let target = Backend::open_in_memory().unwrap();
        chain(&source, &["a", "m"]);
        insert_change(&source, &change("b")).unwrap();
        insert_change_edge(&source, "b", "m").unwrap();

        let err = lowest_common_ancestor(&change("m"), &source, &target).unwrap_err();
        assert_eq!(err.code(), "LIX_MULTI_PARENT_UNSUPPORTED");
    }
}
