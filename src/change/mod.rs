//! Snapshot store and change log
//!
//! Every mutation of every entity is one immutable [`Change`] row pointing at
//! a content-addressed snapshot (or at nothing, for a tombstone). History is
//! append-only; the only row ever updated is the working change-set element
//! for an entity, which always points at that entity's latest change.

mod log;
mod snapshot;
mod writer;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::schema::{LIX_FILE_ID, OWN_ENTITY_PLUGIN_KEY};

pub use log::{
    change_edges_for, change_exists, change_parents, changes_for_entity, get_change,
    insert_change, insert_change_edge,
};
pub use snapshot::{canonical_json, insert_snapshot, snapshot_content, snapshot_count, snapshot_id};
pub use writer::write_change;

/// One mutation event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub id: String,
    pub entity_id: String,
    pub schema_key: String,
    pub schema_version: String,
    pub file_id: String,
    pub plugin_key: String,
    /// `None` marks a tombstone
    pub snapshot_id: Option<String>,
    pub created_at: String,
}

impl Change {
    pub fn is_tombstone(&self) -> bool {
        self.snapshot_id.is_none()
    }
}

/// New content for an entity, or its deletion
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeContent {
    Snapshot(Value),
    Tombstone,
}

/// Arguments of a change write
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeInput {
    pub entity_id: String,
    pub schema_key: String,
    pub schema_version: String,
    pub file_id: String,
    pub plugin_key: String,
    pub content: ChangeContent,
}

impl ChangeInput {
    /// Engine-owned entity in file `lix`
    pub fn new(entity_id: impl Into<String>, schema_key: impl Into<String>, content: Value) -> Self {
        Self {
            entity_id: entity_id.into(),
            schema_key: schema_key.into(),
            schema_version: "1.0".to_string(),
            file_id: LIX_FILE_ID.to_string(),
            plugin_key: OWN_ENTITY_PLUGIN_KEY.to_string(),
            content: ChangeContent::Snapshot(content),
        }
    }

    pub fn tombstone(entity_id: impl Into<String>, schema_key: impl Into<String>) -> Self {
        Self {
            content: ChangeContent::Tombstone,
            ..Self::new(entity_id, schema_key, Value::Null)
        }
    }

    pub fn file_id(mut self, file_id: impl Into<String>) -> Self {
        self.file_id = file_id.into();
        self
    }

    pub fn plugin_key(mut self, plugin_key: impl Into<String>) -> Self {
        self.plugin_key = plugin_key.into();
        self
    }

    pub fn schema_version(mut self, schema_version: impl Into<String>) -> Self {
        self.schema_version = schema_version.into();
        self
    }
}
