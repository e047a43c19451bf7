//! Version registry
//!
//! A version is a named, mutable pointer into the commit graph (`commit_id`)
//! plus the open working commit stacked on it. Versions optionally inherit
//! from one other version: entities a version has never touched resolve to
//! the inherited version's value.

mod inheritance;
mod registry;

use serde::{Deserialize, Serialize};

pub use inheritance::{ancestry_chain, chain_from_parents, rebuild_ancestry};
pub use registry::{
    create_version, delete_version, fast_forward, get_version, insert_version, list_versions,
    load_active_version_id, rename_version, set_inheritance, switch_version,
    update_version_pointers,
};
pub(crate) use registry::store_active_version_id;

/// Root version every other version inherits from by default
pub const GLOBAL_VERSION_ID: &str = "global";

/// Version active after initialization
pub const MAIN_VERSION_ID: &str = "main";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub id: String,
    pub name: String,
    pub commit_id: String,
    pub working_commit_id: String,
    pub inherits_from_version_id: Option<String>,
    pub hidden: bool,
}

/// Inheritance of a newly created version
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum InheritsFrom {
    /// `global`, unless the version is `global` itself
    #[default]
    Default,
    None,
    Version(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateVersionOptions {
    pub id: Option<String>,
    pub name: Option<String>,
    /// Version whose tip the new version starts at; the active version when unset
    pub from: Option<String>,
    pub inherits_from: InheritsFrom,
    pub hidden: bool,
}

impl CreateVersionOptions {
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn from(mut self, version_id: impl Into<String>) -> Self {
        self.from = Some(version_id.into());
        self
    }

    pub fn inherits_from(mut self, inherits_from: InheritsFrom) -> Self {
        self.inherits_from = inherits_from;
        self
    }
}

/// Outcome of a fast-forward attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FastForward {
    UpToDate,
    Advanced,
    /// The local tip already contains the target commit
    AlreadyAhead,
    Diverged { merge_base: Option<String> },
}
