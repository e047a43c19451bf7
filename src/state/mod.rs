//! State resolution and the per-schema cache
//!
//! The change log is the source of truth. The cache stores each version's
//! direct rows per schema; inheritance is applied when reading, either by
//! [`resolve`] or by the SQL the preprocessor generates for `state` views.

mod cache;
mod materialize;
mod resolver;

pub use cache::{
    cache_table_name, cached_rows, ensure_fresh, ensure_table, mark_stale, populate_version,
    registered_tables, remove_version, repopulate, retarget_commit, write_through, StateCache,
    CACHE_TABLE_PREFIX,
};
pub use materialize::{materialize, DirectRow};
pub use resolver::{resolve, ResolvedEntity};
pub(crate) use resolver::{visible_row, VisibleRow};
