//! lix - change control for structured data
//!
//! Entities of any registered schema get an append-only change log, a
//! commit graph, branchable versions with inheritance and replication,
//! all kept in one SQLite database and queried through plain SQL.
//!
//! ```ignore
//! use lix::{Lix, LixConfig};
//!
//! let mut lix = Lix::open(LixConfig::default())?;
//! lix.execute("INSERT INTO key_value (key, value) VALUES ('theme', 'dark')", &[])?;
//! lix.commit()?;
//! let blob = lix.to_blob()?;
//! ```

pub mod change;
pub mod cli;
pub mod commit;
pub mod deterministic;
pub mod engine;
pub mod envelope;
pub mod errors;
pub mod observability;
pub mod plugin;
pub mod schema;
pub mod sql;
pub mod state;
pub mod storage;
pub mod sync;
pub mod version;

pub use engine::{Lix, LixConfig};
pub use errors::{LixError, LixResult};
