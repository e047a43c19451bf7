//! SQLite storage
//!
//! One in-memory SQLite database per `Lix` instance. Persistence happens
//! through the envelope (`to_blob` / `open_from_blob`), which serializes the
//! whole database image.

mod backend;
pub mod schema;

pub use backend::{
    from_hex, json_to_sql, quote_identifier, quote_literal, sql_to_json, to_hex, Backend,
    QueryResult,
};
pub use rusqlite::types::Value as SqlValue;
