//! SQL preprocessor
//!
//! Every statement sent to [`Lix::execute`] passes through here. Batches are
//! split first; each statement is then parsed and either routed to the write
//! path (writes on virtual views), rewritten into plain SQLite (reads that
//! mention virtual views) or passed through untouched.
//!
//! ```ignore
//! lix.execute("INSERT INTO key_value (key, value) VALUES (?, ?)", &params)?;
//! let rows = lix.execute("SELECT key, value FROM key_value_all WHERE lixcol_version_id = 'main'", &[])?;
//! ```

mod mutation;
mod parse;
mod rewrite;
mod split;
mod views;

use sqlparser::ast::Statement;

use crate::engine::Lix;
use crate::errors::{LixError, LixResult};
use crate::observability::{Event, Logger};
use crate::state::{self, CACHE_TABLE_PREFIX};
use crate::storage::schema::CACHE_REGISTRY_TABLE;
use crate::storage::{QueryResult, SqlValue};

pub use mutation::{bind_placeholders, write_target, WriteTarget};
pub use parse::parse_statements;
pub use rewrite::{expand_entity_views, inline_active_version, rewrite_state_views};
pub use split::{split_statements, SqlStatement};
pub use views::{entity_view_sql, state_all_sql, system_view_sql, STATE_ALL_VIEW, STATE_VIEW};

const INTERNAL_TABLE_PREFIX: &str = "lix_internal_";

/// Execute a batch; the result of the last statement is returned
pub fn execute(lix: &mut Lix, sql: &str, params: &[SqlValue]) -> LixResult<QueryResult> {
    match execute_batch(lix, sql, params) {
        Ok(result) => {
            lix.metrics.increment_queries_executed();
            Logger::trace(
                Event::QueryExecuted.as_str(),
                &[
                    ("rows", &result.len().to_string()),
                    ("rows_affected", &result.rows_affected.to_string()),
                ],
            );
            Ok(result)
        }
        Err(err) => {
            lix.metrics.increment_queries_rejected();
            Logger::warn(
                Event::QueryRejected.as_str(),
                &[("code", err.code()), ("reason", &err.to_string())],
            );
            Err(err)
        }
    }
}

fn execute_batch(lix: &mut Lix, sql: &str, params: &[SqlValue]) -> LixResult<QueryResult> {
    let mut last = QueryResult::affected(0);
    for statement in split_statements(sql, params)? {
        last = execute_statement(lix, &statement.sql, &statement.params)?;
    }
    Ok(last)
}

fn execute_statement(lix: &mut Lix, sql: &str, params: &[SqlValue]) -> LixResult<QueryResult> {
    let mut statements = match parse_statements(sql) {
        Ok(statements) => statements,
        // SQLite accepts more than the parser does; only SQL that can't
        // touch a virtual view may skip the preprocessor.
        Err(err) if parse::mentions_virtual_view(sql, &lix.schemas) => return Err(err),
        Err(_) => return run(lix, sql, params),
    };
    let statement = match statements.len() {
        0 => return Ok(QueryResult::affected(0)),
        1 => statements.remove(0),
        n => {
            return Err(LixError::InvalidInput(format!(
                "expected one statement, parsed {}",
                n
            )))
        }
    };

    if let Some(target) = mutation::write_target(&statement, &lix.schemas) {
        return mutation::execute_write(lix, statement, target, params);
    }

    let invalidates = writes_tracked_table(&statement);
    let result = execute_read(lix, statement, sql, params)?;
    if invalidates {
        state::mark_stale(lix)?;
    }
    Ok(result)
}

/// Whether a passthrough statement writes engine tables the cache derives from
fn writes_tracked_table(statement: &Statement) -> bool {
    mutation::write_table_name(statement).is_some_and(|name| {
        let name = name.to_ascii_lowercase();
        name.starts_with(INTERNAL_TABLE_PREFIX)
            && !name.starts_with(CACHE_TABLE_PREFIX)
            && name != CACHE_REGISTRY_TABLE
    })
}

fn execute_read(
    lix: &mut Lix,
    mut statement: Statement,
    original: &str,
    params: &[SqlValue],
) -> LixResult<QueryResult> {
    if rewrite_read(lix, &mut statement)? {
        let rewritten = statement.to_string();
        Logger::trace("QUERY_REWRITTEN", &[("sql", &rewritten)]);
        run(lix, &rewritten, params)
    } else {
        run(lix, original, params)
    }
}

/// Apply the read passes in order; returns whether anything changed
fn rewrite_read(lix: &mut Lix, statement: &mut Statement) -> LixResult<bool> {
    let mut changed = expand_entity_views(statement, &lix.schemas)?;
    changed |= inline_active_version(statement, &lix.active_version_id)?;

    state::ensure_fresh(lix)?;
    let tables = state::registered_tables(&lix.backend)?;
    changed |= rewrite_state_views(statement, &tables)?;
    Ok(changed)
}

/// Run a read over virtual views on behalf of the write path
pub(crate) fn query_views(lix: &mut Lix, sql: &str) -> LixResult<QueryResult> {
    let mut statements = parse_statements(sql)?;
    let Some(mut statement) = statements.pop() else {
        return Ok(QueryResult::affected(0));
    };
    rewrite_read(lix, &mut statement)?;
    lix.backend.query(&statement.to_string(), &[])
}

/// Run SQL on the database
///
/// A user `COMMIT` or `ROLLBACK` ends the transaction underneath the
/// engine, so the in-memory mirrors are reloaded afterwards.
fn run(lix: &mut Lix, sql: &str, params: &[SqlValue]) -> LixResult<QueryResult> {
    let was_in_transaction = lix.backend.in_transaction();
    let result = lix.backend.query(sql, params);
    if was_in_transaction && !lix.backend.in_transaction() {
        lix.reload_mirrors()?;
    }
    result
}
