//! Wire types of the `/lsp/*-v1` routes
//!
//! Bodies are JSON; instance blobs travel base64 encoded.

use std::ops::ControlFlow;
use std::sync::OnceLock;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlparser::ast::{Query, SetExpr, Statement, Visit, Visitor};

use crate::sql::{parse_statements, split_statements};
use crate::storage::{json_to_sql, SqlValue};

use super::bundle::{Bundle, SyncReport};
use super::errors::{SyncError, SyncResult};

pub const NEW_ROUTE: &str = "/lsp/new-v1";
pub const GET_ROUTE: &str = "/lsp/get-v1";
pub const PUSH_ROUTE: &str = "/lsp/push-v1";
pub const PULL_ROUTE: &str = "/lsp/pull-v1";
pub const QUERY_ROUTE: &str = "/lsp/query-v1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRequest {
    /// Base64 encoded blob
    pub blob: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewResponse {
    pub lix_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetRequest {
    pub lix_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetResponse {
    pub blob: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushRequest {
    pub lix_id: String,
    pub bundle: Bundle,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushResponse {
    pub report: SyncReport,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub lix_id: String,
    /// Commits the client already has; their ancestors are left out
    #[serde(default)]
    pub since_commit_ids: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullResponse {
    pub bundle: Bundle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub lix_id: String,
    pub sql: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub columns: Vec<String>,
    pub rows: Vec<Value>,
}

pub fn encode_blob(blob: &[u8]) -> String {
    STANDARD.encode(blob)
}

pub fn decode_blob(encoded: &str) -> SyncResult<Vec<u8>> {
    STANDARD
        .decode(encoded)
        .map_err(|e| SyncError::InvalidRequest(format!("blob is not valid base64: {}", e)))
}

pub fn query_params(params: &[Value]) -> Vec<SqlValue> {
    params.iter().map(json_to_sql).collect()
}

const MUTATION_PATTERN: &str = r"(?i)^\s*(insert|update|delete|replace|upsert|create|drop|alter|attach|detach|vacuum|reindex|pragma|begin|commit|rollback|savepoint|release)\b";

fn mutation_pattern() -> SyncResult<&'static Regex> {
    static PATTERN: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(MUTATION_PATTERN))
        .as_ref()
        .map_err(|e| SyncError::Internal(format!("mutation pattern: {}", e)))
}

/// Reject SQL whose statements aren't reads
///
/// Every statement in the batch is checked before anything runs: its
/// leading keyword first, then its syntax tree. SQL that doesn't parse is
/// rejected too.
pub fn ensure_read_only(sql: &str, params: &[SqlValue]) -> SyncResult<()> {
    let pattern = mutation_pattern()?;
    for statement in split_statements(sql, params)? {
        if pattern.is_match(strip_leading_comments(&statement.sql)) {
            return Err(SyncError::MutationNotAllowed);
        }
        let parsed = parse_statements(&statement.sql).map_err(|_| SyncError::MutationNotAllowed)?;
        if !parsed.iter().all(is_read) {
            return Err(SyncError::MutationNotAllowed);
        }
    }
    Ok(())
}

/// Finds statements nested below the top-level query
#[derive(Default)]
struct NestedWrites {
    statements: usize,
}

impl Visitor for NestedWrites {
    type Break = ();

    fn pre_visit_statement(&mut self, _statement: &Statement) -> ControlFlow<()> {
        self.statements += 1;
        if self.statements > 1 {
            return ControlFlow::Break(());
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<()> {
        match query.body.as_ref() {
            SetExpr::Insert(_) | SetExpr::Update(_) | SetExpr::Delete(_) | SetExpr::Merge(_) => {
                ControlFlow::Break(())
            }
            SetExpr::Select(select) if select.into.is_some() => ControlFlow::Break(()),
            _ => ControlFlow::Continue(()),
        }
    }
}

fn is_read(statement: &Statement) -> bool {
    matches!(statement, Statement::Query(_))
        && statement.visit(&mut NestedWrites::default()).is_continue()
}

fn strip_leading_comments(mut sql: &str) -> &str {
    loop {
        sql = sql.trim_start();
        if let Some(rest) = sql.strip_prefix("--") {
            sql = rest.split_once('\n').map_or("", |(_, after)| after);
        } else if let Some(rest) = sql.strip_prefix("/*") {
            sql = rest.split_once("*/").map_or("", |(_, after)| after);
        } else {
            return sql;
        }
    }
}
