//! Parser helpers shared by the rewrite passes and the write path

use sqlparser::ast::{Expr, ObjectName, SetExpr, Statement, TableAlias, TableFactor, Value as AstValue};
use sqlparser::dialect::SQLiteDialect;
use sqlparser::parser::Parser;

use crate::errors::{LixError, LixResult};
use crate::schema::SchemaRegistry;
use crate::storage::quote_identifier;

use super::views::{system_view_sql, ACTIVE_VERSION_VIEW, STATE_ALL_VIEW};

pub fn parse_statements(sql: &str) -> LixResult<Vec<Statement>> {
    Parser::parse_sql(&SQLiteDialect {}, sql).map_err(|e| LixError::SqlParse(e.to_string()))
}

/// `(<sql>) AS <alias>` as a table factor
///
/// An explicit alias replaces the generated one, keeping column aliases.
pub fn derived_factor(sql: &str, default_alias: &str, alias: Option<&TableAlias>) -> LixResult<TableFactor> {
    let wrapper = format!(
        "SELECT * FROM ({}) AS {}",
        sql,
        quote_identifier(default_alias)
    );
    let mut statements = parse_statements(&wrapper)?;
    let Some(Statement::Query(query)) = statements.pop() else {
        return Err(internal("derived wrapper is not a query"));
    };
    let SetExpr::Select(mut select) = *query.body else {
        return Err(internal("derived wrapper is not a SELECT"));
    };
    if select.from.is_empty() {
        return Err(internal("derived wrapper lost its FROM"));
    }
    let mut relation = select.from.swap_remove(0).relation;

    if let (TableFactor::Derived { alias: slot, .. }, Some(alias)) = (&mut relation, alias) {
        *slot = Some(alias.clone());
    }
    Ok(relation)
}

fn internal(message: &str) -> LixError {
    LixError::SqlParse(message.to_string())
}

/// The name of a one-part object name
pub fn single_name(name: &ObjectName) -> Option<&str> {
    match name.0.as_slice() {
        [part] => part.as_ident().map(|ident| ident.value.as_str()),
        _ => None,
    }
}

pub fn string_literal(value: &str) -> Expr {
    Expr::Value(AstValue::SingleQuotedString(value.to_string()).into())
}

/// Whether `sql` mentions a virtual view name as a word
///
/// Used to decide whether SQL the parser rejects may pass through.
pub fn mentions_virtual_view(sql: &str, schemas: &SchemaRegistry) -> bool {
    sql.split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|word| !word.is_empty())
        .any(|word| {
            let lower = word.to_ascii_lowercase();
            lower == STATE_ALL_VIEW
                || lower == ACTIVE_VERSION_VIEW
                || system_view_sql(&lower).is_some()
                || schemas.by_view_name(&lower).is_some()
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_factor_uses_default_alias() {
        let factor = derived_factor("SELECT 1 AS x", "v", None).unwrap();
        match factor {
            TableFactor::Derived { alias, .. } => assert_eq!(alias.unwrap().name.value, "v"),
            other => panic!("unexpected factor {other}"),
        }
    }

    #[test]
    fn test_mentions_virtual_view() {
        let schemas = SchemaRegistry::with_builtins();
        assert!(mentions_virtual_view("SELECT * FROM key_value", &schemas));
        assert!(mentions_virtual_view("select * from STATE where", &schemas));
        assert!(!mentions_virtual_view("SELECT * FROM my_table", &schemas));
        assert!(!mentions_virtual_view("SELECT key_value_x FROM t", &schemas));
    }

    #[test]
    fn test_parse_error_code() {
        let err = parse_statements("SELEC nonsense").unwrap_err();
        assert_eq!(err.code(), "LIX_INVALID_INPUT");
    }
}
