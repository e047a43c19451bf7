//! Read-path rewrite passes
//!
//! Applied in this order, each one a walk over the parsed statement:
//!
//! 1. [`expand_entity_views`]: entity and system views become derived
//!    subqueries over `state_all`, `active_version` or internal tables.
//! 2. [`inline_active_version`]: comparisons against the active version
//!    subquery become literals; leftover `active_version` relations become a
//!    one-row literal table.
//! 3. [`rewrite_state_views`]: `state_all` becomes a query over the cache
//!    tables and the ancestry table, narrowed by the `schema_key` and
//!    `version_id` literals found in enclosing `WHERE` clauses.
//!
//! Batch splitting runs before all three, on the raw text.
//!
//! A `WITH` name shadows the engine relation of the same name everywhere in
//! the statement. View bodies expanded by pass 1 inside such a statement
//! refer to the engine relations by their internal names instead.

use std::collections::{BTreeMap, BTreeSet};
use std::convert::Infallible;
use std::ops::ControlFlow;

use sqlparser::ast::{
    visit_expressions, BinaryOperator, Expr, GroupByExpr, Ident, ObjectName, Query, Select,
    SelectItem, SetExpr, Statement, TableAlias, TableFactor, Value as AstValue, ValueWithSpan,
    VisitMut, Visitor, VisitorMut,
};

use crate::errors::{LixError, LixResult};
use crate::schema::SchemaRegistry;
use crate::storage::quote_literal;
use crate::storage::schema::ACTIVE_VERSION_TABLE;

use super::parse::{derived_factor, single_name, string_literal};
use super::views::{
    entity_view_sql, state_all_sql, system_view_sql, ACTIVE_VERSION_VIEW, STATE_ALL_RELATION,
    STATE_ALL_VIEW,
};

const AGGREGATES: &[&str] = &[
    "count",
    "sum",
    "avg",
    "min",
    "max",
    "total",
    "group_concat",
    "json_group_array",
    "json_group_object",
];

fn finish(flow: ControlFlow<LixError>) -> LixResult<()> {
    match flow {
        ControlFlow::Continue(()) => Ok(()),
        ControlFlow::Break(err) => Err(err),
    }
}

#[derive(Default)]
struct CteNames(BTreeSet<String>);

impl Visitor for CteNames {
    type Break = Infallible;

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<Infallible> {
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                self.0.insert(cte.alias.name.value.to_ascii_lowercase());
            }
        }
        ControlFlow::Continue(())
    }
}

/// Lowercased names bound by `WITH` clauses anywhere in the statement
fn cte_names(statement: &Statement) -> BTreeSet<String> {
    let mut names = CteNames::default();
    let _ = sqlparser::ast::Visit::visit(statement, &mut names);
    names.0
}

/// Points `state_all` and `active_version` references at internal names
struct EngineRelations;

impl VisitorMut for EngineRelations {
    type Break = Infallible;

    fn pre_visit_table_factor(&mut self, factor: &mut TableFactor) -> ControlFlow<Infallible> {
        if let TableFactor::Table { name, .. } = factor {
            let target = match single_name(name).map(str::to_ascii_lowercase).as_deref() {
                Some(STATE_ALL_VIEW) => STATE_ALL_RELATION,
                Some(ACTIVE_VERSION_VIEW) => ACTIVE_VERSION_TABLE,
                _ => return ControlFlow::Continue(()),
            };
            *name = ObjectName::from(vec![Ident::new(target)]);
        }
        ControlFlow::Continue(())
    }
}

// Pass 1

struct ViewExpander<'a> {
    schemas: &'a SchemaRegistry,
    ctes: BTreeSet<String>,
    changed: bool,
}

impl ViewExpander<'_> {
    fn shadows_engine_relations(&self) -> bool {
        self.ctes.contains(STATE_ALL_VIEW) || self.ctes.contains(ACTIVE_VERSION_VIEW)
    }
}

impl VisitorMut for ViewExpander<'_> {
    type Break = LixError;

    fn pre_visit_table_factor(&mut self, factor: &mut TableFactor) -> ControlFlow<LixError> {
        let TableFactor::Table { name, alias, .. } = factor else {
            return ControlFlow::Continue(());
        };
        let Some(view) = single_name(name).map(str::to_ascii_lowercase) else {
            return ControlFlow::Continue(());
        };
        if self.ctes.contains(&view) {
            return ControlFlow::Continue(());
        }

        let sql = match self.schemas.by_view_name(&view) {
            Some((schema, scope)) => entity_view_sql(schema, scope),
            None => match system_view_sql(&view) {
                Some(sql) => sql.to_string(),
                None => return ControlFlow::Continue(()),
            },
        };
        let alias = alias.clone();
        match derived_factor(&sql, &view, alias.as_ref()) {
            Ok(mut derived) => {
                if self.shadows_engine_relations() {
                    let _ = derived.visit(&mut EngineRelations);
                }
                *factor = derived;
                self.changed = true;
                ControlFlow::Continue(())
            }
            Err(err) => ControlFlow::Break(err),
        }
    }
}

/// Expand entity and system views into derived subqueries
pub fn expand_entity_views(statement: &mut Statement, schemas: &SchemaRegistry) -> LixResult<bool> {
    let mut expander = ViewExpander {
        schemas,
        ctes: cte_names(statement),
        changed: false,
    };
    finish(statement.visit(&mut expander))?;
    Ok(expander.changed)
}

// Pass 2

struct ActiveVersionInliner<'a> {
    active_version_id: &'a str,
    changed: bool,
}

fn is_active_version_subquery(sql: &str) -> bool {
    let normalized = sql
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_lowercase();
    normalized == "select version_id from active_version"
}

impl VisitorMut for ActiveVersionInliner<'_> {
    type Break = LixError;

    fn pre_visit_expr(&mut self, expr: &mut Expr) -> ControlFlow<LixError> {
        let literal = string_literal(self.active_version_id);
        let replacement = match &*expr {
            Expr::InSubquery {
                expr: inner,
                subquery,
                negated,
                ..
            } if is_active_version_subquery(&subquery.to_string()) => Some(Expr::BinaryOp {
                left: inner.clone(),
                op: if *negated {
                    BinaryOperator::NotEq
                } else {
                    BinaryOperator::Eq
                },
                right: Box::new(literal),
            }),
            Expr::BinaryOp { left, op, right } => match (left.as_ref(), right.as_ref()) {
                (_, Expr::Subquery(query)) if is_active_version_subquery(&query.to_string()) => {
                    Some(Expr::BinaryOp {
                        left: left.clone(),
                        op: op.clone(),
                        right: Box::new(literal),
                    })
                }
                (Expr::Subquery(query), _) if is_active_version_subquery(&query.to_string()) => {
                    Some(Expr::BinaryOp {
                        left: Box::new(literal),
                        op: op.clone(),
                        right: right.clone(),
                    })
                }
                _ => None,
            },
            _ => None,
        };
        if let Some(replacement) = replacement {
            *expr = replacement;
            self.changed = true;
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_table_factor(&mut self, factor: &mut TableFactor) -> ControlFlow<LixError> {
        let TableFactor::Table { name, alias, .. } = factor else {
            return ControlFlow::Continue(());
        };
        if !single_name(name).is_some_and(|n| n.eq_ignore_ascii_case(ACTIVE_VERSION_VIEW)) {
            return ControlFlow::Continue(());
        }
        let sql = format!(
            "SELECT {} AS version_id",
            quote_literal(self.active_version_id)
        );
        let alias = alias.clone();
        match derived_factor(&sql, ACTIVE_VERSION_VIEW, alias.as_ref()) {
            Ok(derived) => {
                *factor = derived;
                self.changed = true;
                ControlFlow::Continue(())
            }
            Err(err) => ControlFlow::Break(err),
        }
    }
}

/// Replace references to the active version with its literal id
///
/// A statement that binds `active_version` itself is left alone.
pub fn inline_active_version(statement: &mut Statement, active_version_id: &str) -> LixResult<bool> {
    if cte_names(statement).contains(ACTIVE_VERSION_VIEW) {
        return Ok(false);
    }
    let mut inliner = ActiveVersionInliner {
        active_version_id,
        changed: false,
    };
    finish(statement.visit(&mut inliner))?;
    Ok(inliner.changed)
}

// Pass 3

/// Literal values a column is constrained to by `WHERE` conjuncts
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Hints(BTreeMap<String, BTreeSet<String>>);

impl Hints {
    /// Add a constraint; constraints on the same column intersect
    fn constrain(&mut self, column: &str, values: &BTreeSet<String>) {
        let column = column.to_ascii_lowercase();
        match self.0.get_mut(&column) {
            Some(existing) => existing.retain(|v| values.contains(v)),
            None => {
                self.0.insert(column, values.clone());
            }
        }
    }

    pub fn get(&self, column: &str) -> Option<&BTreeSet<String>> {
        self.0.get(column)
    }
}

struct Conjunct {
    qualifier: Option<String>,
    column: String,
    values: BTreeSet<String>,
}

fn column_ref(expr: &Expr) -> Option<(Option<String>, String)> {
    match expr {
        Expr::Identifier(ident) => Some((None, ident.value.to_ascii_lowercase())),
        Expr::CompoundIdentifier(parts) if parts.len() >= 2 => {
            let column = parts[parts.len() - 1].value.to_ascii_lowercase();
            let qualifier = parts[parts.len() - 2].value.to_ascii_lowercase();
            Some((Some(qualifier), column))
        }
        Expr::Nested(inner) => column_ref(inner),
        _ => None,
    }
}

fn text_literal(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Value(ValueWithSpan {
            value: AstValue::SingleQuotedString(value),
            ..
        }) => Some(value.clone()),
        Expr::Nested(inner) => text_literal(inner),
        _ => None,
    }
}

fn collect_conjuncts(expr: &Expr, out: &mut Vec<Conjunct>) {
    match expr {
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            collect_conjuncts(left, out);
            collect_conjuncts(right, out);
        }
        Expr::Nested(inner) => collect_conjuncts(inner, out),
        Expr::BinaryOp {
            left,
            op: BinaryOperator::Eq,
            right,
        } => {
            let pair = match (column_ref(left), text_literal(right)) {
                (Some(column), Some(value)) => Some((column, value)),
                _ => match (column_ref(right), text_literal(left)) {
                    (Some(column), Some(value)) => Some((column, value)),
                    _ => None,
                },
            };
            if let Some(((qualifier, column), value)) = pair {
                out.push(Conjunct {
                    qualifier,
                    column,
                    values: BTreeSet::from([value]),
                });
            }
        }
        Expr::InList {
            expr,
            list,
            negated: false,
            ..
        } => {
            let Some((qualifier, column)) = column_ref(expr) else {
                return;
            };
            let values: Option<BTreeSet<String>> = list.iter().map(text_literal).collect();
            if let Some(values) = values {
                out.push(Conjunct {
                    qualifier,
                    column,
                    values,
                });
            }
        }
        _ => {}
    }
}

fn factor_name(factor: &TableFactor) -> Option<String> {
    match factor {
        TableFactor::Table { alias: Some(alias), .. } | TableFactor::Derived { alias: Some(alias), .. } => {
            Some(alias.name.value.to_ascii_lowercase())
        }
        TableFactor::Table { name, .. } => name
            .0
            .last()
            .and_then(|part| part.as_ident())
            .map(|ident| ident.value.to_ascii_lowercase()),
        _ => None,
    }
}

/// The `SELECT` of a derived query that filters can be pushed into
///
/// Ordering, limits, CTEs, grouping, `DISTINCT` and aggregate or window
/// functions all make pushed filters change the result.
fn pushdown_target(query: &mut Query) -> Option<&mut Select> {
    if query.to_string() != query.body.to_string() {
        return None;
    }
    let SetExpr::Select(select) = query.body.as_mut() else {
        return None;
    };
    let grouped = match &select.group_by {
        GroupByExpr::Expressions(exprs, _) => !exprs.is_empty(),
        GroupByExpr::All(_) => true,
    };
    if grouped || select.having.is_some() || select.distinct.is_some() {
        return None;
    }
    let aggregates = visit_expressions(&select.projection, |expr| match expr {
        Expr::Function(function) => {
            let name = function.name.to_string().to_ascii_lowercase();
            if function.over.is_some() || AGGREGATES.contains(&name.as_str()) {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        }
        _ => ControlFlow::Continue(()),
    });
    if aggregates.is_break() {
        return None;
    }
    Some(select.as_mut())
}

/// Translate hints on a derived query's output columns to its inputs
fn map_through_projection(projection: &[SelectItem], hints: &Hints) -> Hints {
    let mut mapped = Hints::default();
    for item in projection {
        match item {
            SelectItem::Wildcard(_) | SelectItem::QualifiedWildcard(..) => {
                for (column, values) in &hints.0 {
                    mapped.constrain(column, values);
                }
            }
            SelectItem::UnnamedExpr(expr) => {
                if let Some((_, column)) = column_ref(expr) {
                    if let Some(values) = hints.get(&column) {
                        mapped.constrain(&column, values);
                    }
                }
            }
            SelectItem::ExprWithAlias { expr, alias } => {
                if let Some((_, column)) = column_ref(expr) {
                    if let Some(values) = hints.get(&alias.value.to_ascii_lowercase()) {
                        mapped.constrain(&column, values);
                    }
                }
            }
            _ => {}
        }
    }
    mapped
}

struct StateRewriter<'a> {
    /// Cache tables by schema key
    tables: &'a BTreeMap<String, String>,
    /// `state_all` is bound by a `WITH` clause
    shadowed: bool,
    changed: bool,
}

impl StateRewriter<'_> {
    fn is_state_relation(&self, name: &ObjectName) -> bool {
        match single_name(name) {
            Some(name) if name.eq_ignore_ascii_case(STATE_ALL_RELATION) => true,
            Some(name) => !self.shadowed && name.eq_ignore_ascii_case(STATE_ALL_VIEW),
            None => false,
        }
    }

    fn state_factor(&mut self, hints: &Hints, alias: Option<&TableAlias>) -> LixResult<TableFactor> {
        let tables: Vec<String> = match hints.get("schema_key") {
            Some(keys) => self
                .tables
                .iter()
                .filter(|(key, _)| keys.contains(*key))
                .map(|(_, table)| table.clone())
                .collect(),
            None => self.tables.values().cloned().collect(),
        };
        let sql = state_all_sql(&tables, hints.get("version_id"));
        self.changed = true;
        derived_factor(&sql, STATE_ALL_VIEW, alias)
    }

    fn rewrite_set_expr(&mut self, body: &mut SetExpr) -> LixResult<()> {
        match body {
            SetExpr::Select(select) => self.rewrite_select(select, &Hints::default()),
            SetExpr::SetOperation { left, right, .. } => {
                self.rewrite_set_expr(left)?;
                self.rewrite_set_expr(right)
            }
            _ => Ok(()),
        }
    }

    fn rewrite_select(&mut self, select: &mut Select, inherited: &Hints) -> LixResult<()> {
        let mut conjuncts = Vec::new();
        if let Some(selection) = &select.selection {
            collect_conjuncts(selection, &mut conjuncts);
        }
        let single = select.from.len() == 1 && select.from[0].joins.is_empty();

        for table in select.from.iter_mut() {
            self.rewrite_factor(&mut table.relation, &conjuncts, single, inherited)?;
            for join in table.joins.iter_mut() {
                self.rewrite_factor(&mut join.relation, &conjuncts, single, inherited)?;
            }
        }
        Ok(())
    }

    fn rewrite_factor(
        &mut self,
        factor: &mut TableFactor,
        conjuncts: &[Conjunct],
        single: bool,
        inherited: &Hints,
    ) -> LixResult<()> {
        let name = factor_name(factor);
        let mut hints = Hints::default();
        for conjunct in conjuncts {
            let applies = match (&conjunct.qualifier, &name) {
                (Some(qualifier), Some(name)) => qualifier == name,
                (Some(_), None) => false,
                (None, _) => single,
            };
            if applies {
                hints.constrain(&conjunct.column, &conjunct.values);
            }
        }
        if single {
            for (column, values) in &inherited.0 {
                hints.constrain(column, values);
            }
        }

        match factor {
            TableFactor::Table { name, alias, .. } if self.is_state_relation(name) => {
                let alias = alias.clone();
                *factor = self.state_factor(&hints, alias.as_ref())?;
            }
            TableFactor::Derived {
                lateral: false,
                subquery,
                ..
            } => {
                if let Some(select) = pushdown_target(subquery) {
                    let mapped = map_through_projection(&select.projection, &hints);
                    self.rewrite_select(select, &mapped)?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}

impl VisitorMut for StateRewriter<'_> {
    type Break = LixError;

    fn pre_visit_query(&mut self, query: &mut Query) -> ControlFlow<LixError> {
        match self.rewrite_set_expr(&mut query.body) {
            Ok(()) => ControlFlow::Continue(()),
            Err(err) => ControlFlow::Break(err),
        }
    }

    fn pre_visit_table_factor(&mut self, factor: &mut TableFactor) -> ControlFlow<LixError> {
        let TableFactor::Table { name, alias, .. } = factor else {
            return ControlFlow::Continue(());
        };
        if !self.is_state_relation(name) {
            return ControlFlow::Continue(());
        }
        let alias = alias.clone();
        match self.state_factor(&Hints::default(), alias.as_ref()) {
            Ok(derived) => {
                *factor = derived;
                ControlFlow::Continue(())
            }
            Err(err) => ControlFlow::Break(err),
        }
    }
}

/// Resolve `state_all` against the given cache tables
pub fn rewrite_state_views(statement: &mut Statement, tables: &BTreeMap<String, String>) -> LixResult<bool> {
    let mut rewriter = StateRewriter {
        tables,
        shadowed: cte_names(statement).contains(STATE_ALL_VIEW),
        changed: false,
    };
    finish(statement.visit(&mut rewriter))?;
    Ok(rewriter.changed)
}
