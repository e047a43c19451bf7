//! Write path: `INSERT`, `UPDATE` and `DELETE` against virtual views
//!
//! Entity views turn into change log writes, the `version` view into
//! version registry calls, and `UPDATE active_version` into a switch.
//! Values must be literals or bound parameters; placeholders are replaced by
//! their literal values before a statement is interpreted.

use std::ops::ControlFlow;

use serde_json::{Map, Value};
use sqlparser::ast::{
    Assignment, AssignmentTarget, Delete, Expr, FromTable, Insert, SetExpr, Statement,
    TableFactor, TableObject, TableWithJoins, UnaryOperator, Update, Value as AstValue,
    ValueWithSpan, VisitMut, VisitorMut,
};

use crate::change::{write_change, ChangeInput};
use crate::engine::{sync_file_entities, Lix};
use crate::errors::{LixError, LixResult};
use crate::schema::{DefaultValue, PropertyKind, SchemaDescriptor, SchemaRegistry, ViewScope, FILE_SCHEMA_KEY};
use crate::state::resolve;
use crate::storage::{from_hex, sql_to_json, to_hex, QueryResult, SqlValue};
use crate::version::{
    create_version, delete_version, rename_version, set_inheritance, switch_version,
    CreateVersionOptions, InheritsFrom,
};

use super::parse::single_name;
use super::views::{system_view_sql, ACTIVE_VERSION_VIEW, LIXCOL_FILE_ID, LIXCOL_VERSION_ID, STATE_ALL_VIEW, VERSION_VIEW};

const LIXCOL_PREFIX: &str = "lixcol_";

/// Virtual view a write statement targets
#[derive(Debug, Clone)]
pub enum WriteTarget {
    Entity {
        schema: SchemaDescriptor,
        scope: ViewScope,
        view: String,
    },
    Version,
    ActiveVersion,
    ReadOnly(String),
}

fn insert_target(insert: &Insert) -> Option<&str> {
    match &insert.table {
        TableObject::TableName(name) => single_name(name),
        _ => None,
    }
}

fn table_target(table: &TableWithJoins) -> Option<&str> {
    match &table.relation {
        TableFactor::Table { name, .. } => single_name(name),
        _ => None,
    }
}

fn delete_target(delete: &Delete) -> Option<&TableWithJoins> {
    match &delete.from {
        FromTable::WithFromKeyword(tables) | FromTable::WithoutKeyword(tables) => tables.first(),
    }
}

/// Name of the table a write statement targets
pub fn write_table_name(statement: &Statement) -> Option<&str> {
    match statement {
        Statement::Insert(insert) => insert_target(insert),
        Statement::Update(update) => table_target(&update.table),
        Statement::Delete(delete) => delete_target(delete).and_then(table_target),
        _ => None,
    }
}

/// Resolve the virtual view a write statement targets, `None` for physical tables
pub fn write_target(statement: &Statement, schemas: &SchemaRegistry) -> Option<WriteTarget> {
    let name = write_table_name(statement)?;
    let lower = name.to_ascii_lowercase();
    if let Some((schema, scope)) = schemas.by_view_name(&lower) {
        return Some(WriteTarget::Entity {
            schema: schema.clone(),
            scope,
            view: lower,
        });
    }
    match lower.as_str() {
        VERSION_VIEW => Some(WriteTarget::Version),
        ACTIVE_VERSION_VIEW => Some(WriteTarget::ActiveVersion),
        STATE_ALL_VIEW => Some(WriteTarget::ReadOnly(lower)),
        other if system_view_sql(other).is_some() => Some(WriteTarget::ReadOnly(lower)),
        _ => None,
    }
}

// Placeholders

/// Maps `?`, `?N` and `$N` placeholders to parameter indexes the way SQLite
/// numbers them: a bare `?` takes the largest index used so far plus one.
#[derive(Debug, Default)]
struct PlaceholderCursor {
    next: usize,
}

impl PlaceholderCursor {
    fn index(&mut self, placeholder: &str) -> LixResult<usize> {
        if placeholder == "?" {
            let index = self.next;
            self.next += 1;
            return Ok(index);
        }
        let number = placeholder
            .strip_prefix('?')
            .or_else(|| placeholder.strip_prefix('$'))
            .and_then(|n| n.parse::<usize>().ok())
            .filter(|n| *n > 0)
            .ok_or_else(|| {
                LixError::Unsupported(format!(
                    "placeholder '{}' can't be used in writes to views",
                    placeholder
                ))
            })?;
        self.next = self.next.max(number);
        Ok(number - 1)
    }
}

fn value_expr(value: &SqlValue) -> Expr {
    let value = match value {
        SqlValue::Null => AstValue::Null,
        SqlValue::Integer(i) => AstValue::Number(i.to_string(), false),
        SqlValue::Real(f) => AstValue::Number(f.to_string(), false),
        SqlValue::Text(s) => AstValue::SingleQuotedString(s.clone()),
        SqlValue::Blob(bytes) => AstValue::HexStringLiteral(to_hex(bytes)),
    };
    Expr::Value(value.into())
}

struct PlaceholderBinder<'a> {
    params: &'a [SqlValue],
    cursor: PlaceholderCursor,
}

impl VisitorMut for PlaceholderBinder<'_> {
    type Break = LixError;

    fn pre_visit_expr(&mut self, expr: &mut Expr) -> ControlFlow<LixError> {
        let Expr::Value(ValueWithSpan {
            value: AstValue::Placeholder(placeholder),
            ..
        }) = expr
        else {
            return ControlFlow::Continue(());
        };
        let bound = self.cursor.index(placeholder).and_then(|index| {
            self.params.get(index).map(value_expr).ok_or_else(|| {
                LixError::InvalidInput(format!("missing parameter {}", index + 1))
            })
        });
        match bound {
            Ok(bound) => {
                *expr = bound;
                ControlFlow::Continue(())
            }
            Err(err) => ControlFlow::Break(err),
        }
    }
}

/// Replace every placeholder with its parameter value
pub fn bind_placeholders(statement: &mut Statement, params: &[SqlValue]) -> LixResult<()> {
    let mut binder = PlaceholderBinder {
        params,
        cursor: PlaceholderCursor::default(),
    };
    match statement.visit(&mut binder) {
        ControlFlow::Continue(()) => Ok(()),
        ControlFlow::Break(err) => Err(err),
    }
}

// Literals

fn literal_value(expr: &Expr) -> LixResult<SqlValue> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => match value {
            AstValue::SingleQuotedString(s) => Ok(SqlValue::Text(s.clone())),
            AstValue::Number(n, _) => parse_number(n),
            AstValue::Boolean(b) => Ok(SqlValue::Integer(i64::from(*b))),
            AstValue::Null => Ok(SqlValue::Null),
            AstValue::HexStringLiteral(hex) => from_hex(hex)
                .map(SqlValue::Blob)
                .ok_or_else(|| LixError::InvalidInput(format!("invalid blob literal X'{}'", hex))),
            other => Err(LixError::Unsupported(format!(
                "literal {} can't be written to a view",
                other
            ))),
        },
        Expr::Nested(inner) => literal_value(inner),
        Expr::UnaryOp {
            op: UnaryOperator::Minus,
            expr,
        } => match literal_value(expr)? {
            SqlValue::Integer(i) => Ok(SqlValue::Integer(-i)),
            SqlValue::Real(f) => Ok(SqlValue::Real(-f)),
            other => Err(LixError::InvalidInput(format!("can't negate {:?}", other))),
        },
        Expr::UnaryOp {
            op: UnaryOperator::Plus,
            expr,
        } => literal_value(expr),
        other => Err(LixError::Unsupported(format!(
            "only literal values can be written to views, got '{}'",
            other
        ))),
    }
}

fn parse_number(text: &str) -> LixResult<SqlValue> {
    if let Ok(i) = text.parse::<i64>() {
        return Ok(SqlValue::Integer(i));
    }
    text.parse::<f64>()
        .map(SqlValue::Real)
        .map_err(|_| LixError::InvalidInput(format!("invalid number '{}'", text)))
}

/// JSON value of a SQL literal written to a property of `kind`
fn property_json(value: SqlValue, kind: PropertyKind) -> Value {
    match (kind, value) {
        (_, SqlValue::Null) => Value::Null,
        (PropertyKind::Boolean, SqlValue::Integer(i)) if i == 0 || i == 1 => Value::Bool(i == 1),
        (PropertyKind::Json, SqlValue::Text(text)) => {
            let trimmed = text.trim_start();
            if trimmed.starts_with('{') || trimmed.starts_with('[') {
                serde_json::from_str(&text).unwrap_or(Value::String(text))
            } else {
                Value::String(text)
            }
        }
        (PropertyKind::Bytes, SqlValue::Text(text)) => Value::String(to_hex(text.as_bytes())),
        (_, value) => sql_to_json(&value),
    }
}

fn text_value(column: &str, value: SqlValue) -> LixResult<String> {
    match value {
        SqlValue::Text(text) => Ok(text),
        other => Err(LixError::InvalidInput(format!(
            "column '{}' expects text, got {:?}",
            column, other
        ))),
    }
}

fn values_rows(insert: &Insert) -> LixResult<&Vec<Vec<Expr>>> {
    let body = insert.source.as_ref().map(|source| source.body.as_ref());
    match body {
        Some(SetExpr::Values(values)) => Ok(&values.rows),
        _ => Err(LixError::Unsupported(
            "only INSERT ... VALUES can write to views".to_string(),
        )),
    }
}

fn assignment_column(assignment: &Assignment) -> LixResult<String> {
    let AssignmentTarget::ColumnName(name) = &assignment.target else {
        return Err(LixError::Unsupported(
            "tuple assignments can't write to views".to_string(),
        ));
    };
    name.0
        .last()
        .and_then(|part| part.as_ident())
        .map(|ident| ident.value.to_ascii_lowercase())
        .ok_or_else(|| LixError::Unsupported(format!("unsupported assignment target {}", name)))
}

fn assignments(update: &Update) -> LixResult<Vec<(String, SqlValue)>> {
    update
        .assignments
        .iter()
        .map(|assignment| Ok((assignment_column(assignment)?, literal_value(&assignment.value)?)))
        .collect()
}

fn columns(insert: &Insert) -> LixResult<Vec<String>> {
    if insert.columns.is_empty() {
        return Err(LixError::InvalidInput(
            "INSERT into a view needs an explicit column list".to_string(),
        ));
    }
    Ok(insert
        .columns
        .iter()
        .map(|column| column.value.to_ascii_lowercase())
        .collect())
}

/// Rows of a view matched by a write's `WHERE` clause
fn matching_rows(
    lix: &mut Lix,
    view: &str,
    table: &TableWithJoins,
    selection: Option<&Expr>,
    projection: &str,
) -> LixResult<QueryResult> {
    if !table.joins.is_empty() {
        return Err(LixError::Unsupported("joins in writes to views".to_string()));
    }
    let alias = match &table.relation {
        TableFactor::Table { alias: Some(alias), .. } => format!(" AS {}", alias.name),
        _ => String::new(),
    };
    let filter = selection
        .map(|selection| format!(" WHERE {}", selection))
        .unwrap_or_default();
    let sql = format!("SELECT {} FROM {}{}{}", projection, view, alias, filter);
    super::query_views(lix, &sql)
}

fn row_text(result: &QueryResult, row: usize, column: &str) -> LixResult<String> {
    result
        .get_text(row, column)
        .map(str::to_string)
        .ok_or_else(|| LixError::CorruptState(format!("view row without {}", column)))
}

// Entity views

struct EntityWrite<'a> {
    schema: &'a SchemaDescriptor,
    scope: ViewScope,
    view: &'a str,
}

impl EntityWrite<'_> {
    fn property(&self, column: &str) -> LixResult<(&str, PropertyKind)> {
        self.schema
            .properties
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(column))
            .map(|p| (p.name.as_str(), p.kind))
            .ok_or_else(|| {
                LixError::InvalidInput(format!("view '{}' has no column '{}'", self.view, column))
            })
    }

    fn apply_defaults(&self, lix: &mut Lix, content: &mut Map<String, Value>) {
        for property in &self.schema.properties {
            let Some(default) = &property.default else {
                continue;
            };
            if !content.get(&property.name).map_or(true, Value::is_null) {
                continue;
            }
            let value = match default {
                DefaultValue::Uuid => Value::String(lix.deterministic.uuid()),
                DefaultValue::Timestamp => Value::String(lix.deterministic.timestamp()),
                DefaultValue::Literal(value) => value.clone(),
            };
            content.insert(property.name.clone(), value);
        }
    }

    fn change_input(&self, entity_id: &str, file_id: &str, content: Option<Value>) -> ChangeInput {
        let input = match content {
            Some(content) => ChangeInput::new(entity_id, &self.schema.key, content),
            None => ChangeInput::tombstone(entity_id, &self.schema.key),
        };
        input
            .file_id(file_id)
            .plugin_key(&self.schema.plugin_key)
            .schema_version(&self.schema.version)
    }

    fn insert(&self, lix: &mut Lix, insert: &Insert) -> LixResult<usize> {
        let columns = columns(insert)?;
        let rows = values_rows(insert)?;

        for row in rows {
            if row.len() != columns.len() {
                return Err(LixError::InvalidInput(format!(
                    "INSERT row has {} value(s) for {} column(s)",
                    row.len(),
                    columns.len()
                )));
            }
            let mut content = Map::new();
            let mut version_id = None;
            let mut file_id = None;
            for (column, expr) in columns.iter().zip(row) {
                let value = literal_value(expr)?;
                match column.as_str() {
                    LIXCOL_VERSION_ID if self.scope == ViewScope::All => {
                        version_id = Some(text_value(column, value)?);
                    }
                    LIXCOL_FILE_ID => file_id = Some(text_value(column, value)?),
                    c if c.starts_with(LIXCOL_PREFIX) => {
                        return Err(LixError::InvalidInput(format!(
                            "column '{}' of view '{}' is read-only",
                            c, self.view
                        )));
                    }
                    c => {
                        let (name, kind) = self.property(c)?;
                        content.insert(name.to_string(), property_json(value, kind));
                    }
                }
            }
            self.apply_defaults(lix, &mut content);

            let version_id = version_id.unwrap_or_else(|| lix.active_version_id.clone());
            let file_id = file_id.unwrap_or_else(|| self.schema.default_file_id().to_string());
            let entity_id = self.schema.entity_id(&content)?;
            if resolve(lix, &entity_id, &self.schema.key, &file_id, &version_id)?.is_some() {
                return Err(LixError::InvalidInput(format!(
                    "entity '{}' already exists in view '{}'",
                    entity_id, self.view
                )));
            }

            let content = Value::Object(content);
            write_change(
                lix,
                Some(&version_id),
                self.change_input(&entity_id, &file_id, Some(content.clone())),
            )?;
            if self.schema.key == FILE_SCHEMA_KEY {
                detect_file_changes(lix, &version_id, &entity_id, None, &content)?;
            }
        }
        Ok(rows.len())
    }

    fn matching(&self, lix: &mut Lix, table: &TableWithJoins, selection: Option<&Expr>) -> LixResult<Vec<(String, String, String)>> {
        let projection = match self.scope {
            ViewScope::All => "lixcol_entity_id, lixcol_file_id, lixcol_version_id",
            ViewScope::Active => "lixcol_entity_id, lixcol_file_id",
        };
        let result = matching_rows(lix, self.view, table, selection, projection)?;
        let mut rows = Vec::with_capacity(result.len());
        for row in 0..result.len() {
            let version_id = match self.scope {
                ViewScope::All => row_text(&result, row, LIXCOL_VERSION_ID)?,
                ViewScope::Active => lix.active_version_id.clone(),
            };
            rows.push((
                row_text(&result, row, "lixcol_entity_id")?,
                row_text(&result, row, LIXCOL_FILE_ID)?,
                version_id,
            ));
        }
        Ok(rows)
    }

    fn update(&self, lix: &mut Lix, update: &Update) -> LixResult<usize> {
        let mut changes = Vec::new();
        for (column, value) in assignments(update)? {
            if column.starts_with(LIXCOL_PREFIX) {
                return Err(LixError::InvalidInput(format!(
                    "column '{}' of view '{}' is read-only",
                    column, self.view
                )));
            }
            let (name, kind) = self.property(&column)?;
            if self.schema.primary_key.iter().any(|pk| pk == name) {
                return Err(LixError::InvalidInput(format!(
                    "primary key column '{}' can't be updated",
                    name
                )));
            }
            changes.push((name.to_string(), property_json(value, kind)));
        }

        let rows = self.matching(lix, &update.table, update.selection.as_ref())?;
        let mut written = 0;
        for (entity_id, file_id, version_id) in &rows {
            let Some(current) = resolve(lix, entity_id, &self.schema.key, file_id, version_id)? else {
                continue;
            };
            let mut content = match &current.snapshot_content {
                Value::Object(map) => map.clone(),
                _ => Map::new(),
            };
            for (name, value) in &changes {
                content.insert(name.clone(), value.clone());
            }
            let content = Value::Object(content);
            if content == current.snapshot_content && current.inherited_from_version_id.is_none() {
                continue;
            }
            write_change(
                lix,
                Some(version_id),
                self.change_input(entity_id, file_id, Some(content.clone())),
            )?;
            written += 1;
            if self.schema.key == FILE_SCHEMA_KEY {
                detect_file_changes(lix, version_id, entity_id, Some(&current.snapshot_content), &content)?;
            }
        }
        Ok(written)
    }

    fn delete(&self, lix: &mut Lix, delete: &Delete) -> LixResult<usize> {
        let table = delete_target(delete)
            .ok_or_else(|| LixError::InvalidInput("DELETE without a table".to_string()))?;
        let rows = self.matching(lix, table, delete.selection.as_ref())?;
        for (entity_id, file_id, version_id) in &rows {
            write_change(lix, Some(version_id), self.change_input(entity_id, file_id, None))?;
        }
        Ok(rows.len())
    }
}

fn file_data(content: &Value) -> Option<Vec<u8>> {
    content.get("data").and_then(Value::as_str).and_then(from_hex)
}

fn detect_file_changes(
    lix: &mut Lix,
    version_id: &str,
    file_id: &str,
    before: Option<&Value>,
    after: &Value,
) -> LixResult<usize> {
    let Some(path) = after.get("path").and_then(Value::as_str) else {
        return Ok(0);
    };
    let after_data = file_data(after).unwrap_or_default();
    let before_data = before.and_then(file_data);
    if before.is_some() && before_data.as_deref() == Some(after_data.as_slice()) {
        return Ok(0);
    }
    sync_file_entities(lix, version_id, file_id, path, before_data.as_deref(), &after_data)
}

// version view

fn insert_versions(lix: &mut Lix, insert: &Insert) -> LixResult<usize> {
    let columns = columns(insert)?;
    let rows = values_rows(insert)?;
    for row in rows {
        if row.len() != columns.len() {
            return Err(LixError::InvalidInput(
                "INSERT row length doesn't match the column list".to_string(),
            ));
        }
        let mut options = CreateVersionOptions::default();
        for (column, expr) in columns.iter().zip(row) {
            let value = literal_value(expr)?;
            match column.as_str() {
                "id" => options.id = Some(text_value(column, value)?),
                "name" => options.name = Some(text_value(column, value)?),
                "inherits_from_version_id" => {
                    options.inherits_from = match value {
                        SqlValue::Null => InheritsFrom::None,
                        value => InheritsFrom::Version(text_value(column, value)?),
                    }
                }
                "hidden" => options.hidden = matches!(value, SqlValue::Integer(i) if i != 0),
                other => {
                    return Err(LixError::InvalidInput(format!(
                        "column '{}' of view 'version' can't be set on insert",
                        other
                    )))
                }
            }
        }
        create_version(lix, options)?;
    }
    Ok(rows.len())
}

fn matching_version_ids(lix: &mut Lix, table: &TableWithJoins, selection: Option<&Expr>) -> LixResult<Vec<String>> {
    let result = matching_rows(lix, VERSION_VIEW, table, selection, "id")?;
    (0..result.len()).map(|row| row_text(&result, row, "id")).collect()
}

fn update_versions(lix: &mut Lix, update: &Update) -> LixResult<usize> {
    let changes = assignments(update)?;
    for (column, _) in &changes {
        if column != "name" && column != "inherits_from_version_id" {
            return Err(LixError::Unsupported(format!(
                "column '{}' of view 'version' can't be updated",
                column
            )));
        }
    }
    let ids = matching_version_ids(lix, &update.table, update.selection.as_ref())?;
    for id in &ids {
        for (column, value) in &changes {
            match (column.as_str(), value) {
                ("name", value) => rename_version(lix, id, &text_value(column, value.clone())?)?,
                (_, SqlValue::Null) => set_inheritance(lix, id, None)?,
                (_, value) => set_inheritance(lix, id, Some(&text_value(column, value.clone())?))?,
            }
        }
    }
    Ok(ids.len())
}

fn delete_versions(lix: &mut Lix, delete: &Delete) -> LixResult<usize> {
    let table = delete_target(delete)
        .ok_or_else(|| LixError::InvalidInput("DELETE without a table".to_string()))?;
    let ids = matching_version_ids(lix, table, delete.selection.as_ref())?;
    for id in &ids {
        delete_version(lix, id)?;
    }
    Ok(ids.len())
}

fn update_active_version(lix: &mut Lix, update: &Update) -> LixResult<usize> {
    let changes = assignments(update)?;
    let [(column, value)] = changes.as_slice() else {
        return Err(LixError::InvalidInput(
            "UPDATE active_version sets exactly one column".to_string(),
        ));
    };
    if column != "version_id" {
        return Err(LixError::Unsupported(format!(
            "column '{}' of view 'active_version' can't be updated",
            column
        )));
    }
    let version_id = text_value(column, value.clone())?;
    switch_version(lix, &version_id)?;
    Ok(1)
}

/// Execute a write against a virtual view inside one transaction
pub fn execute_write(
    lix: &mut Lix,
    mut statement: Statement,
    target: WriteTarget,
    params: &[SqlValue],
) -> LixResult<QueryResult> {
    bind_placeholders(&mut statement, params)?;

    let affected = lix.transaction(|lix| match (&target, &statement) {
        (WriteTarget::Entity { schema, scope, view }, statement) => {
            let write = EntityWrite {
                schema,
                scope: *scope,
                view,
            };
            match statement {
                Statement::Insert(insert) => write.insert(lix, insert),
                Statement::Update(update) => write.update(lix, update),
                Statement::Delete(delete) => write.delete(lix, delete),
                _ => Err(LixError::Unsupported("statement kind".to_string())),
            }
        }
        (WriteTarget::Version, Statement::Insert(insert)) => insert_versions(lix, insert),
        (WriteTarget::Version, Statement::Update(update)) => update_versions(lix, update),
        (WriteTarget::Version, Statement::Delete(delete)) => delete_versions(lix, delete),
        (WriteTarget::ActiveVersion, Statement::Update(update)) => update_active_version(lix, update),
        (WriteTarget::ActiveVersion, _) => Err(LixError::Unsupported(
            "active_version only supports UPDATE".to_string(),
        )),
        (WriteTarget::ReadOnly(view), _) => Err(LixError::Unsupported(format!(
            "view '{}' is read-only",
            view
        ))),
        (WriteTarget::Version, _) => Err(LixError::Unsupported("statement kind".to_string())),
    })?;
    Ok(QueryResult::affected(affected))
}
