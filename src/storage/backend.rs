//! SQLite connection wrapper
//!
//! All engine state lives in one SQLite database. The backend exposes
//! the handful of primitives the rest of the crate needs: parameterized
//! execution, row collection into [`QueryResult`], manual transaction
//! control and the untracked meta key/value table.

use std::path::Path;

use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use crate::errors::{LixError, LixResult};

use super::schema;

/// Rows returned by a statement
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
    /// Rows changed by a write statement; zero for reads
    pub rows_affected: usize,
}

impl QueryResult {
    pub fn affected(rows_affected: usize) -> Self {
        Self {
            rows_affected,
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.eq_ignore_ascii_case(name))
    }

    /// Value of `column` in row `row`
    pub fn get(&self, row: usize, column: &str) -> Option<&SqlValue> {
        let index = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(index))
    }

    /// Text value of `column` in row `row`, `None` for NULL or other types
    pub fn get_text(&self, row: usize, column: &str) -> Option<&str> {
        match self.get(row, column) {
            Some(SqlValue::Text(text)) => Some(text.as_str()),
            _ => None,
        }
    }

    /// Rows as JSON objects keyed by column name
    pub fn to_json_rows(&self) -> Vec<serde_json::Value> {
        self.rows
            .iter()
            .map(|row| {
                let object = self
                    .columns
                    .iter()
                    .zip(row.iter())
                    .map(|(column, value)| (column.clone(), sql_to_json(value)))
                    .collect::<serde_json::Map<_, _>>();
                serde_json::Value::Object(object)
            })
            .collect()
    }
}

/// Convert a SQL value to JSON; blobs become hex strings
pub fn sql_to_json(value: &SqlValue) -> serde_json::Value {
    match value {
        SqlValue::Null => serde_json::Value::Null,
        SqlValue::Integer(i) => serde_json::Value::from(*i),
        SqlValue::Real(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        SqlValue::Text(s) => serde_json::Value::String(s.clone()),
        SqlValue::Blob(bytes) => serde_json::Value::String(to_hex(bytes)),
    }
}

/// Convert a JSON parameter to a SQL value; arrays and objects are bound as JSON text
pub fn json_to_sql(value: &serde_json::Value) -> SqlValue {
    match value {
        serde_json::Value::Null => SqlValue::Null,
        serde_json::Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        serde_json::Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

pub fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

pub fn from_hex(text: &str) -> Option<Vec<u8>> {
    if text.len() % 2 != 0 {
        return None;
    }
    (0..text.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(text.get(i..i + 2)?, 16).ok())
        .collect()
}

/// Owned SQLite connection plus the engine's schema
#[derive(Debug)]
pub struct Backend {
    conn: Connection,
}

impl Backend {
    /// Fresh in-memory database with the engine schema applied
    pub fn open_in_memory() -> LixResult<Self> {
        let conn = Connection::open_in_memory()?;
        let backend = Self { conn };
        schema::init_schema(&backend.conn)?;
        Ok(backend)
    }

    /// In-memory database populated from a SQLite file image on disk
    ///
    /// The engine schema is created first. Engine tables receive their rows
    /// in dependency order; any other table (cache tables, user tables) is
    /// recreated from the image together with its indexes.
    pub fn restore_from_file(path: &Path) -> LixResult<Self> {
        let conn = Connection::open_in_memory()?;
        schema::init_schema(&conn)?;
        let backend = Self { conn };
        backend.copy_from_attached(path)?;
        Ok(backend)
    }

    fn copy_from_attached(&self, path: &Path) -> LixResult<()> {
        let path = path.to_string_lossy().to_string();
        self.conn
            .execute("ATTACH DATABASE ?1 AS lix_import", params![path])?;

        let result = self.copy_attached_tables();
        let detach = self.conn.execute_batch("DETACH DATABASE lix_import");
        result?;
        detach?;
        Ok(())
    }

    fn attached_objects(&self, kind: &str) -> LixResult<Vec<(String, String, String)>> {
        let mut stmt = self.conn.prepare(
            "SELECT name, tbl_name, sql FROM lix_import.sqlite_master \
             WHERE type = ?1 AND sql IS NOT NULL AND name NOT LIKE 'sqlite_%' \
             ORDER BY name",
        )?;
        let rows = stmt.query_map(params![kind], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn copy_rows(&self, table: &str) -> LixResult<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO main.{0} SELECT * FROM lix_import.{0}",
                quote_identifier(table)
            ),
            [],
        )?;
        Ok(())
    }

    fn copy_attached_tables(&self) -> LixResult<()> {
        let tables = self.attached_objects("table")?;
        let imported: Vec<&str> = tables.iter().map(|(name, _, _)| name.as_str()).collect();
        if !imported.contains(&schema::CHANGE_TABLE) {
            return Err(LixError::CorruptState(
                "database image has no change log".to_string(),
            ));
        }

        for table in schema::ENGINE_TABLES {
            if imported.contains(table) {
                self.copy_rows(table)?;
            }
        }

        for (name, _, create_sql) in &tables {
            if schema::ENGINE_TABLES.contains(&name.as_str()) {
                continue;
            }
            if !self.table_exists(name)? {
                self.conn.execute_batch(create_sql)?;
            }
            self.copy_rows(name)?;
        }

        for (name, table, create_sql) in self.attached_objects("index")? {
            if schema::ENGINE_TABLES.contains(&table.as_str()) {
                continue;
            }
            let exists: i64 = self.conn.query_row(
                "SELECT COUNT(*) FROM main.sqlite_master WHERE type = 'index' AND name = ?1",
                params![name],
                |row| row.get(0),
            )?;
            if exists == 0 {
                self.conn.execute_batch(&create_sql)?;
            }
        }
        Ok(())
    }

    /// Write a compacted image of the database to `path`
    pub fn vacuum_into(&self, path: &Path) -> LixResult<()> {
        let path = path.to_string_lossy().replace('\'', "''");
        self.conn.execute_batch(&format!("VACUUM INTO '{}'", path))?;
        Ok(())
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }

    pub fn begin(&self) -> LixResult<()> {
        self.conn.execute_batch("BEGIN")?;
        Ok(())
    }

    pub fn commit(&self) -> LixResult<()> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    pub fn rollback(&self) -> LixResult<()> {
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }

    pub fn execute(&self, sql: &str, params: &[SqlValue]) -> LixResult<usize> {
        Ok(self.conn.execute(sql, params_from_iter(params.iter()))?)
    }

    pub fn execute_batch(&self, sql: &str) -> LixResult<()> {
        Ok(self.conn.execute_batch(sql)?)
    }

    /// Run any statement; statements that return no columns report affected rows
    pub fn query(&self, sql: &str, params: &[SqlValue]) -> LixResult<QueryResult> {
        let mut stmt = self.conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        if columns.is_empty() {
            let rows_affected = stmt.execute(params_from_iter(params.iter()))?;
            return Ok(QueryResult::affected(rows_affected));
        }

        let width = columns.len();
        let mut rows = Vec::new();
        let mut cursor = stmt.query(params_from_iter(params.iter()))?;
        while let Some(row) = cursor.next()? {
            let mut values = Vec::with_capacity(width);
            for index in 0..width {
                values.push(row.get::<_, SqlValue>(index)?);
            }
            rows.push(values);
        }
        Ok(QueryResult {
            columns,
            rows,
            rows_affected: 0,
        })
    }

    /// Untracked engine metadata
    pub fn get_meta(&self, key: &str) -> LixResult<Option<String>> {
        Ok(self
            .conn
            .query_row(
                "SELECT value FROM lix_internal_meta WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn set_meta(&self, key: &str, value: &str) -> LixResult<()> {
        self.conn.execute(
            "INSERT INTO lix_internal_meta (key, value) VALUES (?1, ?2) \
             ON CONFLICT (key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn table_exists(&self, name: &str) -> LixResult<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}

pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
