//! Persistence collaborator — parameterized statements over a swappable backend.
//!
//! Pipelines talk to the `Database` trait so tests can run against an
//! in-memory SQLite database. Statements carry typed parameters rather than
//! spliced literals; `Statement::literal_sql` exists for logging only.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use chrono::NaiveDate;
use rusqlite::types::Value as SqliteValue;
use rusqlite::{params_from_iter, Connection};
use thiserror::Error;

/// A typed SQL parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Int(i64),
    Real(f64),
    Text(String),
    Date(NaiveDate),
}

impl SqlValue {
    /// Convert a JSON value into a SQL parameter.
    ///
    /// Non-finite numbers become `Null` — a quote field that failed to parse
    /// upstream must land in the database as NULL, not as a stringified NaN.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => SqlValue::Null,
            serde_json::Value::Bool(b) => SqlValue::Int(i64::from(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    SqlValue::Int(i)
                } else {
                    match n.as_f64() {
                        Some(f) if f.is_finite() => SqlValue::Real(f),
                        _ => SqlValue::Null,
                    }
                }
            }
            serde_json::Value::String(s) => SqlValue::Text(s.clone()),
            other => SqlValue::Text(other.to_string()),
        }
    }

    /// Render as a SQL literal, quoting and escaping text.
    pub fn literal(&self) -> String {
        match self {
            SqlValue::Null => "NULL".to_string(),
            SqlValue::Int(i) => i.to_string(),
            SqlValue::Real(f) if f.is_finite() => f.to_string(),
            SqlValue::Real(_) => "NULL".to_string(),
            SqlValue::Text(s) => format!("'{}'", s.replace('\'', "''")),
            SqlValue::Date(d) => format!("'{d}'"),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.literal())
    }
}

/// A schema-qualified table name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub schema: String,
    pub table: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

/// A parameterized SQL statement: text with `?N` placeholders plus values.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    /// A statement with no parameters.
    pub fn bare(sql: impl Into<String>) -> Self {
        Self::new(sql, Vec::new())
    }

    /// Substitute parameters as literals, for logs and summaries.
    ///
    /// Placeholders are replaced highest-index first so `?1` never matches
    /// inside `?10`.
    pub fn literal_sql(&self) -> String {
        let mut rendered = self.sql.clone();
        for (i, value) in self.params.iter().enumerate().rev() {
            rendered = rendered.replace(&format!("?{}", i + 1), &value.literal());
        }
        rendered
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.literal_sql())
    }
}

/// A result row: column name → value.
pub type Row = BTreeMap<String, SqlValue>;

/// Errors from the persistence layer.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("failed to open database at {path}: {source}")]
    Open {
        path: String,
        source: rusqlite::Error,
    },

    #[error("statement failed: {sql}: {source}")]
    Execute {
        sql: String,
        source: rusqlite::Error,
    },

    #[error("bulk load into {table} failed: {source}")]
    BulkLoad {
        table: String,
        source: rusqlite::Error,
    },
}

/// The persistence collaborator.
///
/// `execute` routes SELECT results back as rows; non-SELECT statements
/// return an empty row set. `bulk_load` is the append path for collected
/// quote rows. Failures propagate — there is no retry and no rollback
/// across statements already executed in the current run.
pub trait Database {
    fn execute(&self, stmt: &Statement) -> Result<Vec<Row>, DbError>;

    fn bulk_load(
        &self,
        table: &TableRef,
        columns: &[&str],
        rows: &[Vec<SqlValue>],
    ) -> Result<usize, DbError>;
}

/// SQLite-backed implementation.
///
/// The pipeline is single-threaded and sequential, so the connection lives
/// in a `RefCell` rather than behind a lock.
pub struct SqliteDatabase {
    conn: RefCell<Connection>,
}

impl SqliteDatabase {
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path).map_err(|e| DbError::Open {
            path: path.display().to_string(),
            source: e,
        })?;
        Ok(Self {
            conn: RefCell::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory().map_err(|e| DbError::Open {
            path: ":memory:".to_string(),
            source: e,
        })?;
        Ok(Self {
            conn: RefCell::new(conn),
        })
    }
}

fn to_sqlite(value: &SqlValue) -> SqliteValue {
    match value {
        SqlValue::Null => SqliteValue::Null,
        SqlValue::Int(i) => SqliteValue::Integer(*i),
        SqlValue::Real(f) if f.is_finite() => SqliteValue::Real(*f),
        SqlValue::Real(_) => SqliteValue::Null,
        SqlValue::Text(s) => SqliteValue::Text(s.clone()),
        SqlValue::Date(d) => SqliteValue::Text(d.to_string()),
    }
}

fn from_sqlite(value: SqliteValue) -> SqlValue {
    match value {
        SqliteValue::Null => SqlValue::Null,
        SqliteValue::Integer(i) => SqlValue::Int(i),
        SqliteValue::Real(f) => SqlValue::Real(f),
        SqliteValue::Text(s) => SqlValue::Text(s),
        SqliteValue::Blob(b) => SqlValue::Text(String::from_utf8_lossy(&b).into_owned()),
    }
}

impl Database for SqliteDatabase {
    fn execute(&self, stmt: &Statement) -> Result<Vec<Row>, DbError> {
        let conn = self.conn.borrow();
        let mut prepared = conn.prepare(&stmt.sql).map_err(|e| DbError::Execute {
            sql: stmt.sql.clone(),
            source: e,
        })?;

        let params: Vec<SqliteValue> = stmt.params.iter().map(to_sqlite).collect();

        if prepared.column_count() == 0 {
            prepared
                .execute(params_from_iter(params))
                .map_err(|e| DbError::Execute {
                    sql: stmt.sql.clone(),
                    source: e,
                })?;
            return Ok(Vec::new());
        }

        let names: Vec<String> = prepared
            .column_names()
            .iter()
            .map(|n| n.to_string())
            .collect();

        let mut rows = prepared
            .query(params_from_iter(params))
            .map_err(|e| DbError::Execute {
                sql: stmt.sql.clone(),
                source: e,
            })?;

        let mut out = Vec::new();
        loop {
            let row = rows.next().map_err(|e| DbError::Execute {
                sql: stmt.sql.clone(),
                source: e,
            })?;
            let Some(row) = row else { break };

            let mut map = Row::new();
            for (i, name) in names.iter().enumerate() {
                let value: SqliteValue = row.get(i).map_err(|e| DbError::Execute {
                    sql: stmt.sql.clone(),
                    source: e,
                })?;
                map.insert(name.clone(), from_sqlite(value));
            }
            out.push(map);
        }

        Ok(out)
    }

    fn bulk_load(
        &self,
        table: &TableRef,
        columns: &[&str],
        rows: &[Vec<SqlValue>],
    ) -> Result<usize, DbError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn.borrow_mut();
        let tx = conn.transaction().map_err(|e| DbError::BulkLoad {
            table: table.to_string(),
            source: e,
        })?;

        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "INSERT INTO {table} ({}) VALUES ({})",
            columns.join(", "),
            placeholders.join(", ")
        );

        {
            let mut prepared = tx.prepare(&sql).map_err(|e| DbError::BulkLoad {
                table: table.to_string(),
                source: e,
            })?;
            for row in rows {
                prepared
                    .execute(params_from_iter(row.iter().map(to_sqlite)))
                    .map_err(|e| DbError::BulkLoad {
                        table: table.to_string(),
                        source: e,
                    })?;
            }
        }

        tx.commit().map_err(|e| DbError::BulkLoad {
            table: table.to_string(),
            source: e,
        })?;

        Ok(rows.len())
    }
}
