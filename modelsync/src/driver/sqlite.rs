use super::{ConnectionParams, Row, SqlExecutor};
use crate::error::{ModelError, Result};
use crate::value::Value;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection};
use std::path::Path;
use std::sync::Arc;

/// Embedded SQLite executor.
///
/// Foreign keys are enforced on every connection so relation rows cascade.
pub struct SqliteExecutor {
    conn: Connection,
}

impl SqliteExecutor {
    /// Open or create a database file.
    pub fn open(path: &Path) -> Result<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    /// Connect using the `database` parameter as the file path;
    /// `:memory:` opens an in-memory database.
    pub fn connect(params: &ConnectionParams) -> Result<Self> {
        if params.database == ":memory:" {
            Self::open_in_memory()
        } else {
            Self::open(Path::new(&params.database))
        }
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(SqliteExecutor { conn })
    }

    /// Run several `;`-separated statements.
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    fn run_query(&self, stmt: &mut rusqlite::CachedStatement<'_>, params: &[Value]) -> Result<Vec<Row>> {
        let column_names: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(|name| name.to_string())
            .collect();

        let rows = stmt.query_map(params_from_iter(params.iter().map(to_sql)), |row| {
            let mut out = Row::new();
            for (i, name) in column_names.iter().enumerate() {
                let val: SqlValue = row.get(i)?;
                out.insert(name.clone(), from_sql(val));
            }
            Ok(out)
        })?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }
}

impl SqlExecutor for SqliteExecutor {
    type Prepared = Arc<str>;

    fn execute(&self, sql: &str) -> Result<u64> {
        let affected = self.conn.execute(sql, [])?;
        Ok(affected as u64)
    }

    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        self.run_query(&mut stmt, params)
    }

    fn prepare(&self, sql: &str) -> Result<Self::Prepared> {
        // Compile once up front so malformed SQL fails at prepare time;
        // rusqlite keeps the compiled statement in its own cache.
        self.conn
            .prepare_cached(sql)
            .map_err(|e| ModelError::Sql(format!("Failed to prepare SQL: {e}")))?;
        Ok(Arc::from(sql))
    }

    fn execute_prepared(&self, statement: &Self::Prepared, params: &[Value]) -> Result<u64> {
        let mut stmt = self.conn.prepare_cached(statement)?;
        let affected = stmt.execute(params_from_iter(params.iter().map(to_sql)))?;
        Ok(affected as u64)
    }

    fn query_prepared(&self, statement: &Self::Prepared, params: &[Value]) -> Result<Vec<Row>> {
        let mut stmt = self.conn.prepare_cached(statement)?;
        self.run_query(&mut stmt, params)
    }

    fn quote_literal(&self, literal: &str) -> String {
        format!("'{}'", literal.replace('\'', "''"))
    }
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Integer(n) => SqlValue::Integer(*n),
        Value::Float(f) => SqlValue::Real(*f),
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_json().to_string()),
    }
}

fn from_sql(value: SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(n) => Value::Integer(n),
        SqlValue::Real(f) => Value::Float(f),
        SqlValue::Text(s) => Value::String(s),
        SqlValue::Blob(b) => Value::String(String::from_utf8_lossy(&b).into()),
    }
}
