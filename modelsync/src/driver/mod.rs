//! The SQL execution capability the store and introspector are built on.
//!
//! Transport (connecting, running statements, decoding rows) belongs to the
//! implementor. An embedded SQLite implementation lives in [`sqlite`].

pub mod sqlite;

use crate::error::Result;
use crate::value::Value;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A result row, column name to value, in select order.
pub type Row = IndexMap<String, Value>;

/// Connection parameters handed to an executor implementation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionParams {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default, alias = "password")]
    pub credential: Option<String>,
    #[serde(alias = "dbname")]
    pub database: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub socket: Option<String>,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    3306
}

impl ConnectionParams {
    pub fn new(database: impl Into<String>) -> Self {
        ConnectionParams {
            host: default_host(),
            user: None,
            credential: None,
            database: database.into(),
            port: default_port(),
            socket: None,
        }
    }

    /// Parse connection parameters from a YAML (or JSON) document.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }
}

/// Narrow statement execution interface.
///
/// Implementations are used from one thread at a time; the store never
/// shares an executor across concurrent callers.
pub trait SqlExecutor {
    /// Reusable prepared statement handle.
    type Prepared: Clone;

    /// Run a statement without parameters, returning the affected row count.
    fn execute(&self, sql: &str) -> Result<u64>;

    /// Run a query with positional `?` parameters.
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    fn prepare(&self, sql: &str) -> Result<Self::Prepared>;

    fn execute_prepared(&self, statement: &Self::Prepared, params: &[Value]) -> Result<u64>;

    fn query_prepared(&self, statement: &Self::Prepared, params: &[Value]) -> Result<Vec<Row>>;

    /// Quote an identifier (table, column, index name).
    fn quote_identifier(&self, identifier: &str) -> String {
        format!("`{}`", identifier.replace('`', "``"))
    }

    /// Quote a string literal.
    fn quote_literal(&self, literal: &str) -> String {
        format!("'{}'", literal.replace('\\', "\\\\").replace('\'', "''"))
    }
}

impl<E: SqlExecutor + ?Sized> SqlExecutor for &E {
    type Prepared = E::Prepared;

    fn execute(&self, sql: &str) -> Result<u64> {
        (**self).execute(sql)
    }

    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        (**self).query(sql, params)
    }

    fn prepare(&self, sql: &str) -> Result<Self::Prepared> {
        (**self).prepare(sql)
    }

    fn execute_prepared(&self, statement: &Self::Prepared, params: &[Value]) -> Result<u64> {
        (**self).execute_prepared(statement, params)
    }

    fn query_prepared(&self, statement: &Self::Prepared, params: &[Value]) -> Result<Vec<Row>> {
        (**self).query_prepared(statement, params)
    }

    fn quote_identifier(&self, identifier: &str) -> String {
        (**self).quote_identifier(identifier)
    }

    fn quote_literal(&self, literal: &str) -> String {
        (**self).quote_literal(literal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_params_defaults() {
        let params = ConnectionParams::from_yaml_str("database: shop\nuser: app\npassword: s3cret").unwrap();
        assert_eq!(params.host, "localhost");
        assert_eq!(params.port, 3306);
        assert_eq!(params.user.as_deref(), Some("app"));
        assert_eq!(params.credential.as_deref(), Some("s3cret"));
        assert_eq!(params.database, "shop");
        assert!(params.socket.is_none());
    }

    #[test]
    fn test_connection_params_requires_database() {
        assert!(ConnectionParams::from_yaml_str("host: db.internal").is_err());
    }
}
