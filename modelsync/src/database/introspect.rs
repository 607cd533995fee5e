//! Reading the live structure of a database.

use super::types::{
    Action, Column, ColumnType, DatabaseSchema, ForeignRef, Index, IndexKind, Table, PRIMARY_INDEX,
};
use crate::driver::{Row, SqlExecutor};
use crate::error::{ModelError, Result};
use crate::value::Value;
use log::debug;

/// Anything that can report the current structure of a database.
pub trait Introspect {
    fn introspect(&self) -> Result<DatabaseSchema>;
}

/// A snapshot is its own introspection result.
impl Introspect for DatabaseSchema {
    fn introspect(&self) -> Result<DatabaseSchema> {
        Ok(self.clone())
    }
}

const TABLES_SQL: &str = "SELECT TABLE_NAME FROM information_schema.TABLES \
     WHERE TABLE_SCHEMA = DATABASE() AND TABLE_TYPE = 'BASE TABLE' \
     ORDER BY TABLE_NAME";

const COLUMNS_SQL: &str = "SELECT TABLE_NAME, COLUMN_NAME, COLUMN_TYPE, IS_NULLABLE, COLUMN_DEFAULT \
     FROM information_schema.COLUMNS \
     WHERE TABLE_SCHEMA = DATABASE() \
     ORDER BY TABLE_NAME, ORDINAL_POSITION";

const INDEXES_SQL: &str = "SELECT TABLE_NAME, INDEX_NAME, NON_UNIQUE, COLUMN_NAME \
     FROM information_schema.STATISTICS \
     WHERE TABLE_SCHEMA = DATABASE() \
     ORDER BY TABLE_NAME, INDEX_NAME, SEQ_IN_INDEX";

const FOREIGN_KEYS_SQL: &str = "SELECT k.TABLE_NAME, k.CONSTRAINT_NAME, k.COLUMN_NAME, \
     k.REFERENCED_TABLE_NAME, k.REFERENCED_COLUMN_NAME, r.UPDATE_RULE, r.DELETE_RULE \
     FROM information_schema.KEY_COLUMN_USAGE k \
     JOIN information_schema.REFERENTIAL_CONSTRAINTS r \
       ON r.CONSTRAINT_SCHEMA = k.CONSTRAINT_SCHEMA \
      AND r.CONSTRAINT_NAME = k.CONSTRAINT_NAME \
      AND r.TABLE_NAME = k.TABLE_NAME \
     WHERE k.TABLE_SCHEMA = DATABASE() AND k.REFERENCED_TABLE_NAME IS NOT NULL \
     ORDER BY k.TABLE_NAME, k.CONSTRAINT_NAME, k.ORDINAL_POSITION";

/// Introspection through the `information_schema` views of the connected
/// database.
pub struct InformationSchema<E> {
    executor: E,
}

impl<E: SqlExecutor> InformationSchema<E> {
    pub fn new(executor: E) -> Self {
        InformationSchema { executor }
    }

    fn query(&self, sql: &str) -> Result<Vec<Row>> {
        debug!("introspect: {sql}");
        self.executor.query(sql, &[])
    }
}

impl<E: SqlExecutor> Introspect for InformationSchema<E> {
    fn introspect(&self) -> Result<DatabaseSchema> {
        let mut schema = DatabaseSchema::default();

        for row in self.query(TABLES_SQL)? {
            let name = text(&row, "TABLE_NAME")?;
            schema.tables.insert(name.clone(), Table::new(name));
        }

        for row in self.query(COLUMNS_SQL)? {
            let Some(table) = schema.tables.get_mut(&text(&row, "TABLE_NAME")?) else {
                continue;
            };
            table.columns.push(Column {
                name: text(&row, "COLUMN_NAME")?,
                column_type: ColumnType::parse(&text(&row, "COLUMN_TYPE")?),
                required: text(&row, "IS_NULLABLE")?.eq_ignore_ascii_case("NO"),
                default: column_default(row.get("COLUMN_DEFAULT")),
            });
        }

        let foreign_rows = self.query(FOREIGN_KEYS_SQL)?;

        for row in self.query(INDEXES_SQL)? {
            let table_name = text(&row, "TABLE_NAME")?;
            let index_name = text(&row, "INDEX_NAME")?;
            // The server backs each foreign key with an index of the same name
            let backs_foreign_key = foreign_rows.iter().any(|fk| {
                fk.get("TABLE_NAME").and_then(Value::as_str) == Some(table_name.as_str())
                    && fk.get("CONSTRAINT_NAME").and_then(Value::as_str) == Some(index_name.as_str())
            });
            if backs_foreign_key {
                continue;
            }
            let Some(table) = schema.tables.get_mut(&table_name) else {
                continue;
            };
            let kind = if index_name == PRIMARY_INDEX {
                IndexKind::Primary
            } else if flag(&row, "NON_UNIQUE") {
                IndexKind::Index
            } else {
                IndexKind::Unique
            };
            table.push_index_column(&index_name, kind, &text(&row, "COLUMN_NAME")?);
        }

        for row in foreign_rows {
            let Some(table) = schema.tables.get_mut(&text(&row, "TABLE_NAME")?) else {
                continue;
            };
            let name = text(&row, "CONSTRAINT_NAME")?;
            let column = text(&row, "COLUMN_NAME")?;
            let referenced = text(&row, "REFERENCED_COLUMN_NAME")?;

            match table.indexes.iter_mut().find(|i| i.name == name) {
                Some(Index {
                    columns,
                    reference: Some(reference),
                    ..
                }) => {
                    columns.push(column);
                    reference.columns.push(referenced);
                }
                _ => table.indexes.push(Index::foreign(
                    name,
                    vec![column],
                    ForeignRef {
                        table: text(&row, "REFERENCED_TABLE_NAME")?,
                        columns: vec![referenced],
                        on_update: Action::parse(&text(&row, "UPDATE_RULE")?),
                        on_delete: Action::parse(&text(&row, "DELETE_RULE")?),
                    },
                )),
            }
        }

        debug!("introspect: found {} tables", schema.tables.len());
        Ok(schema)
    }
}

fn text(row: &Row, column: &str) -> Result<String> {
    match row.get(column) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Integer(n)) => Ok(n.to_string()),
        _ => Err(ModelError::Sql(format!(
            "introspection row is missing column '{column}'"
        ))),
    }
}

fn flag(row: &Row, column: &str) -> bool {
    match row.get(column) {
        Some(Value::Integer(n)) => *n != 0,
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s != "0",
        _ => false,
    }
}

/// Some servers report string defaults quoted and a missing default as the
/// text `NULL`.
fn column_default(value: Option<&Value>) -> Option<String> {
    let raw = match value? {
        Value::Null => return None,
        Value::String(s) => s.clone(),
        other => other.to_key(),
    };
    if raw.eq_ignore_ascii_case("NULL") {
        return None;
    }
    match raw.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')) {
        Some(inner) => Some(inner.replace("''", "'")),
        None => Some(raw),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::driver::Row;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;

    /// Answers queries from canned rows, matched on a fragment of the SQL.
    #[derive(Default)]
    pub(crate) struct ScriptedExecutor {
        answers: Vec<(&'static str, Vec<Row>)>,
        pub(crate) seen: RefCell<Vec<String>>,
    }

    impl ScriptedExecutor {
        pub(crate) fn answer(mut self, fragment: &'static str, rows: Vec<Row>) -> Self {
            self.answers.push((fragment, rows));
            self
        }
    }

    impl SqlExecutor for ScriptedExecutor {
        type Prepared = String;

        fn execute(&self, sql: &str) -> Result<u64> {
            self.seen.borrow_mut().push(sql.to_string());
            Ok(0)
        }

        fn query(&self, sql: &str, _params: &[Value]) -> Result<Vec<Row>> {
            self.seen.borrow_mut().push(sql.to_string());
            Ok(self
                .answers
                .iter()
                .find(|(fragment, _)| sql.contains(fragment))
                .map(|(_, rows)| rows.clone())
                .unwrap_or_default())
        }

        fn prepare(&self, sql: &str) -> Result<String> {
            Ok(sql.to_string())
        }

        fn execute_prepared(&self, statement: &String, _params: &[Value]) -> Result<u64> {
            self.execute(statement)
        }

        fn query_prepared(&self, statement: &String, params: &[Value]) -> Result<Vec<Row>> {
            self.query(statement, params)
        }
    }

    pub(crate) fn row(pairs: &[(&str, Value)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn s(v: &str) -> Value {
        Value::from(v)
    }

    fn executor() -> ScriptedExecutor {
        ScriptedExecutor::default()
            .answer(
                "information_schema.TABLES",
                vec![
                    row(&[("TABLE_NAME", s("customer"))]),
                    row(&[("TABLE_NAME", s("order"))]),
                ],
            )
            .answer(
                "information_schema.COLUMNS",
                vec![
                    row(&[
                        ("TABLE_NAME", s("customer")),
                        ("COLUMN_NAME", s("id")),
                        ("COLUMN_TYPE", s("char(36)")),
                        ("IS_NULLABLE", s("NO")),
                        ("COLUMN_DEFAULT", Value::Null),
                    ]),
                    row(&[
                        ("TABLE_NAME", s("customer")),
                        ("COLUMN_NAME", s("role")),
                        ("COLUMN_TYPE", s("varchar(255)")),
                        ("IS_NULLABLE", s("YES")),
                        ("COLUMN_DEFAULT", s("'member'")),
                    ]),
                    row(&[
                        ("TABLE_NAME", s("order")),
                        ("COLUMN_NAME", s("id")),
                        ("COLUMN_TYPE", s("bigint(20)")),
                        ("IS_NULLABLE", s("NO")),
                        ("COLUMN_DEFAULT", s("NULL")),
                    ]),
                    row(&[
                        ("TABLE_NAME", s("order")),
                        ("COLUMN_NAME", s("buyer")),
                        ("COLUMN_TYPE", s("char(36)")),
                        ("IS_NULLABLE", s("YES")),
                        ("COLUMN_DEFAULT", Value::Null),
                    ]),
                ],
            )
            .answer(
                "information_schema.STATISTICS",
                vec![
                    row(&[
                        ("TABLE_NAME", s("customer")),
                        ("INDEX_NAME", s("PRIMARY")),
                        ("NON_UNIQUE", Value::Integer(0)),
                        ("COLUMN_NAME", s("id")),
                    ]),
                    row(&[
                        ("TABLE_NAME", s("customer")),
                        ("INDEX_NAME", s("by_role")),
                        ("NON_UNIQUE", Value::Integer(0)),
                        ("COLUMN_NAME", s("role")),
                    ]),
                    row(&[
                        ("TABLE_NAME", s("customer")),
                        ("INDEX_NAME", s("by_role")),
                        ("NON_UNIQUE", Value::Integer(0)),
                        ("COLUMN_NAME", s("id")),
                    ]),
                    row(&[
                        ("TABLE_NAME", s("order")),
                        ("INDEX_NAME", s("PRIMARY")),
                        ("NON_UNIQUE", Value::Integer(0)),
                        ("COLUMN_NAME", s("id")),
                    ]),
                    row(&[
                        ("TABLE_NAME", s("order")),
                        ("INDEX_NAME", s("fk_order_buyer")),
                        ("NON_UNIQUE", Value::Integer(1)),
                        ("COLUMN_NAME", s("buyer")),
                    ]),
                ],
            )
            .answer(
                "information_schema.KEY_COLUMN_USAGE",
                vec![row(&[
                    ("TABLE_NAME", s("order")),
                    ("CONSTRAINT_NAME", s("fk_order_buyer")),
                    ("COLUMN_NAME", s("buyer")),
                    ("REFERENCED_TABLE_NAME", s("customer")),
                    ("REFERENCED_COLUMN_NAME", s("id")),
                    ("UPDATE_RULE", s("CASCADE")),
                    ("DELETE_RULE", s("SET NULL")),
                ])],
            )
    }

    #[test]
    fn test_introspect_tables_and_columns() {
        let schema = InformationSchema::new(executor()).introspect().unwrap();
        let names: Vec<&String> = schema.tables.keys().collect();
        assert_eq!(names, vec!["customer", "order"]);

        let customer = schema.table("customer").unwrap();
        assert_eq!(customer.columns.len(), 2);
        let role = customer.column("role").unwrap();
        assert_eq!(role.column_type, ColumnType::Varchar(255));
        assert!(!role.required);
        assert_eq!(role.default.as_deref(), Some("member"));

        let order = schema.table("order").unwrap();
        let id = order.column("id").unwrap();
        assert_eq!(id.column_type, ColumnType::BigInt);
        assert!(id.required);
        assert_eq!(id.default, None);
    }

    #[test]
    fn test_introspect_indexes() {
        let schema = InformationSchema::new(executor()).introspect().unwrap();
        let customer = schema.table("customer").unwrap();
        assert_eq!(customer.primary_key().unwrap().columns, vec!["id".to_string()]);
        let by_role = customer.index("by_role").unwrap();
        assert_eq!(by_role.kind, IndexKind::Unique);
        assert_eq!(by_role.columns, vec!["role".to_string(), "id".to_string()]);
    }

    #[test]
    fn test_introspect_foreign_keys() {
        let schema = InformationSchema::new(executor()).introspect().unwrap();
        let order = schema.table("order").unwrap();
        assert_eq!(order.indexes.len(), 2);
        let fk = order.index("fk_order_buyer").unwrap();
        assert_eq!(fk.kind, IndexKind::Foreign);
        assert_eq!(
            fk.reference,
            Some(ForeignRef {
                table: "customer".into(),
                columns: vec!["id".into()],
                on_update: Action::Cascade,
                on_delete: Action::SetNull,
            })
        );
    }

    #[test]
    fn test_introspect_scopes_to_current_database() {
        let executor = executor();
        InformationSchema::new(&executor).introspect().unwrap();
        let seen = executor.seen.borrow();
        assert_eq!(seen.len(), 4);
        assert!(seen.iter().all(|sql| sql.contains("DATABASE()")));
    }

    #[test]
    fn test_missing_column_is_an_error() {
        let executor = ScriptedExecutor::default()
            .answer("information_schema.TABLES", vec![row(&[("NAME", s("x"))])]);
        assert!(InformationSchema::new(executor).introspect().is_err());
    }
}
