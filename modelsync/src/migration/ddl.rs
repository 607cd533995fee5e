//! MySQL DDL for a list of schema changes.

use super::SchemaChange;
use crate::database::{Column, Index, IndexKind, Table};
use indexmap::IndexMap;

pub(crate) fn render(changes: &[SchemaChange]) -> Vec<String> {
    let mut creates = Vec::new();
    let mut dropped_keys: IndexMap<&str, Vec<String>> = IndexMap::new();
    let mut alters: IndexMap<&str, Vec<(u8, String)>> = IndexMap::new();
    let mut added_keys = Vec::new();

    for change in changes {
        let table = change.table();
        match change {
            SchemaChange::DropForeignKey { name, .. } => dropped_keys
                .entry(table)
                .or_default()
                .push(format!("DROP FOREIGN KEY {}", ident(name))),
            SchemaChange::CreateTable { table } => {
                // Creation keeps its slot among the altered tables
                alters.entry(table.name.as_str()).or_default();
                creates.push((table.name.as_str(), create_table(table)));
            }
            SchemaChange::DropIndex { index, .. } => {
                let clause = match index.kind {
                    IndexKind::Primary => "DROP PRIMARY KEY".to_string(),
                    _ => format!("DROP INDEX {}", ident(&index.name)),
                };
                alters.entry(table).or_default().push((0, clause));
            }
            SchemaChange::DropColumn { column, .. } => {
                alters
                    .entry(table)
                    .or_default()
                    .push((1, format!("DROP COLUMN {}", ident(column))));
            }
            SchemaChange::RenameColumn { from, column, .. } => {
                alters
                    .entry(table)
                    .or_default()
                    .push((2, format!("CHANGE COLUMN {} {}", ident(from), column_definition(column))));
            }
            SchemaChange::AlterColumn { column, .. } => {
                alters
                    .entry(table)
                    .or_default()
                    .push((3, format!("MODIFY COLUMN {}", column_definition(column))));
            }
            SchemaChange::AddColumn { column, .. } => {
                alters
                    .entry(table)
                    .or_default()
                    .push((4, format!("ADD COLUMN {}", column_definition(column))));
            }
            SchemaChange::AddIndex { index, .. } => {
                alters
                    .entry(table)
                    .or_default()
                    .push((5, format!("ADD {}", index_definition(index))));
            }
            SchemaChange::AddForeignKey { index, .. } => {
                if let Some(sql) = add_foreign_key(table, index) {
                    added_keys.push(sql);
                }
            }
        }
    }

    let mut out: Vec<String> = dropped_keys
        .into_iter()
        .map(|(table, clauses)| format!("ALTER TABLE {} {}", ident(table), clauses.join(", ")))
        .collect();

    for (table, mut clauses) in alters {
        if let Some(pos) = creates.iter().position(|(t, _)| *t == table) {
            out.push(creates.remove(pos).1);
        }
        if clauses.is_empty() {
            continue;
        }
        clauses.sort_by_key(|(rank, _)| *rank);
        let clauses: Vec<String> = clauses.into_iter().map(|(_, clause)| clause).collect();
        out.push(format!("ALTER TABLE {} {}", ident(table), clauses.join(", ")));
    }

    out.extend(added_keys);
    out
}

fn create_table(table: &Table) -> String {
    let mut parts: Vec<String> = table.columns.iter().map(column_definition).collect();
    parts.extend(
        table
            .indexes
            .iter()
            .filter(|i| !i.is_foreign())
            .map(index_definition),
    );
    format!("CREATE TABLE IF NOT EXISTS {} ({})", ident(&table.name), parts.join(", "))
}

fn column_definition(column: &Column) -> String {
    let mut sql = format!(
        "{} {} {}",
        ident(&column.name),
        column.column_type,
        if column.required { "NOT NULL" } else { "NULL" }
    );
    if let Some(default) = &column.default {
        let numeric = column.column_type.is_numeric() && default.parse::<f64>().is_ok();
        sql.push_str(" DEFAULT ");
        if numeric {
            sql.push_str(default);
        } else {
            sql.push_str(&literal(default));
        }
    }
    sql
}

fn index_definition(index: &Index) -> String {
    let columns = column_list(&index.columns);
    match index.kind {
        IndexKind::Primary => format!("PRIMARY KEY {columns}"),
        IndexKind::Unique => format!("UNIQUE KEY {} {columns}", ident(&index.name)),
        IndexKind::Index | IndexKind::Foreign => format!("KEY {} {columns}", ident(&index.name)),
    }
}

fn add_foreign_key(table: &str, index: &Index) -> Option<String> {
    let reference = index.reference.as_ref()?;
    Some(format!(
        "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY {} REFERENCES {} {} ON UPDATE {} ON DELETE {}",
        ident(table),
        ident(&index.name),
        column_list(&index.columns),
        ident(&reference.table),
        column_list(&reference.columns),
        reference.on_update.as_sql(),
        reference.on_delete.as_sql()
    ))
}

fn column_list(columns: &[String]) -> String {
    let quoted: Vec<String> = columns.iter().map(|c| ident(c)).collect();
    format!("({})", quoted.join(", "))
}

fn ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

fn literal(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "''"))
}
