mod ddl;

use crate::database::{Column, DatabaseSchema, Index, SchemaTarget, Table};
use log::warn;
use std::collections::{HashMap, HashSet};

/// Explicit column renames, per table, that take precedence over the
/// same-type heuristic.
#[derive(Debug, Clone, Default)]
pub struct RenameHints {
    columns: HashMap<String, HashMap<String, String>>,
}

impl RenameHints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_column_hint(&mut self, table: impl Into<String>, from: impl Into<String>, to: impl Into<String>) {
        self.columns
            .entry(table.into())
            .or_default()
            .insert(from.into(), to.into());
    }

    pub fn get_column(&self, table: &str, from: &str) -> Option<&str> {
        self.columns
            .get(table)
            .and_then(|renames| renames.get(from))
            .map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    /// Treat a dropped and an added column of the same type in one table as
    /// a rename.
    pub infer_renames: bool,
    pub rename_hints: RenameHints,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        ReconcileOptions {
            infer_renames: true,
            rename_hints: RenameHints::default(),
        }
    }
}

/// A single structural change needed to bring a table to its target shape.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaChange {
    DropForeignKey { table: String, name: String },
    CreateTable { table: Table },
    DropIndex { table: String, index: Index },
    DropColumn { table: String, column: String },
    RenameColumn { table: String, from: String, column: Column },
    AlterColumn { table: String, column: Column },
    AddColumn { table: String, column: Column },
    AddIndex { table: String, index: Index },
    AddForeignKey { table: String, index: Index },
}

impl SchemaChange {
    pub fn table(&self) -> &str {
        match self {
            SchemaChange::CreateTable { table } => &table.name,
            SchemaChange::DropForeignKey { table, .. }
            | SchemaChange::DropIndex { table, .. }
            | SchemaChange::DropColumn { table, .. }
            | SchemaChange::RenameColumn { table, .. }
            | SchemaChange::AlterColumn { table, .. }
            | SchemaChange::AddColumn { table, .. }
            | SchemaChange::AddIndex { table, .. }
            | SchemaChange::AddForeignKey { table, .. } => table,
        }
    }

    /// Human-readable description of this change.
    pub fn describe(&self) -> String {
        match self {
            SchemaChange::DropForeignKey { table, name } => {
                format!("Foreign key '{}.{}' dropped", table, name)
            }
            SchemaChange::CreateTable { table } => {
                format!("Table '{}' created with {} columns", table.name, table.columns.len())
            }
            SchemaChange::DropIndex { table, index } => {
                format!("Index '{}.{}' dropped", table, index.name)
            }
            SchemaChange::DropColumn { table, column } => {
                format!("Column '{}.{}' dropped (data lost)", table, column)
            }
            SchemaChange::RenameColumn { table, from, column } => {
                format!("Column '{}.{}' renamed to '{}'", table, from, column.name)
            }
            SchemaChange::AlterColumn { table, column } => {
                format!("Column '{}.{}' changed to {}", table, column.name, column.column_type)
            }
            SchemaChange::AddColumn { table, column } => {
                format!("Column '{}.{}' added", table, column.name)
            }
            SchemaChange::AddIndex { table, index } => {
                format!("Index '{}.{}' added", table, index.name)
            }
            SchemaChange::AddForeignKey { table, index } => {
                format!("Foreign key '{}.{}' added", table, index.name)
            }
        }
    }

    /// Whether applying this change can discard stored data.
    pub fn is_destructive(&self) -> bool {
        matches!(self, SchemaChange::DropColumn { .. } | SchemaChange::AlterColumn { .. })
    }
}

/// Ordered changes from a live database to a target structure.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaDiff {
    pub changes: Vec<SchemaChange>,
}

impl SchemaDiff {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// DDL statements in execution order.
    pub fn statements(&self) -> Vec<String> {
        ddl::render(&self.changes)
    }
}

/// Compare the live structure with the target and list the changes, in the
/// order they must be applied: changed foreign keys are dropped, then model
/// tables and relation tables are created or altered, then foreign keys are
/// added. Tables the target does not know are left alone.
pub fn diff_schemas(actual: &DatabaseSchema, target: &SchemaTarget, options: &ReconcileOptions) -> SchemaDiff {
    let mut table_changes = Vec::new();
    // Columns that are dropped, renamed or altered; foreign keys over them
    // have to be rebuilt.
    let mut touched: HashSet<(String, String)> = HashSet::new();

    for table in target.all_tables() {
        match actual.table(&table.name) {
            None => {
                let mut created = table.clone();
                created.indexes.retain(|i| !i.is_foreign());
                table_changes.push(SchemaChange::CreateTable { table: created });
            }
            Some(current) => {
                let columns = diff_columns(current, table, options);
                for change in &columns {
                    let column = match change {
                        SchemaChange::DropColumn { column, .. } => column,
                        SchemaChange::RenameColumn { from, .. } => from,
                        SchemaChange::AlterColumn { column, .. } => &column.name,
                        _ => continue,
                    };
                    touched.insert((table.name.clone(), column.clone()));
                }
                table_changes.extend(diff_indexes(current, table));
                table_changes.extend(columns);
            }
        }
    }

    let mut drops = Vec::new();
    let mut adds = Vec::new();
    for table in target.all_tables() {
        let current = actual.table(&table.name);
        for wanted in table.foreign_keys() {
            let existing = current.and_then(|c| c.index(&wanted.name));
            if existing != Some(wanted) || over_touched(&table.name, wanted, &touched) {
                adds.push(SchemaChange::AddForeignKey {
                    table: table.name.clone(),
                    index: wanted.clone(),
                });
            }
        }
        let Some(current) = current else { continue };
        for existing in current.foreign_keys() {
            let wanted = table.index(&existing.name);
            if wanted != Some(existing) || over_touched(&table.name, existing, &touched) {
                drops.push(SchemaChange::DropForeignKey {
                    table: table.name.clone(),
                    name: existing.name.clone(),
                });
            }
        }
    }

    let mut changes = drops;
    changes.extend(table_changes);
    changes.extend(adds);
    SchemaDiff { changes }
}

fn over_touched(table: &str, foreign_key: &Index, touched: &HashSet<(String, String)>) -> bool {
    let local = foreign_key
        .columns
        .iter()
        .any(|c| touched.contains(&(table.to_string(), c.clone())));
    let remote = foreign_key.reference.as_ref().is_some_and(|r| {
        r.columns
            .iter()
            .any(|c| touched.contains(&(r.table.clone(), c.clone())))
    });
    local || remote
}

fn diff_columns(current: &Table, target: &Table, options: &ReconcileOptions) -> Vec<SchemaChange> {
    let mut removed: Vec<&Column> = current
        .columns
        .iter()
        .filter(|c| target.column(&c.name).is_none())
        .collect();
    let mut added: Vec<&Column> = target
        .columns
        .iter()
        .filter(|c| current.column(&c.name).is_none())
        .collect();

    let mut changes = Vec::new();
    let rename = |from: &Column, to: &Column| SchemaChange::RenameColumn {
        table: target.name.clone(),
        from: from.name.clone(),
        column: to.clone(),
    };

    removed.retain(|old| {
        let hinted = options
            .rename_hints
            .get_column(&target.name, &old.name)
            .and_then(|to| added.iter().position(|c| c.name == to));
        match hinted {
            Some(pos) => {
                changes.push(rename(*old, added.remove(pos)));
                false
            }
            None => true,
        }
    });

    if options.infer_renames {
        added.retain(|new| match removed.iter().position(|old| old.column_type == new.column_type) {
            Some(pos) => {
                let old = removed.remove(pos);
                warn!(
                    "treating '{}.{}' -> '{}' as a rename (same type {}); pass a rename hint or \
                     disable rename inference if this is wrong",
                    target.name, old.name, new.name, new.column_type
                );
                changes.push(rename(old, *new));
                false
            }
            None => true,
        });
    }

    for old in removed {
        changes.push(SchemaChange::DropColumn {
            table: target.name.clone(),
            column: old.name.clone(),
        });
    }

    for column in &target.columns {
        if let Some(existing) = current.column(&column.name) {
            if !existing.same_definition(column) {
                changes.push(SchemaChange::AlterColumn {
                    table: target.name.clone(),
                    column: column.clone(),
                });
            }
        }
    }

    for new in added {
        changes.push(SchemaChange::AddColumn {
            table: target.name.clone(),
            column: new.clone(),
        });
    }
    changes
}

fn diff_indexes(current: &Table, target: &Table) -> Vec<SchemaChange> {
    let mut drops = Vec::new();
    let mut adds = Vec::new();

    for index in target.indexes.iter().filter(|i| !i.is_foreign()) {
        match current.index(&index.name) {
            Some(existing) if existing.kind == index.kind && existing.columns == index.columns => {}
            Some(existing) => {
                drops.push(SchemaChange::DropIndex {
                    table: target.name.clone(),
                    index: existing.clone(),
                });
                adds.push(SchemaChange::AddIndex {
                    table: target.name.clone(),
                    index: index.clone(),
                });
            }
            None => adds.push(SchemaChange::AddIndex {
                table: target.name.clone(),
                index: index.clone(),
            }),
        }
    }

    for existing in current.indexes.iter().filter(|i| !i.is_foreign()) {
        if target.index(&existing.name).is_none() {
            drops.push(SchemaChange::DropIndex {
                table: target.name.clone(),
                index: existing.clone(),
            });
        }
    }

    drops.extend(adds);
    drops
}
