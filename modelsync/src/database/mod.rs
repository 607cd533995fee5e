//! Relational structure: what the registry needs and what the database has.

mod generator;
mod introspect;
mod types;

pub use generator::{scalar_type, target, Session};
pub use introspect::{InformationSchema, Introspect};
pub use types::{
    Action, Column, ColumnType, DatabaseSchema, FieldStorage, ForeignRef, Index, IndexKind,
    ModelMapping, RelationTable, SchemaTarget, Table, PRIMARY_INDEX,
};

#[cfg(test)]
pub(crate) use introspect::tests::{row, ScriptedExecutor};
