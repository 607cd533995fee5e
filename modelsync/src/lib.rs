pub mod database;
pub mod driver;
pub mod error;
pub mod migration;
pub mod normalize;
pub mod record;
pub mod schema;
pub mod store;
pub mod validation;
pub mod value;

pub use database::{target, DatabaseSchema, InformationSchema, Introspect, SchemaTarget};
pub use driver::sqlite::SqliteExecutor;
pub use driver::{ConnectionParams, Row, SqlExecutor};
pub use error::{ModelError, Result, Rule};
pub use migration::{diff_schemas, ReconcileOptions, RenameHints, SchemaChange, SchemaDiff};
pub use record::Record;
pub use schema::{parse_schema, parse_schema_str, ModelDefinition, PropertySchema, PropertyType, Registry};
pub use store::Store;
pub use value::Value;
