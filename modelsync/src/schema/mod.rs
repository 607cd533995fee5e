mod parser;
mod registry;
mod types;

pub use parser::{parse_schema, parse_schema_str, ModelSpec, SchemaFile};
pub use registry::Registry;
pub use types::{ModelDefinition, PropertySchema, PropertyType};
