use super::registry::Registry;
use super::types::{ModelDefinition, PropertySchema};
use crate::driver::ConnectionParams;
use crate::error::{ModelError, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Top-level schema file: optional connection parameters plus model definitions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaFile {
    #[serde(default)]
    pub connection: Option<ConnectionParams>,
    #[serde(default)]
    pub models: IndexMap<String, ModelSpec>,
}

/// Declaration of a single model in a schema file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelSpec {
    #[serde(default)]
    pub extends: Option<String>,
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default)]
    pub primary: Option<String>,
    #[serde(default)]
    pub properties: IndexMap<String, PropertySchema>,
}

/// Parse a schema YAML file
pub fn parse_schema(path: &Path) -> Result<SchemaFile> {
    let content = std::fs::read_to_string(path)?;
    parse_schema_str(&content)
}

/// Parse a schema YAML string
pub fn parse_schema_str(content: &str) -> Result<SchemaFile> {
    let mut file: SchemaFile = serde_yaml::from_str(content)?;
    for spec in file.models.values_mut() {
        for (id, property) in spec.properties.iter_mut() {
            if property.id.is_empty() {
                property.id = id.clone();
            }
        }
    }
    Ok(file)
}

impl SchemaFile {
    /// Register every model (bases before the models extending them) and
    /// check cross-model references.
    pub fn into_registry(self) -> Result<Registry> {
        let mut registry = Registry::new();
        let mut visiting = HashSet::new();
        for name in self.models.keys() {
            self.register_model(name, &mut registry, &mut visiting)?;
        }
        registry.check()?;
        Ok(registry)
    }

    fn register_model(
        &self,
        name: &str,
        registry: &mut Registry,
        visiting: &mut HashSet<String>,
    ) -> Result<()> {
        if registry.contains(name) {
            return Ok(());
        }
        let spec = self
            .models
            .get(name)
            .ok_or_else(|| ModelError::SchemaDefinition(format!("unknown model '{name}'")))?;
        if !visiting.insert(name.to_string()) {
            return Err(ModelError::SchemaDefinition(format!(
                "model '{name}' extends itself"
            )));
        }

        let overrides = spec.properties.values().cloned();
        let mut definition = match &spec.extends {
            Some(base) => {
                self.register_model(base, registry, visiting)?;
                registry.get(base)?.extend(name, overrides)
            }
            None => overrides.fold(ModelDefinition::new(name), |def, p| def.with_property(p)),
        };
        if let Some(table) = &spec.table {
            definition = definition.with_table(table);
        }
        if let Some(primary) = &spec.primary {
            definition = definition.with_primary(primary);
        }

        registry.register(definition)?;
        visiting.remove(name);
        Ok(())
    }
}
