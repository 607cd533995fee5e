use super::types::{ModelDefinition, PropertySchema, PropertyType};
use crate::error::{ModelError, Result};
use crate::record::Record;
use crate::value::Value;
use indexmap::IndexMap;
use std::sync::Arc;

/// Model definitions keyed by model name.
///
/// Definitions are checked when registered; cross-model references are checked
/// by [`Registry::check`] once every model is known.
#[derive(Debug, Default, Clone)]
pub struct Registry {
    models: IndexMap<String, Arc<ModelDefinition>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition. Names must be unique.
    pub fn register(&mut self, mut definition: ModelDefinition) -> Result<Arc<ModelDefinition>> {
        if self.models.contains_key(definition.name()) {
            return Err(ModelError::SchemaDefinition(format!(
                "model '{}' is already registered",
                definition.name()
            )));
        }
        definition.compile()?;
        let definition = Arc::new(definition);
        self.models
            .insert(definition.name().to_string(), definition.clone());
        Ok(definition)
    }

    /// Register `name` as an extension of the registered model `base`.
    pub fn extend(
        &mut self,
        base: &str,
        name: &str,
        overrides: impl IntoIterator<Item = PropertySchema>,
    ) -> Result<Arc<ModelDefinition>> {
        let derived = self.get(base)?.extend(name, overrides);
        self.register(derived)
    }

    pub fn get(&self, name: &str) -> Result<&Arc<ModelDefinition>> {
        self.models
            .get(name)
            .ok_or_else(|| ModelError::SchemaDefinition(format!("unknown model '{name}'")))
    }

    pub fn lookup(&self, name: &str) -> Option<&Arc<ModelDefinition>> {
        self.models.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.models.contains_key(name)
    }

    pub fn models(&self) -> impl Iterator<Item = &Arc<ModelDefinition>> {
        self.models.values()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Check references between models: nested models and object targets
    /// must be registered, foreign match fields must be keys, and relations
    /// need a primary key on the owning side.
    pub fn check(&self) -> Result<()> {
        for definition in self.models.values() {
            for property in definition.enabled_properties() {
                self.check_property(definition, property)?;
            }
        }
        Ok(())
    }

    fn check_property(&self, definition: &ModelDefinition, property: &PropertySchema) -> Result<()> {
        let at = format!("{}.{}", definition.name(), property.id);

        if let Some(model) = &property.model {
            let nested = self.lookup(model).ok_or_else(|| {
                ModelError::SchemaDefinition(format!("{at}: unresolved nested model '{model}'"))
            })?;
            if property.kind == PropertyType::Array
                && nested.primary_key().is_some()
                && definition.primary_key().is_none()
            {
                return Err(ModelError::SchemaDefinition(format!(
                    "{at}: model '{}' has no primary key to relate '{model}' records to",
                    definition.name()
                )));
            }
        }

        if let Some(target) = &property.object {
            if !self.contains(target) {
                return Err(ModelError::SchemaDefinition(format!(
                    "{at}: unresolved object type '{target}'"
                )));
            }
        }

        if let (Some(foreign), Some(field)) = (&property.foreign, &property.match_field) {
            let target = self.lookup(foreign).ok_or_else(|| {
                ModelError::SchemaDefinition(format!("{at}: unresolved foreign model '{foreign}'"))
            })?;
            let matched = target.property(field).ok_or_else(|| {
                ModelError::SchemaDefinition(format!(
                    "{at}: foreign model '{foreign}' has no field '{field}'"
                ))
            })?;
            let single_unique = matched.unique.as_ref().is_some_and(|name| {
                target
                    .enabled_properties()
                    .filter(|p| p.unique.as_ref() == Some(name))
                    .count()
                    == 1
            });
            if target.primary() != field && !single_unique {
                return Err(ModelError::SchemaDefinition(format!(
                    "{at}: '{foreign}.{field}' is neither the primary key nor a unique key"
                )));
            }
        }
        Ok(())
    }

    /// Build a record of `model` from `input` using this registry.
    pub fn record(self: &Arc<Self>, model: &str, input: impl Into<Value>) -> Result<Record> {
        Record::new(self, model, input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn address() -> ModelDefinition {
        ModelDefinition::new("address")
            .with_property(PropertySchema::new("id", PropertyType::Uuid).primary())
            .with_property(PropertySchema::new("street", PropertyType::String))
    }

    #[test]
    fn test_register_and_get() {
        let mut registry = Registry::new();
        registry.register(address()).unwrap();
        assert!(registry.contains("address"));
        assert_eq!(registry.get("address").unwrap().name(), "address");
        assert!(registry.get("nope").is_err());
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = Registry::new();
        registry.register(address()).unwrap();
        assert!(registry.register(address()).is_err());
    }

    #[test]
    fn test_extend_registers_derived() {
        let mut registry = Registry::new();
        registry.register(address()).unwrap();
        let derived = registry
            .extend(
                "address",
                "postal_address",
                vec![PropertySchema::new("zip", PropertyType::String)],
            )
            .unwrap();
        assert_eq!(derived.len(), 3);
        assert!(derived.is_a("address"));
        assert!(registry.contains("postal_address"));
    }

    #[test]
    fn test_check_unresolved_model() {
        let mut registry = Registry::new();
        registry
            .register(
                ModelDefinition::new("user").with_property(
                    PropertySchema::new("home", PropertyType::Object).model("address"),
                ),
            )
            .unwrap();
        let err = registry.check().unwrap_err();
        assert!(err.to_string().contains("unresolved nested model 'address'"));
    }

    #[test]
    fn test_check_relation_needs_owner_key() {
        let mut registry = Registry::new();
        registry.register(address()).unwrap();
        registry
            .register(
                ModelDefinition::new("route").with_property(
                    PropertySchema::new("stops", PropertyType::Array).model("address"),
                ),
            )
            .unwrap();
        let err = registry.check().unwrap_err();
        assert!(err.to_string().contains("no primary key"));
    }

    #[test]
    fn test_check_foreign_match_must_be_key() {
        let mut registry = Registry::new();
        registry.register(address()).unwrap();
        registry
            .register(
                ModelDefinition::new("user")
                    .with_property(PropertySchema::new("id", PropertyType::Integer).primary())
                    .with_property(
                        PropertySchema::new("street", PropertyType::String)
                            .foreign("address", "street"),
                    ),
            )
            .unwrap();
        assert!(registry.check().is_err());
    }

    #[test]
    fn test_check_passes() {
        let mut registry = Registry::new();
        registry.register(address()).unwrap();
        registry
            .register(
                ModelDefinition::new("user")
                    .with_property(PropertySchema::new("id", PropertyType::Integer).primary())
                    .with_property(
                        PropertySchema::new("home", PropertyType::Object)
                            .model("address")
                            .default_value(json!(null)),
                    )
                    .with_property(
                        PropertySchema::new("address_id", PropertyType::Uuid)
                            .foreign("address", "id"),
                    ),
            )
            .unwrap();
        registry.check().unwrap();
    }
}
