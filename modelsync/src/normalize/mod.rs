//! Conversion of arbitrary input into a definition's canonical field mapping.

use crate::error::{ModelError, Result, Rule};
use crate::record::Record;
use crate::schema::{ModelDefinition, PropertySchema, Registry};
use crate::value::Value;
use indexmap::IndexMap;
use std::sync::Arc;

/// Normalize `input` against `definition`.
///
/// With `include_defaults` every enabled property appears in the output,
/// falling back to its default and then to null. Without it only properties
/// present in the input are returned, so a partial update never clobbers
/// unrelated fields. An empty definition passes the input through as-is.
pub fn normalize(
    registry: &Arc<Registry>,
    definition: &ModelDefinition,
    input: Value,
    include_defaults: bool,
) -> Result<IndexMap<String, Value>> {
    let mut source = extract(definition, input)?;

    if definition.is_empty() {
        return Ok(source);
    }

    let mut data = IndexMap::with_capacity(definition.len());
    for property in definition.enabled_properties() {
        let value = match source.shift_remove(&property.id) {
            Some(value) => value,
            None if include_defaults => property.default_as_value(),
            None => continue,
        };
        data.insert(property.id.clone(), resolve(registry, property, value)?);
    }
    Ok(data)
}

/// Resolve one property's value: generate uuids and build nested records.
pub fn resolve(registry: &Arc<Registry>, property: &PropertySchema, value: Value) -> Result<Value> {
    if property.kind == crate::schema::PropertyType::Uuid && value == Value::Bool(true) {
        return Ok(Value::String(uuid::Uuid::new_v4().to_string()));
    }

    let Some(model) = &property.model else {
        return Ok(value);
    };

    match value {
        Value::Object(map) if property.is_model_object() => {
            Ok(Value::Record(Box::new(Record::new(registry, model, Value::Object(map))?)))
        }
        Value::Array(items) if property.is_model_array() => {
            let mut records = Vec::with_capacity(items.len());
            for item in items {
                records.push(match item {
                    Value::Object(map) => {
                        Value::Record(Box::new(Record::new(registry, model, Value::Object(map))?))
                    }
                    other => other,
                });
            }
            Ok(Value::Array(records))
        }
        other => Ok(other),
    }
}

/// Flat mapping of the values an input carries.
fn extract(definition: &ModelDefinition, input: Value) -> Result<IndexMap<String, Value>> {
    match input {
        Value::Object(map) => Ok(map),
        Value::Record(record) => Ok(record.into_data()),
        Value::Null => Ok(IndexMap::new()),
        other => Err(ModelError::validation(
            definition.name(),
            Rule::Type,
            format!(
                "cannot build a '{}' record from {}",
                definition.name(),
                other.kind_name()
            ),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{PropertySchema, PropertyType};
    use serde_json::json;

    fn registry() -> Arc<Registry> {
        let mut registry = Registry::new();
        registry
            .register(
                ModelDefinition::new("tag")
                    .with_property(PropertySchema::new("id", PropertyType::Uuid).primary().default_value(json!(true)))
                    .with_property(PropertySchema::new("label", PropertyType::String)),
            )
            .unwrap();
        registry
            .register(
                ModelDefinition::new("post")
                    .with_property(PropertySchema::new("id", PropertyType::Integer).primary())
                    .with_property(PropertySchema::new("title", PropertyType::String).default_value(json!("untitled")))
                    .with_property(PropertySchema::new("main", PropertyType::Object).model("tag"))
                    .with_property(PropertySchema::new("tags", PropertyType::Array).model("tag"))
                    .with_property(PropertySchema::new("legacy", PropertyType::String).disabled()),
            )
            .unwrap();
        registry.register(ModelDefinition::new("loose")).unwrap();
        Arc::new(registry)
    }

    #[test]
    fn test_defaults_applied() {
        let registry = registry();
        let post = registry.get("post").unwrap().clone();
        let data = normalize(&registry, &post, Value::from(json!({"id": 1})), true).unwrap();
        assert_eq!(data["title"], Value::from("untitled"));
        assert_eq!(data["main"], Value::Null);
        assert!(!data.contains_key("legacy"));
        let keys: Vec<&String> = data.keys().collect();
        assert_eq!(keys, vec!["id", "title", "main", "tags"]);
    }

    #[test]
    fn test_without_defaults_only_present_fields() {
        let registry = registry();
        let post = registry.get("post").unwrap().clone();
        let data = normalize(&registry, &post, Value::from(json!({"title": "x", "bogus": 1})), false).unwrap();
        assert_eq!(data.len(), 1);
        assert_eq!(data["title"], Value::from("x"));
    }

    #[test]
    fn test_nested_records_built() {
        let registry = registry();
        let post = registry.get("post").unwrap().clone();
        let data = normalize(
            &registry,
            &post,
            Value::from(json!({
                "id": 1,
                "main": {"label": "rust"},
                "tags": [{"label": "a"}, {"label": "b"}]
            })),
            true,
        )
        .unwrap();

        let main = data["main"].as_record().unwrap();
        assert_eq!(main.model().name(), "tag");
        assert_eq!(main.get("label"), Some(&Value::from("rust")));
        assert_eq!(main.id().and_then(Value::as_str).map(str::len), Some(36));

        let tags = data["tags"].as_array().unwrap();
        assert_eq!(tags.len(), 2);
        assert!(tags.iter().all(|t| t.as_record().is_some()));
    }

    #[test]
    fn test_uuid_true_generates_distinct_ids() {
        let registry = registry();
        let tag = registry.get("tag").unwrap().clone();
        let a = normalize(&registry, &tag, Value::Null, true).unwrap();
        let b = normalize(&registry, &tag, Value::from(json!({"id": true})), true).unwrap();
        assert_ne!(a["id"], b["id"]);
        assert!(uuid::Uuid::parse_str(a["id"].as_str().unwrap()).is_ok());
    }

    #[test]
    fn test_schemaless_passthrough() {
        let registry = registry();
        let loose = registry.get("loose").unwrap().clone();
        let data = normalize(&registry, &loose, Value::from(json!({"anything": [1, 2]})), true).unwrap();
        assert_eq!(data["anything"], Value::from(json!([1, 2])));
    }

    #[test]
    fn test_scalar_input_rejected() {
        let registry = registry();
        let post = registry.get("post").unwrap().clone();
        assert!(normalize(&registry, &post, Value::Integer(3), true).is_err());
    }
}
