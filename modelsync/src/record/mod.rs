use crate::error::{ModelError, Result};
use crate::normalize;
use crate::schema::{ModelDefinition, Registry};
use crate::validation;
use crate::value::Value;
use indexmap::IndexMap;
use serde::Serialize;
use std::sync::Arc;

/// An instance of a model definition holding canonical data.
///
/// Construction and mutation never validate; call [`Record::validate`].
#[derive(Debug, Clone)]
pub struct Record {
    registry: Arc<Registry>,
    definition: Arc<ModelDefinition>,
    data: IndexMap<String, Value>,
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.definition.name() == other.definition.name() && self.data == other.data
    }
}

impl Record {
    /// Build a record of `model` from a mapping, another record, or null.
    pub fn new(registry: &Arc<Registry>, model: &str, input: impl Into<Value>) -> Result<Self> {
        let definition = registry.get(model)?.clone();
        let data = normalize::normalize(registry, &definition, input.into(), true)?;
        Ok(Record {
            registry: registry.clone(),
            definition,
            data,
        })
    }

    /// A record holding only defaults.
    pub fn create(registry: &Arc<Registry>, model: &str) -> Result<Self> {
        Self::new(registry, model, Value::Null)
    }

    /// Build a record from any structurally compatible serializable value.
    pub fn from_serialize<T: Serialize>(registry: &Arc<Registry>, model: &str, input: &T) -> Result<Self> {
        let json = serde_json::to_value(input)?;
        Self::new(registry, model, Value::from(json))
    }

    pub fn model(&self) -> &Arc<ModelDefinition> {
        &self.definition
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Primary-key value, if the model has one and it is set.
    pub fn id(&self) -> Option<&Value> {
        self.definition
            .primary_key()
            .and_then(|p| self.data.get(&p.id))
            .filter(|v| !v.is_null())
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.data.get(field)
    }

    pub fn data(&self) -> &IndexMap<String, Value> {
        &self.data
    }

    pub fn into_data(self) -> IndexMap<String, Value> {
        self.data
    }

    /// Assign one field. Nested mappings become records, `true` on a uuid
    /// field generates an id.
    pub fn set(&mut self, field: &str, value: impl Into<Value>) -> Result<()> {
        let value = match self.definition.property(field) {
            Some(property) => normalize::resolve(&self.registry, property, value.into())?,
            None => value.into(),
        };
        self.check_write(field, &value)?;
        self.data.insert(field.to_string(), value);
        Ok(())
    }

    /// Clear one field (remove it in schema-less mode).
    pub fn unset(&mut self, field: &str) -> Result<()> {
        if self.definition.is_empty() {
            self.data.shift_remove(field);
            return Ok(());
        }
        self.check_write(field, &Value::Null)?;
        self.data.insert(field.to_string(), Value::Null);
        Ok(())
    }

    /// Merge the fields present in `input`. Either every field is written or
    /// none is.
    pub fn patch(&mut self, input: impl Into<Value>) -> Result<()> {
        let input = input.into();
        if !self.definition.is_empty() {
            let keys: Vec<&String> = match &input {
                Value::Object(map) => map.keys().collect(),
                Value::Record(record) => record.data.keys().collect(),
                _ => Vec::new(),
            };
            let model = self.definition.name();
            for key in keys {
                match self.definition.property(key) {
                    None => return Err(ModelError::mutation(model, key.as_str(), "unknown field")),
                    Some(p) if p.disabled => {
                        return Err(ModelError::mutation(model, key.as_str(), "field is disabled"))
                    }
                    Some(_) => {}
                }
            }
        }
        let changes = normalize::normalize(&self.registry, &self.definition, input, false)?;
        for (field, value) in &changes {
            self.check_write(field, value)?;
        }
        self.data.extend(changes);
        Ok(())
    }

    pub fn validate(&self) -> Result<&Self> {
        validation::validate(self)?;
        Ok(self)
    }

    /// Canonical mapping of every field, nested records included.
    /// Normalizing the result gives back an equal record.
    pub fn serialize(&self) -> serde_json::Value {
        self.serialize_with(false, false)
    }

    /// Like [`Record::serialize`] but omits fields equal to their default.
    pub fn serialize_compact(&self) -> serde_json::Value {
        self.serialize_with(true, false)
    }

    /// Outward view: fields marked `readable: false` are left out, at every
    /// level.
    pub fn serialize_public(&self) -> serde_json::Value {
        self.serialize_with(false, true)
    }

    fn serialize_with(&self, compact: bool, public: bool) -> serde_json::Value {
        let mut out = serde_json::Map::new();
        for (field, value) in &self.data {
            let property = self.definition.property(field);
            if public && property.is_some_and(|p| !p.readable) {
                continue;
            }
            let json = nested_json(value, compact, public);
            if compact {
                let default = property
                    .and_then(|p| p.default.clone())
                    .unwrap_or(serde_json::Value::Null);
                if json == default {
                    continue;
                }
            }
            out.insert(field.clone(), json);
        }
        serde_json::Value::Object(out)
    }

    fn check_write(&self, field: &str, value: &Value) -> Result<()> {
        if self.definition.is_empty() {
            return Ok(());
        }
        let model = self.definition.name();
        let property = self
            .definition
            .property(field)
            .ok_or_else(|| ModelError::mutation(model, field, "unknown field"))?;
        if property.disabled {
            return Err(ModelError::mutation(model, field, "field is disabled"));
        }
        if !property.writable {
            return Err(ModelError::mutation(model, field, "field is not writable"));
        }
        if !property.mutable {
            let current = self.data.get(field).unwrap_or(&Value::Null);
            if !current.is_null() && current != value {
                return Err(ModelError::mutation(model, field, "field cannot change once set"));
            }
        }
        Ok(())
    }
}

fn nested_json(value: &Value, compact: bool, public: bool) -> serde_json::Value {
    match value {
        Value::Record(record) => record.serialize_with(compact, public),
        Value::Array(items) => serde_json::Value::Array(
            items.iter().map(|item| nested_json(item, compact, public)).collect(),
        ),
        other => other.to_json(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Rule;
    use crate::schema::parse_schema_str;
    use serde_json::json;

    fn registry() -> Arc<Registry> {
        let registry = parse_schema_str(
            r#"
models:
  address:
    properties:
      street: { type: string, required: true }
      city: { type: string, default: Oslo }

  user:
    properties:
      id: { type: uuid, primary: true, default: true, mutable: false }
      name: { type: string, required: true }
      role: { type: string, enumeration: [admin, member], default: member }
      secret: { type: string, readable: false }
      created: { type: datetime, writable: false }
      home: { type: object, model: address }
"#,
        )
        .unwrap()
        .into_registry()
        .unwrap();
        Arc::new(registry)
    }

    #[test]
    fn test_new_and_get() {
        let registry = registry();
        let user = Record::new(&registry, "user", json!({"name": "Ada", "home": {"street": "Main"}})).unwrap();
        assert_eq!(user.get("name"), Some(&Value::from("Ada")));
        assert_eq!(user.get("role"), Some(&Value::from("member")));
        assert!(user.id().is_some());
        let home = user.get("home").unwrap().as_record().unwrap();
        assert_eq!(home.get("city"), Some(&Value::from("Oslo")));
    }

    #[test]
    fn test_construction_does_not_validate() {
        let registry = registry();
        let user = Record::create(&registry, "user").unwrap();
        let err = user.validate().unwrap_err();
        assert_eq!(err.rule(), Some(Rule::Required));
        assert_eq!(err.field(), Some("name"));
    }

    #[test]
    fn test_set_unknown_field_rejected() {
        let registry = registry();
        let mut user = Record::create(&registry, "user").unwrap();
        let err = user.set("nickname", "x").unwrap_err();
        assert!(matches!(err, ModelError::Mutation { .. }));
    }

    #[test]
    fn test_set_readonly_rejected() {
        let registry = registry();
        let mut user = Record::create(&registry, "user").unwrap();
        assert!(user.set("created", "2024-01-01T00:00:00Z").is_err());
        assert!(user.unset("created").is_err());
    }

    #[test]
    fn test_immutable_once_set() {
        let registry = registry();
        let mut user = Record::create(&registry, "user").unwrap();
        let id = user.id().cloned().unwrap();
        user.set("id", id).unwrap();
        assert!(user.set("id", "other").is_err());
    }

    #[test]
    fn test_set_builds_nested_record() {
        let registry = registry();
        let mut user = Record::create(&registry, "user").unwrap();
        user.set("home", json!({"street": "Elm"})).unwrap();
        assert!(user.get("home").unwrap().as_record().is_some());
    }

    #[test]
    fn test_patch_merges_without_defaults() {
        let registry = registry();
        let mut user = Record::new(&registry, "user", json!({"name": "Ada", "role": "admin"})).unwrap();
        user.patch(json!({"name": "Grace"})).unwrap();
        assert_eq!(user.get("name"), Some(&Value::from("Grace")));
        assert_eq!(user.get("role"), Some(&Value::from("admin")));
    }

    #[test]
    fn test_patch_is_all_or_nothing() {
        let registry = registry();
        let mut user = Record::new(&registry, "user", json!({"name": "Ada"})).unwrap();
        assert!(user.patch(json!({"name": "Grace", "created": "2024-01-01T00:00:00Z"})).is_err());
        assert_eq!(user.get("name"), Some(&Value::from("Ada")));
    }

    #[test]
    fn test_patch_rejects_unknown_and_disabled_fields() {
        let registry = Arc::new(
            parse_schema_str(
                r#"
models:
  note:
    properties:
      id: { type: integer, primary: true }
      body: { type: string }
      legacy: { type: string, disabled: true }
"#,
            )
            .unwrap()
            .into_registry()
            .unwrap(),
        );
        let mut note = Record::new(&registry, "note", json!({"id": 1, "body": "a"})).unwrap();

        let err = note.patch(json!({"body": "b", "bogus": 1})).unwrap_err();
        assert!(matches!(err, ModelError::Mutation { ref field, .. } if field == "bogus"));
        let err = note.patch(json!({"legacy": "x"})).unwrap_err();
        assert!(matches!(err, ModelError::Mutation { ref field, .. } if field == "legacy"));
        assert_eq!(note.get("body"), Some(&Value::from("a")));
        // Same rule as a single-field write
        assert!(note.set("bogus", 1).is_err());
    }

    #[test]
    fn test_serialize_round_trip() {
        let registry = registry();
        let user = Record::new(&registry, "user", json!({"name": "Ada", "home": {"street": "Main"}})).unwrap();
        let again = Record::new(&registry, "user", user.serialize()).unwrap();
        assert_eq!(again, user);
    }

    #[test]
    fn test_serialize_keeps_unreadable_fields() {
        let registry = registry();
        let user = Record::new(&registry, "user", json!({"name": "Ada", "secret": "x"})).unwrap();
        assert_eq!(user.serialize()["secret"], json!("x"));
        let again = Record::new(&registry, "user", user.serialize()).unwrap();
        assert_eq!(again, user);
    }

    #[test]
    fn test_serialize_public_hides_unreadable() {
        let registry = registry();
        let user = Record::new(&registry, "user", json!({"name": "Ada", "secret": "x"})).unwrap();
        let public = user.serialize_public();
        assert!(public.get("secret").is_none());
        assert_eq!(public["name"], json!("Ada"));
        assert_eq!(user.get("secret"), Some(&Value::from("x")));
    }

    #[test]
    fn test_serialize_compact_omits_defaults() {
        let registry = registry();
        let user = Record::new(&registry, "user", json!({"name": "Ada", "home": {"street": "Main"}})).unwrap();
        let compact = user.serialize_compact();
        assert!(compact.get("role").is_none());
        assert!(compact.get("created").is_none());
        assert_eq!(compact["home"], json!({"street": "Main"}));
        assert_eq!(compact["name"], json!("Ada"));
    }

    #[test]
    fn test_from_foreign_record() {
        let registry = registry();
        let user = Record::new(&registry, "user", json!({"name": "Ada"})).unwrap();
        let copy = Record::new(&registry, "user", user.clone()).unwrap();
        assert_eq!(copy, user);
    }

    #[test]
    fn test_from_serialize() {
        #[derive(Serialize)]
        struct Input {
            name: String,
            role: String,
        }
        let registry = registry();
        let user = Record::from_serialize(
            &registry,
            "user",
            &Input {
                name: "Ada".into(),
                role: "admin".into(),
            },
        )
        .unwrap();
        assert_eq!(user.get("role"), Some(&Value::from("admin")));
    }
}
