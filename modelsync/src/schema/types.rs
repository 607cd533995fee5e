use crate::error::{ModelError, Result};
use crate::value::Value;
use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Declared type of a property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyType {
    #[default]
    Any,
    #[serde(alias = "bool")]
    Boolean,
    #[serde(alias = "int")]
    Integer,
    #[serde(alias = "float", alias = "double")]
    Number,
    String,
    Uuid,
    Url,
    Email,
    Datetime,
    Date,
    Time,
    Array,
    Object,
    Function,
}

impl PropertyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyType::Any => "any",
            PropertyType::Boolean => "boolean",
            PropertyType::Integer => "integer",
            PropertyType::Number => "number",
            PropertyType::String => "string",
            PropertyType::Uuid => "uuid",
            PropertyType::Url => "url",
            PropertyType::Email => "email",
            PropertyType::Datetime => "datetime",
            PropertyType::Date => "date",
            PropertyType::Time => "time",
            PropertyType::Array => "array",
            PropertyType::Object => "object",
            PropertyType::Function => "function",
        }
    }

    /// Types whose values are strings at runtime.
    pub fn is_textual(&self) -> bool {
        matches!(
            self,
            PropertyType::String
                | PropertyType::Uuid
                | PropertyType::Url
                | PropertyType::Email
                | PropertyType::Datetime
                | PropertyType::Date
                | PropertyType::Time
        )
    }
}

impl std::fmt::Display for PropertyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn enabled() -> bool {
    true
}

/// Definition of a single property of a model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertySchema {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "desc", default)]
    pub description: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: PropertyType,
    /// Nested model for object/array properties
    #[serde(default)]
    pub model: Option<String>,
    /// Type a nested record must be an instance of
    #[serde(default)]
    pub object: Option<String>,
    #[serde(default)]
    pub foreign: Option<String>,
    #[serde(rename = "match", default)]
    pub match_field: Option<String>,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    #[serde(default)]
    pub required: bool,
    #[serde(default = "enabled")]
    pub readable: bool,
    #[serde(default = "enabled")]
    pub writable: bool,
    #[serde(default = "enabled")]
    pub mutable: bool,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub primary: bool,
    #[serde(default)]
    pub index: Option<String>,
    #[serde(default)]
    pub unique: Option<String>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub enumeration: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    /// Explicit relation-table name for array-of-model properties
    #[serde(default)]
    pub relation: Option<String>,
}

impl PropertySchema {
    pub fn new(id: impl Into<String>, kind: PropertyType) -> Self {
        PropertySchema {
            id: id.into(),
            name: None,
            description: None,
            kind,
            model: None,
            object: None,
            foreign: None,
            match_field: None,
            default: None,
            required: false,
            readable: true,
            writable: true,
            mutable: true,
            disabled: false,
            primary: false,
            index: None,
            unique: None,
            pattern: None,
            enumeration: None,
            min: None,
            max: None,
            relation: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn primary(mut self) -> Self {
        self.primary = true;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn object(mut self, target: impl Into<String>) -> Self {
        self.object = Some(target.into());
        self
    }

    pub fn foreign(mut self, model: impl Into<String>, field: impl Into<String>) -> Self {
        self.foreign = Some(model.into());
        self.match_field = Some(field.into());
        self
    }

    pub fn default_value(mut self, value: serde_json::Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn index(mut self, name: impl Into<String>) -> Self {
        self.index = Some(name.into());
        self
    }

    pub fn unique(mut self, name: impl Into<String>) -> Self {
        self.unique = Some(name.into());
        self
    }

    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    pub fn enumeration(mut self, values: Vec<serde_json::Value>) -> Self {
        self.enumeration = Some(values);
        self
    }

    pub fn min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    pub fn max(mut self, max: f64) -> Self {
        self.max = Some(max);
        self
    }

    pub fn readonly(mut self) -> Self {
        self.writable = false;
        self
    }

    pub fn immutable(mut self) -> Self {
        self.mutable = false;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.readable = false;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }

    pub fn relation(mut self, table: impl Into<String>) -> Self {
        self.relation = Some(table.into());
        self
    }

    /// Display name, falling back to the id.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    /// A single nested record (`object` typed, with a model reference).
    pub fn is_model_object(&self) -> bool {
        self.kind == PropertyType::Object && self.model.is_some()
    }

    /// A sequence of nested records (`array` typed, with a model reference).
    pub fn is_model_array(&self) -> bool {
        self.kind == PropertyType::Array && self.model.is_some()
    }

    /// Whether the default asks for a generated uuid.
    pub fn auto_uuid(&self) -> bool {
        self.kind == PropertyType::Uuid && self.default == Some(serde_json::Value::Bool(true))
    }

    /// The declared default as a record value, `Null` when absent.
    pub fn default_as_value(&self) -> Value {
        self.default.as_ref().map(Value::from).unwrap_or(Value::Null)
    }

    fn check(&self) -> Result<()> {
        let fail = |msg: String| Err(ModelError::SchemaDefinition(format!("property '{}': {msg}", self.id)));

        if self.id.is_empty() {
            return Err(ModelError::SchemaDefinition("property without an id".into()));
        }
        if self.model.is_some()
            && !matches!(self.kind, PropertyType::Object | PropertyType::Array)
        {
            return fail(format!("type '{}' cannot reference a model", self.kind));
        }
        if let (Some(min), Some(max)) = (self.min, self.max) {
            if min > max {
                return fail(format!("min {min} is greater than max {max}"));
            }
        }
        if let Some(values) = &self.enumeration {
            if values.is_empty() {
                return fail("enumeration is empty".into());
            }
        }
        if self.foreign.is_some() && self.match_field.is_none() {
            return fail("foreign reference without a match field".into());
        }
        if self.primary && (self.disabled || matches!(self.kind, PropertyType::Array | PropertyType::Function)) {
            return fail("primary property must be an enabled scalar".into());
        }
        if self.kind == PropertyType::Uuid {
            match &self.default {
                None | Some(serde_json::Value::Bool(true)) | Some(serde_json::Value::String(_)) => {}
                Some(other) => return fail(format!("invalid uuid default {other}")),
            }
        }
        Ok(())
    }
}

/// An ordered property schema describing one record type
#[derive(Debug, Clone)]
pub struct ModelDefinition {
    name: String,
    table: String,
    primary: String,
    properties: IndexMap<String, PropertySchema>,
    lineage: Vec<String>,
    patterns: HashMap<String, Regex>,
}

impl ModelDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        ModelDefinition {
            table: name.clone(),
            name,
            primary: "id".to_string(),
            properties: IndexMap::new(),
            lineage: Vec::new(),
            patterns: HashMap::new(),
        }
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn with_primary(mut self, id: impl Into<String>) -> Self {
        self.primary = id.into();
        self
    }

    /// Add a property, replacing one with the same id in place.
    pub fn with_property(mut self, property: PropertySchema) -> Self {
        self.insert(property);
        self
    }

    fn insert(&mut self, property: PropertySchema) {
        if property.primary {
            self.primary = property.id.clone();
        }
        // IndexMap::insert keeps the original slot of an existing key
        self.properties.insert(property.id.clone(), property);
    }

    /// Derive a new definition from `self`: overrides replace same-id
    /// properties in place, new ids are appended.
    pub fn extend(
        &self,
        name: impl Into<String>,
        overrides: impl IntoIterator<Item = PropertySchema>,
    ) -> ModelDefinition {
        let name = name.into();
        let mut lineage = self.lineage.clone();
        lineage.push(self.name.clone());

        let mut derived = ModelDefinition {
            table: name.clone(),
            name,
            primary: self.primary.clone(),
            properties: self.properties.clone(),
            lineage,
            patterns: HashMap::new(),
        };
        for property in overrides {
            derived.insert(property);
        }
        derived
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Designated primary-key property id.
    pub fn primary(&self) -> &str {
        &self.primary
    }

    /// The primary-key property, if the designated id exists.
    pub fn primary_key(&self) -> Option<&PropertySchema> {
        self.properties.get(&self.primary).filter(|p| !p.disabled)
    }

    pub fn properties(&self) -> impl Iterator<Item = &PropertySchema> {
        self.properties.values()
    }

    /// Properties that take part in normalization, validation and storage.
    pub fn enabled_properties(&self) -> impl Iterator<Item = &PropertySchema> {
        self.properties.values().filter(|p| !p.disabled)
    }

    pub fn property(&self, id: &str) -> Option<&PropertySchema> {
        self.properties.get(id)
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    /// Ancestor model names, root first.
    pub fn lineage(&self) -> &[String] {
        &self.lineage
    }

    /// Whether records of this definition are instances of `model`.
    pub fn is_a(&self, model: &str) -> bool {
        self.name == model || self.lineage.iter().any(|m| m == model)
    }

    pub(crate) fn pattern(&self, id: &str) -> Option<&Regex> {
        self.patterns.get(id)
    }

    /// Check every property schema and compile patterns. Called on registration.
    pub(crate) fn compile(&mut self) -> Result<()> {
        if self.name.is_empty() {
            return Err(ModelError::SchemaDefinition("model without a name".into()));
        }
        self.patterns.clear();
        for (key, property) in &self.properties {
            if key != &property.id {
                return Err(ModelError::SchemaDefinition(format!(
                    "model '{}': property key '{key}' does not match id '{}'",
                    self.name, property.id
                )));
            }
            property.check().map_err(|e| match e {
                ModelError::SchemaDefinition(msg) => {
                    ModelError::SchemaDefinition(format!("model '{}', {msg}", self.name))
                }
                other => other,
            })?;
            if let Some(pattern) = &property.pattern {
                let regex = Regex::new(pattern).map_err(|e| {
                    ModelError::SchemaDefinition(format!(
                        "model '{}', property '{key}': invalid pattern: {e}",
                        self.name
                    ))
                })?;
                self.patterns.insert(key.clone(), regex);
            }
        }
        let flagged: Vec<&str> = self
            .properties
            .values()
            .filter(|p| p.primary)
            .map(|p| p.id.as_str())
            .collect();
        if flagged.len() > 1 {
            return Err(ModelError::SchemaDefinition(format!(
                "model '{}' flags more than one primary property: {}",
                self.name,
                flagged.join(", ")
            )));
        }

        // The designated key carries the flag even when it was only named
        let designated = self.primary.clone();
        for property in self.properties.values_mut() {
            property.primary = property.id == designated && !property.disabled;
        }
        if let Some(key) = self.primary_key() {
            key.check().map_err(|e| match e {
                ModelError::SchemaDefinition(msg) => {
                    ModelError::SchemaDefinition(format!("model '{}', {msg}", self.name))
                }
                other => other,
            })?;
        }
        Ok(())
    }
}
