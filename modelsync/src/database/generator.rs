//! Derives the target database structure from registered model definitions.

use super::types::{
    Action, Column, ColumnType, FieldStorage, ForeignRef, Index, IndexKind, ModelMapping,
    RelationTable, SchemaTarget, Table,
};
use crate::error::{ModelError, Result};
use crate::schema::{ModelDefinition, PropertySchema, PropertyType, Registry};
use indexmap::IndexMap;
use std::collections::HashMap;

/// Generate the target structure for every model in `registry`.
pub fn target(registry: &Registry) -> Result<SchemaTarget> {
    Session::new(registry).run()
}

/// One generation run. Owns the relation tables discovered so far so that
/// two properties mapping onto the same join table are caught.
pub struct Session<'a> {
    registry: &'a Registry,
    target: SchemaTarget,
    table_owners: HashMap<String, String>,
}

impl<'a> Session<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Session {
            registry,
            target: SchemaTarget::default(),
            table_owners: HashMap::new(),
        }
    }

    pub fn run(mut self) -> Result<SchemaTarget> {
        let registry = self.registry;
        for definition in registry.models() {
            let mapping = self.model(definition)?;
            self.target
                .mappings
                .insert(definition.name().to_string(), mapping);
        }

        for (name, relation) in &self.target.relations {
            if let Some(owner) = self.table_owners.get(name) {
                return Err(ModelError::SchemaDefinition(format!(
                    "relation table '{name}' for {}.{} collides with the table of model '{owner}'",
                    relation.owner, relation.property
                )));
            }
        }
        Ok(self.target)
    }

    fn model(&mut self, definition: &ModelDefinition) -> Result<ModelMapping> {
        let keyed = definition.primary_key().is_some();
        let mut table = keyed.then(|| Table::new(definition.table()));

        if let Some(table) = &table {
            if let Some(owner) = self.table_owners.get(&table.name) {
                return Err(ModelError::SchemaDefinition(format!(
                    "models '{owner}' and '{}' both map to table '{}'",
                    definition.name(),
                    table.name
                )));
            }
        }

        let mut fields = IndexMap::new();
        for property in definition.enabled_properties() {
            let Some(storage) = self.storage(definition, property)? else {
                continue;
            };
            if let Some(table) = table.as_mut() {
                self.place(table, property, &storage)?;
            }
            fields.insert(property.id.clone(), storage);
        }

        if let Some(table) = table.take() {
            self.table_owners
                .insert(table.name.clone(), definition.name().to_string());
            self.target.tables.insert(table.name.clone(), table);
        }

        Ok(ModelMapping {
            model: definition.name().to_string(),
            table: keyed.then(|| definition.table().to_string()),
            primary: definition.primary_key().map(|p| p.id.clone()),
            fields,
        })
    }

    fn storage(
        &mut self,
        owner: &ModelDefinition,
        property: &PropertySchema,
    ) -> Result<Option<FieldStorage>> {
        if property.kind == PropertyType::Function {
            return Ok(None);
        }

        let Some(model) = &property.model else {
            return Ok(Some(match property.kind {
                PropertyType::Any | PropertyType::Object | PropertyType::Array => FieldStorage::Inline,
                kind => FieldStorage::Column { kind },
            }));
        };

        let registry = self.registry;
        let child = registry.get(model)?;
        if child.primary_key().is_none() {
            return Ok(Some(FieldStorage::Inline));
        }

        if property.kind == PropertyType::Object {
            return Ok(Some(FieldStorage::Reference {
                model: model.clone(),
            }));
        }

        let relation = self.relation(owner, property, child)?;
        Ok(Some(FieldStorage::Relation {
            model: model.clone(),
            table: relation.table.name.clone(),
            owner_column: relation.owner_column.clone(),
            child_column: relation.child_column.clone(),
        }))
    }

    fn place(&self, table: &mut Table, property: &PropertySchema, storage: &FieldStorage) -> Result<()> {
        let id = property.id.as_str();
        match storage {
            FieldStorage::Column { .. } => {
                let column_type = scalar_type(property);
                let mut column = Column::new(id, column_type.clone(), property.required || property.primary);
                column.default = db_default(property, &column_type);
                table.columns.push(column);

                if property.primary {
                    table.indexes.insert(0, Index::primary(vec![id.to_string()]));
                }
                if let Some(name) = &property.unique {
                    table.push_index_column(name, IndexKind::Unique, id);
                }
                if let Some(name) = &property.index {
                    table.push_index_column(name, IndexKind::Index, id);
                }
                if let (Some(foreign), Some(field)) = (&property.foreign, &property.match_field) {
                    let target = self.registry.get(foreign)?;
                    let action = delete_action(property);
                    self.add_reference(table, id, target.table(), field, action);
                }
            }
            FieldStorage::Inline => {
                table
                    .columns
                    .push(Column::new(id, ColumnType::LongText, property.required));
            }
            FieldStorage::Reference { model } => {
                let child = self.registry.get(model)?;
                let child_pk = primary_property(child)?;
                table
                    .columns
                    .push(Column::new(id, scalar_type(child_pk), property.required));
                self.add_reference(table, id, child.table(), &child_pk.id, delete_action(property));
            }
            // Stored in its own table
            FieldStorage::Relation { .. } => {}
        }
        Ok(())
    }

    /// Simple index plus foreign key from `column` to `target.target_column`.
    fn add_reference(&self, table: &mut Table, column: &str, target: &str, target_column: &str, on_delete: Action) {
        table
            .indexes
            .push(Index::new(format!("idx_{column}"), IndexKind::Index, vec![column.to_string()]));
        let name = format!("fk_{}_{column}", table.name);
        table.indexes.push(Index::foreign(
            name,
            vec![column.to_string()],
            ForeignRef {
                table: target.to_string(),
                columns: vec![target_column.to_string()],
                on_update: Action::Cascade,
                on_delete,
            },
        ));
    }

    fn relation(
        &mut self,
        owner: &ModelDefinition,
        property: &PropertySchema,
        child: &ModelDefinition,
    ) -> Result<&RelationTable> {
        let name = property
            .relation
            .clone()
            .unwrap_or_else(|| format!("{}_{}", owner.table(), child.table()));

        if let Some(existing) = self.target.relations.get(&name) {
            return Err(ModelError::SchemaDefinition(format!(
                "relation table '{name}' is generated by both {}.{} and {}.{}; \
                 set `relation` on one of them",
                existing.owner,
                existing.property,
                owner.name(),
                property.id
            )));
        }

        let owner_pk = primary_property(owner)?;
        let child_pk = primary_property(child)?;
        let owner_column = format!("{}_{}", owner.table(), owner_pk.id);
        let mut child_column = format!("{}_{}", child.table(), child_pk.id);
        if child_column == owner_column {
            child_column.push_str("_ref");
        }

        let mut table = Table::new(&name);
        table
            .columns
            .push(Column::new(&owner_column, scalar_type(owner_pk), true));
        table
            .columns
            .push(Column::new(&child_column, scalar_type(child_pk), true));
        table
            .indexes
            .push(Index::primary(vec![owner_column.clone(), child_column.clone()]));
        for (column, target, target_column) in [
            (&owner_column, owner.table(), &owner_pk.id),
            (&child_column, child.table(), &child_pk.id),
        ] {
            self.add_reference(&mut table, column, target, target_column, Action::Cascade);
        }
        // Keep the two simple indexes ahead of the foreign keys
        table.indexes.sort_by_key(|i| i.is_foreign());

        let relation = RelationTable {
            table,
            owner: owner.name().to_string(),
            child: child.name().to_string(),
            property: property.id.clone(),
            owner_column,
            child_column,
        };
        Ok(self.target.relations.entry(name).or_insert(relation))
    }
}

fn primary_property(definition: &ModelDefinition) -> Result<&PropertySchema> {
    definition.primary_key().ok_or_else(|| {
        ModelError::SchemaDefinition(format!("model '{}' has no primary key", definition.name()))
    })
}

fn delete_action(property: &PropertySchema) -> Action {
    if property.required {
        Action::Cascade
    } else {
        Action::SetNull
    }
}

/// Column type of a scalar property.
pub fn scalar_type(property: &PropertySchema) -> ColumnType {
    match property.kind {
        PropertyType::Boolean => ColumnType::TinyInt(1),
        PropertyType::Integer => ColumnType::BigInt,
        PropertyType::Number => ColumnType::Decimal(32, 16),
        PropertyType::Uuid => ColumnType::Char(36),
        PropertyType::String | PropertyType::Url | PropertyType::Email => string_type(property),
        PropertyType::Datetime => ColumnType::Char(32),
        PropertyType::Date => ColumnType::Char(10),
        PropertyType::Time => ColumnType::Char(16),
        PropertyType::Any | PropertyType::Array | PropertyType::Object | PropertyType::Function => {
            ColumnType::LongText
        }
    }
}

fn string_type(property: &PropertySchema) -> ColumnType {
    let keyed = property.primary
        || property.index.is_some()
        || property.unique.is_some()
        || property.default.is_some()
        || property.foreign.is_some();

    match (property.min, property.max) {
        (Some(min), Some(max)) if min == max && (1.0..=255.0).contains(&max) => ColumnType::Char(max as u32),
        (_, Some(max)) if max <= 255.0 => ColumnType::Varchar(max.max(1.0) as u32),
        _ if keyed => ColumnType::Varchar(255),
        _ => ColumnType::Text,
    }
}

/// Server-side default of a column. Generated uuids are filled in by the
/// record, and text columns cannot carry one.
fn db_default(property: &PropertySchema, column_type: &ColumnType) -> Option<String> {
    if property.auto_uuid() || column_type.is_blob() {
        return None;
    }
    match property.default.as_ref()? {
        serde_json::Value::Null => None,
        serde_json::Value::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::parse_schema_str;
    use pretty_assertions::assert_eq;

    fn generate(yaml: &str) -> Result<SchemaTarget> {
        let registry = parse_schema_str(yaml)?.into_registry()?;
        target(&registry)
    }

    const SHOP: &str = r#"
models:
  customer:
    properties:
      id: { type: uuid, primary: true, default: true }
      email: { type: email, required: true, unique: by_email }
      name: { type: string, max: 80 }
      bio: { type: string }
      country: { type: string, min: 2, max: 2, index: by_region }
      city: { type: string, index: by_region }
      vip: { type: boolean, default: false }
      credit: { type: number, default: 1.5 }
      address: { type: object, model: address }
      notes: { type: any }
      hook: { type: function }
      legacy: { type: string, disabled: true }

  address:
    properties:
      street: { type: string }

  product:
    properties:
      sku: { type: string, primary: true }
      price: { type: float, required: true }

  order:
    properties:
      id: { type: integer, primary: true }
      buyer: { type: object, model: customer, required: true }
      gift_for: { type: object, model: customer }
      items: { type: array, model: product }
      placed: { type: datetime }
      by_mail: { type: string, foreign: customer, match: email }
"#;

    #[test]
    fn test_scalar_columns() {
        let target = generate(SHOP).unwrap();
        let customer = &target.tables["customer"];
        let columns: Vec<(String, String, bool, Option<String>)> = customer
            .columns
            .iter()
            .map(|c| (c.name.clone(), c.column_type.to_string(), c.required, c.default.clone()))
            .collect();
        assert_eq!(
            columns,
            vec![
                ("id".into(), "char(36)".into(), true, None),
                ("email".into(), "varchar(255)".into(), true, None),
                ("name".into(), "varchar(80)".into(), false, None),
                ("bio".into(), "text".into(), false, None),
                ("country".into(), "char(2)".into(), false, None),
                ("city".into(), "varchar(255)".into(), false, None),
                ("vip".into(), "tinyint(1)".into(), false, Some("0".into())),
                ("credit".into(), "decimal(32,16)".into(), false, Some("1.5".into())),
                ("address".into(), "longtext".into(), false, None),
                ("notes".into(), "longtext".into(), false, None),
            ]
        );
    }

    #[test]
    fn test_indexes() {
        let target = generate(SHOP).unwrap();
        let customer = &target.tables["customer"];
        assert_eq!(customer.indexes[0], Index::primary(vec!["id".into()]));
        assert_eq!(customer.index("by_email").unwrap().kind, IndexKind::Unique);
        assert_eq!(
            customer.index("by_region").unwrap().columns,
            vec!["country".to_string(), "city".to_string()]
        );
    }

    #[test]
    fn test_designated_key_without_flag() {
        let target = generate(
            r#"
models:
  thing:
    properties:
      id: { type: integer }
      name: { type: string }
  tag:
    primary: slug
    properties:
      slug: { type: string }
      label: { type: string }
"#,
        )
        .unwrap();

        let thing = &target.tables["thing"];
        assert_eq!(thing.indexes, vec![Index::primary(vec!["id".into()])]);
        assert_eq!(thing.column("id").unwrap(), &Column::new("id", ColumnType::BigInt, true));

        let tag = &target.tables["tag"];
        assert_eq!(tag.primary_key(), Some(&Index::primary(vec!["slug".into()])));
        assert_eq!(tag.column("slug").unwrap(), &Column::new("slug", ColumnType::Varchar(255), true));
        assert_eq!(target.mappings["tag"].primary.as_deref(), Some("slug"));
    }

    #[test]
    fn test_keyless_model_has_no_table() {
        let target = generate(SHOP).unwrap();
        assert!(!target.tables.contains_key("address"));
        assert_eq!(target.mappings["customer"].fields["address"], FieldStorage::Inline);
        assert_eq!(target.mappings["address"].table, None);
        assert!(!target.mappings["customer"].fields.contains_key("hook"));
        assert!(!target.mappings["customer"].fields.contains_key("legacy"));
    }

    #[test]
    fn test_nested_reference_columns() {
        let target = generate(SHOP).unwrap();
        let order = &target.tables["order"];
        let buyer = order.column("buyer").unwrap();
        assert_eq!(buyer.column_type, ColumnType::Char(36));
        assert!(buyer.required);
        assert!(order.index("idx_buyer").is_some());

        let fk = order.index("fk_order_buyer").unwrap();
        let reference = fk.reference.as_ref().unwrap();
        assert_eq!(reference.table, "customer");
        assert_eq!(reference.columns, vec!["id".to_string()]);
        assert_eq!(reference.on_update, Action::Cascade);
        assert_eq!(reference.on_delete, Action::Cascade);

        let gift = order.index("fk_order_gift_for").unwrap();
        assert_eq!(gift.reference.as_ref().unwrap().on_delete, Action::SetNull);
        assert!(order.column("items").is_none());
    }

    #[test]
    fn test_foreign_match_reference() {
        let target = generate(SHOP).unwrap();
        let order = &target.tables["order"];
        assert_eq!(order.column("by_mail").unwrap().column_type, ColumnType::Varchar(255));
        let fk = order.index("fk_order_by_mail").unwrap();
        assert_eq!(fk.reference.as_ref().unwrap().columns, vec!["email".to_string()]);
        assert_eq!(
            target.mappings["order"].fields["by_mail"],
            FieldStorage::Column { kind: PropertyType::String }
        );
    }

    #[test]
    fn test_relation_table() {
        let target = generate(SHOP).unwrap();
        let relation = &target.relations["order_product"];
        assert_eq!(relation.owner_column, "order_id");
        assert_eq!(relation.child_column, "product_sku");

        let table = &relation.table;
        let columns: Vec<(&str, String)> = table
            .columns
            .iter()
            .map(|c| (c.name.as_str(), c.column_type.to_string()))
            .collect();
        assert_eq!(columns, vec![("order_id", "bigint".to_string()), ("product_sku", "varchar(255)".to_string())]);

        let names: Vec<&str> = table.indexes.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "PRIMARY",
                "idx_order_id",
                "idx_product_sku",
                "fk_order_product_order_id",
                "fk_order_product_product_sku"
            ]
        );
        assert!(table
            .foreign_keys()
            .all(|fk| fk.reference.as_ref().unwrap().on_delete == Action::Cascade
                && fk.reference.as_ref().unwrap().on_update == Action::Cascade));
    }

    #[test]
    fn test_self_relation_columns() {
        let target = generate(
            r#"
models:
  person:
    properties:
      id: { type: integer, primary: true }
      friends: { type: array, model: person }
"#,
        )
        .unwrap();
        let relation = &target.relations["person_person"];
        assert_eq!(relation.owner_column, "person_id");
        assert_eq!(relation.child_column, "person_id_ref");
    }

    #[test]
    fn test_relation_collision_rejected() {
        let yaml = r#"
models:
  person:
    properties:
      id: { type: integer, primary: true }
      friends: { type: array, model: person }
      blocked: { type: array, model: person }
"#;
        let err = generate(yaml).unwrap_err();
        assert!(matches!(err, ModelError::SchemaDefinition(_)));
        assert!(err.to_string().contains("person_person"));

        let resolved = yaml.replace(
            "blocked: { type: array, model: person }",
            "blocked: { type: array, model: person, relation: person_blocked }",
        );
        let target = generate(&resolved).unwrap();
        assert_eq!(target.relations.len(), 2);
    }

    #[test]
    fn test_relation_colliding_with_model_table_rejected() {
        let yaml = r#"
models:
  team:
    properties:
      id: { type: integer, primary: true }
      members: { type: array, model: member }
  member:
    properties:
      id: { type: integer, primary: true }
  team_member:
    properties:
      id: { type: integer, primary: true }
"#;
        assert!(generate(yaml).is_err());
    }

    #[test]
    fn test_shared_table_rejected() {
        let yaml = r#"
models:
  a:
    table: things
    properties:
      id: { type: integer, primary: true }
  b:
    table: things
    properties:
      id: { type: integer, primary: true }
"#;
        assert!(generate(yaml).is_err());
    }
}
