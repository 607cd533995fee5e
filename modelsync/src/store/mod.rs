use crate::database::{self, FieldStorage, InformationSchema, Introspect, ModelMapping, SchemaTarget};
use crate::driver::{Row, SqlExecutor};
use crate::error::{ModelError, Result};
use crate::migration::{diff_schemas, ReconcileOptions, SchemaDiff};
use crate::record::Record;
use crate::schema::{PropertyType, Registry};
use crate::value::Value;
use indexmap::IndexMap;
use log::{debug, info};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Prepared statements are cached per table and operation shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct StatementKey {
    table: String,
    shape: String,
}

/// Rows on the current restore path, as (model, id) pairs.
type RestorePath = HashSet<(String, String)>;

/// A model that owns a table.
struct Stored<'s> {
    model: &'s str,
    mapping: &'s ModelMapping,
    table: &'s str,
    primary: &'s str,
}

/// Persists records of a registry through an SQL executor and keeps the
/// database structure in line with the registry.
///
/// The statement cache makes a store single-threaded; give each thread its
/// own store.
pub struct Store<E: SqlExecutor> {
    executor: E,
    registry: Arc<Registry>,
    target: SchemaTarget,
    statements: RefCell<HashMap<StatementKey, (E::Prepared, Arc<str>)>>,
}

impl<E: SqlExecutor> Store<E> {
    /// Create a store, deriving the target structure from `registry`.
    pub fn new(executor: E, registry: Arc<Registry>) -> Result<Self> {
        let target = database::target(&registry)?;
        Ok(Store {
            executor,
            registry,
            target,
            statements: RefCell::new(HashMap::new()),
        })
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn target(&self) -> &SchemaTarget {
        &self.target
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    // ── Reads ──────────────────────────────────────────────────────

    /// Whether a row with this primary key exists.
    pub fn exists(&self, model: &str, id: impl Into<Value>) -> Result<bool> {
        let stored = self.stored(model)?;
        let rows = self.query(
            stored.table,
            "exists",
            || {
                format!(
                    "SELECT 1 AS {} FROM {} WHERE {} = ? LIMIT 1",
                    self.ident("found"),
                    self.ident(stored.table),
                    self.ident(stored.primary)
                )
            },
            &[id.into()],
        )?;
        Ok(!rows.is_empty())
    }

    /// Load one record. With `restore`, nested references and relations
    /// are loaded as records too.
    pub fn get(&self, model: &str, id: impl Into<Value>, restore: bool) -> Result<Record> {
        let id = id.into();
        let mut path = RestorePath::new();
        self.load(model, &id, restore, &mut path)?
            .ok_or_else(|| ModelError::NotFound {
                model: model.to_string(),
                id: id.to_key(),
            })
    }

    /// Load several records by primary key, in the order given.
    pub fn collect(&self, model: &str, ids: &[Value], restore: bool) -> Result<Vec<Record>> {
        ids.iter()
            .map(|id| self.get(model, id.clone(), restore))
            .collect()
    }

    /// Every record of a model, ordered by primary key.
    pub fn list(&self, model: &str, restore: bool) -> Result<Vec<Record>> {
        self.filter(model, &[], restore)
    }

    /// Records whose fields equal the given values (null matches null),
    /// ordered by primary key.
    pub fn filter(&self, model: &str, conditions: &[(&str, Value)], restore: bool) -> Result<Vec<Record>> {
        let stored = self.stored(model)?;

        let mut clauses = Vec::with_capacity(conditions.len());
        let mut params = Vec::with_capacity(conditions.len());
        let mut shape = String::from("filter");
        for (field, value) in conditions {
            let storage = match stored.mapping.fields.get(*field) {
                Some(FieldStorage::Relation { .. }) | None => {
                    return Err(ModelError::Persistence(format!(
                        "cannot filter '{model}' on '{field}': not a stored column"
                    )))
                }
                Some(storage) => storage,
            };
            if value.is_null() {
                clauses.push(format!("{} IS NULL", self.ident(field)));
                shape.push_str(&format!(":{field}~null"));
            } else {
                clauses.push(format!("{} = ?", self.ident(field)));
                params.push(self.storage_value(storage, value)?);
                shape.push_str(&format!(":{field}"));
            }
        }

        let rows = self.query(
            stored.table,
            &shape,
            || {
                let mut sql = format!(
                    "SELECT {} FROM {}",
                    self.select_list(stored.mapping, None),
                    self.ident(stored.table)
                );
                if !clauses.is_empty() {
                    sql.push_str(" WHERE ");
                    sql.push_str(&clauses.join(" AND "));
                }
                sql.push_str(&format!(" ORDER BY {}", self.ident(stored.primary)));
                sql
            },
            &params,
        )?;

        rows.into_iter()
            .map(|row| self.hydrate(&stored, row, restore, &mut RestorePath::new()))
            .collect()
    }

    // ── Writes ─────────────────────────────────────────────────────

    /// Validate and store a record: nested keyed records first, then the
    /// row itself (insert or update), then its relations. Returns the
    /// primary key.
    pub fn set(&self, record: &Record) -> Result<Value> {
        record.validate()?;
        self.persist(record)
    }

    /// Delete one row. Relation rows go with it through their cascading
    /// foreign keys. Returns whether a row was deleted.
    pub fn delete(&self, model: &str, id: impl Into<Value>) -> Result<bool> {
        let stored = self.stored(model)?;
        let affected = self.execute(
            stored.table,
            "delete",
            || {
                format!(
                    "DELETE FROM {} WHERE {} = ?",
                    self.ident(stored.table),
                    self.ident(stored.primary)
                )
            },
            &[id.into()],
        )?;
        Ok(affected > 0)
    }

    // ── Structure ──────────────────────────────────────────────────

    /// Changes needed to bring the introspected database to the target.
    pub fn plan(&self, introspector: &impl Introspect, options: &ReconcileOptions) -> Result<SchemaDiff> {
        let actual = introspector.introspect()?;
        Ok(diff_schemas(&actual, &self.target, options))
    }

    /// Apply the planned changes, stopping at the first failing statement.
    /// Returns the statements executed.
    pub fn reconcile(&self, introspector: &impl Introspect, options: &ReconcileOptions) -> Result<Vec<String>> {
        let diff = self.plan(introspector, options)?;
        let statements = diff.statements();
        if statements.is_empty() {
            info!("reconcile: database already matches {} tables", self.target.tables.len());
            return Ok(statements);
        }

        info!(
            "reconcile: {} changes, {} statements",
            diff.len(),
            statements.len()
        );
        for sql in &statements {
            debug!("{sql}");
            self.executor.execute(sql)?;
        }
        // Cached statements may refer to the old structure
        self.statements.borrow_mut().clear();
        Ok(statements)
    }

    /// Reconcile against the connected database's `information_schema`.
    pub fn reconcile_live(&self, options: &ReconcileOptions) -> Result<Vec<String>> {
        self.reconcile(&InformationSchema::new(&self.executor), options)
    }

    // ── Internals ──────────────────────────────────────────────────

    fn stored(&self, model: &str) -> Result<Stored<'_>> {
        let definition = self.registry.get(model)?;
        let mapping = self.target.mapping(model).ok_or_else(|| {
            ModelError::SchemaDefinition(format!("model '{model}' has no storage mapping"))
        })?;
        match (&mapping.table, &mapping.primary) {
            (Some(table), Some(primary)) => Ok(Stored {
                model: definition.name(),
                mapping,
                table,
                primary,
            }),
            _ => Err(ModelError::Persistence(format!(
                "model '{model}' has no primary key and can only be stored inline"
            ))),
        }
    }

    fn ident(&self, name: &str) -> String {
        self.executor.quote_identifier(name)
    }

    fn select_list(&self, mapping: &ModelMapping, alias: Option<&str>) -> String {
        mapping
            .fields
            .iter()
            .filter(|(_, storage)| !matches!(storage, FieldStorage::Relation { .. }))
            .map(|(field, _)| match alias {
                Some(alias) => format!("{alias}.{}", self.ident(field)),
                None => self.ident(field),
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn prepared(&self, table: &str, shape: &str, build: impl FnOnce() -> String) -> Result<(E::Prepared, Arc<str>)> {
        let key = StatementKey {
            table: table.to_string(),
            shape: shape.to_string(),
        };
        if let Some(cached) = self.statements.borrow().get(&key) {
            return Ok(cached.clone());
        }

        let sql: Arc<str> = Arc::from(build());
        debug!("prepare {table}/{shape}: {sql}");
        let statement = self.executor.prepare(&sql)?;
        self.statements
            .borrow_mut()
            .insert(key, (statement.clone(), sql.clone()));
        Ok((statement, sql))
    }

    fn query(&self, table: &str, shape: &str, build: impl FnOnce() -> String, params: &[Value]) -> Result<Vec<Row>> {
        let (statement, sql) = self.prepared(table, shape, build)?;
        debug!("{sql}");
        self.executor.query_prepared(&statement, params)
    }

    fn execute(&self, table: &str, shape: &str, build: impl FnOnce() -> String, params: &[Value]) -> Result<u64> {
        let (statement, sql) = self.prepared(table, shape, build)?;
        debug!("{sql}");
        self.executor.execute_prepared(&statement, params)
    }

    fn load(&self, model: &str, id: &Value, restore: bool, path: &mut RestorePath) -> Result<Option<Record>> {
        let stored = self.stored(model)?;
        let rows = self.query(
            stored.table,
            "get",
            || {
                format!(
                    "SELECT {} FROM {} WHERE {} = ?",
                    self.select_list(stored.mapping, None),
                    self.ident(stored.table),
                    self.ident(stored.primary)
                )
            },
            std::slice::from_ref(id),
        )?;
        match rows.into_iter().next() {
            Some(row) => Ok(Some(self.hydrate(&stored, row, restore, path)?)),
            None => Ok(None),
        }
    }

    /// Turn a row into a record, loading references and relations when
    /// restoring. Rows already on the restore path stay as ids.
    fn hydrate(&self, stored: &Stored<'_>, mut row: Row, restore: bool, path: &mut RestorePath) -> Result<Record> {
        let id = row.get(stored.primary).cloned().unwrap_or_default();
        let step = (stored.model.to_string(), id.to_key());
        path.insert(step.clone());

        let mut data = IndexMap::with_capacity(stored.mapping.fields.len());
        for (field, storage) in &stored.mapping.fields {
            let raw = row.shift_remove(field).unwrap_or_default();
            let value = match storage {
                FieldStorage::Column { kind } => coerce(*kind, raw),
                FieldStorage::Inline => decode_inline(raw)?,
                FieldStorage::Reference { model } if restore && !raw.is_null() => {
                    self.restore_reference(model, raw, path)?
                }
                FieldStorage::Reference { .. } => raw,
                FieldStorage::Relation { .. } if restore => {
                    Value::Array(self.restore_relation(storage, &id, path)?)
                }
                // Not loaded
                FieldStorage::Relation { .. } => Value::Null,
            };
            data.insert(field.clone(), value);
        }

        path.remove(&step);
        Record::new(&self.registry, stored.model, Value::Object(data))
    }

    fn restore_reference(&self, model: &str, id: Value, path: &mut RestorePath) -> Result<Value> {
        if path.contains(&(model.to_string(), id.to_key())) {
            return Ok(id);
        }
        match self.load(model, &id, true, path)? {
            Some(record) => Ok(Value::from(record)),
            None => Err(ModelError::NotFound {
                model: model.to_string(),
                id: id.to_key(),
            }),
        }
    }

    fn restore_relation(&self, storage: &FieldStorage, owner_id: &Value, path: &mut RestorePath) -> Result<Vec<Value>> {
        let FieldStorage::Relation {
            model,
            table,
            owner_column,
            child_column,
        } = storage
        else {
            return Ok(Vec::new());
        };
        let child = self.stored(model)?;
        let rows = self.query(
            table,
            "restore",
            || {
                format!(
                    "SELECT {} FROM {} c JOIN {} r ON r.{} = c.{} WHERE r.{} = ? ORDER BY c.{}",
                    self.select_list(child.mapping, Some("c")),
                    self.ident(child.table),
                    self.ident(table),
                    self.ident(child_column),
                    self.ident(child.primary),
                    self.ident(owner_column),
                    self.ident(child.primary)
                )
            },
            std::slice::from_ref(owner_id),
        )?;

        let mut children = Vec::with_capacity(rows.len());
        for row in rows {
            let id = row.get(child.primary).cloned().unwrap_or_default();
            if path.contains(&(model.clone(), id.to_key())) {
                children.push(id);
            } else {
                children.push(Value::from(self.hydrate(&child, row, true, path)?));
            }
        }
        Ok(children)
    }

    fn persist(&self, record: &Record) -> Result<Value> {
        let stored = self.stored(record.model().name())?;
        let id = record.id().cloned().ok_or_else(|| {
            ModelError::Persistence(format!(
                "cannot store a '{}' record without a value for '{}'",
                stored.model, stored.primary
            ))
        })?;

        let mut columns = Vec::new();
        let mut values = Vec::new();
        for (field, storage) in &stored.mapping.fields {
            if matches!(storage, FieldStorage::Relation { .. }) {
                continue;
            }
            let value = record.get(field).unwrap_or(&Value::Null);
            let value = match (storage, value) {
                (FieldStorage::Reference { .. }, Value::Record(child)) => self.persist(child)?,
                _ => self.storage_value(storage, value)?,
            };
            columns.push(field.as_str());
            values.push(value);
        }

        if self.exists(stored.model, id.clone())? {
            self.update(&stored, &columns, values, &id)?;
        } else {
            self.insert(&stored, &columns, values)?;
        }

        for (field, storage) in &stored.mapping.fields {
            if let (FieldStorage::Relation { .. }, Some(Value::Array(items))) = (storage, record.get(field)) {
                self.sync_relation(storage, &id, items)?;
            }
        }
        Ok(id)
    }

    fn insert(&self, stored: &Stored<'_>, columns: &[&str], values: Vec<Value>) -> Result<()> {
        self.execute(
            stored.table,
            "insert",
            || {
                let names: Vec<String> = columns.iter().map(|c| self.ident(c)).collect();
                let marks = vec!["?"; columns.len()].join(", ");
                format!(
                    "INSERT INTO {} ({}) VALUES ({marks})",
                    self.ident(stored.table),
                    names.join(", ")
                )
            },
            &values,
        )?;
        Ok(())
    }

    fn update(&self, stored: &Stored<'_>, columns: &[&str], values: Vec<Value>, id: &Value) -> Result<()> {
        let mut params = Vec::with_capacity(values.len());
        let mut assignments = Vec::with_capacity(columns.len());
        for (column, value) in columns.iter().zip(values) {
            if *column != stored.primary {
                assignments.push(format!("{} = ?", self.ident(column)));
                params.push(value);
            }
        }
        if assignments.is_empty() {
            return Ok(());
        }
        params.push(id.clone());

        self.execute(
            stored.table,
            "update",
            || {
                format!(
                    "UPDATE {} SET {} WHERE {} = ?",
                    self.ident(stored.table),
                    assignments.join(", "),
                    self.ident(stored.primary)
                )
            },
            &params,
        )?;
        Ok(())
    }

    /// Make the relation rows of one owner match `items` exactly.
    fn sync_relation(&self, storage: &FieldStorage, owner_id: &Value, items: &[Value]) -> Result<()> {
        let FieldStorage::Relation {
            table,
            owner_column,
            child_column,
            ..
        } = storage
        else {
            return Ok(());
        };

        let mut wanted: Vec<Value> = Vec::with_capacity(items.len());
        for item in items {
            let child_id = match item {
                Value::Record(child) => self.persist(child)?,
                other => other.clone(),
            };
            if !wanted.iter().any(|w| w.to_key() == child_id.to_key()) {
                wanted.push(child_id);
            }
        }

        let existing: Vec<Value> = self
            .query(
                table,
                "children",
                || {
                    format!(
                        "SELECT {} FROM {} WHERE {} = ?",
                        self.ident(child_column),
                        self.ident(table),
                        self.ident(owner_column)
                    )
                },
                std::slice::from_ref(owner_id),
            )?
            .into_iter()
            .filter_map(|mut row| row.shift_remove(child_column.as_str()))
            .collect();
        let existing_keys: HashSet<String> = existing.iter().map(Value::to_key).collect();
        let wanted_keys: HashSet<String> = wanted.iter().map(Value::to_key).collect();

        let mut removed = 0;
        for old in existing.iter().filter(|v| !wanted_keys.contains(&v.to_key())) {
            self.execute(
                table,
                "unlink",
                || {
                    format!(
                        "DELETE FROM {} WHERE {} = ? AND {} = ?",
                        self.ident(table),
                        self.ident(owner_column),
                        self.ident(child_column)
                    )
                },
                &[owner_id.clone(), old.clone()],
            )?;
            removed += 1;
        }

        let mut added = 0;
        for new in wanted.into_iter().filter(|v| !existing_keys.contains(&v.to_key())) {
            self.execute(
                table,
                "link",
                || {
                    format!(
                        "INSERT INTO {} ({}, {}) VALUES (?, ?)",
                        self.ident(table),
                        self.ident(owner_column),
                        self.ident(child_column)
                    )
                },
                &[owner_id.clone(), new],
            )?;
            added += 1;
        }

        debug!("relation {table} for {}: +{added} -{removed}", owner_id.to_key());
        Ok(())
    }

    /// The value written to a column for one field.
    fn storage_value(&self, storage: &FieldStorage, value: &Value) -> Result<Value> {
        match (storage, value) {
            (FieldStorage::Reference { .. }, Value::Record(child)) => child.id().cloned().ok_or_else(|| {
                ModelError::Persistence(format!(
                    "nested '{}' record has no primary key value",
                    child.model().name()
                ))
            }),
            (FieldStorage::Inline, Value::Null) => Ok(Value::Null),
            (FieldStorage::Inline, other) => Ok(Value::String(serde_json::to_string(&other.to_json())?)),
            (_, other) => Ok(other.clone()),
        }
    }
}

/// Map a stored scalar back to the property's runtime kind.
fn coerce(kind: PropertyType, raw: Value) -> Value {
    match (kind, raw) {
        (PropertyType::Boolean, Value::Integer(n)) => Value::Bool(n != 0),
        (PropertyType::Boolean, Value::String(s)) => Value::Bool(s == "1" || s.eq_ignore_ascii_case("true")),
        (PropertyType::Integer, Value::String(s)) => match s.parse() {
            Ok(n) => Value::Integer(n),
            Err(_) => Value::String(s),
        },
        (PropertyType::Number, Value::String(s)) => match s.parse() {
            Ok(n) => Value::Float(n),
            Err(_) => Value::String(s),
        },
        (_, other) => other,
    }
}

fn decode_inline(raw: Value) -> Result<Value> {
    match raw {
        Value::String(text) => {
            let json: serde_json::Value = serde_json::from_str(&text)?;
            Ok(Value::from(json))
        }
        other => Ok(other),
    }
}
