use crate::error::{ModelError, Result, Rule};
use crate::record::Record;
use crate::schema::{PropertySchema, PropertyType};
use crate::value::Value;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;
use std::sync::OnceLock;

/// Validate a record against its definition, recursing into nested records.
/// Stops at the first violation.
pub fn validate(record: &Record) -> Result<()> {
    validate_at(record, "")
}

fn validate_at(record: &Record, prefix: &str) -> Result<()> {
    let definition = record.model();

    for property in definition.enabled_properties() {
        let path = format!("{prefix}{}", property.id);
        let value = record.get(&property.id).unwrap_or(&Value::Null);

        if value.is_null() {
            if property.required {
                return Err(ModelError::validation(
                    &path,
                    Rule::Required,
                    format!("Required field '{path}' is missing"),
                ));
            }
            continue;
        }

        // A bare id in place of a keyed nested record that was not loaded
        if let Some(key) = reference_key(record, property, value) {
            check_type(&path, key, value)?;
            continue;
        }

        check_type(&path, property, value)?;

        if let Some(model) = &property.model {
            check_instances(&path, property, value, model, Rule::Model)?;
        }
        if let Some(target) = &property.object {
            check_instances(&path, property, value, target, Rule::Object)?;
        }

        if let (Some(regex), Value::String(s)) = (definition.pattern(&property.id), value) {
            if !regex.is_match(s) {
                return Err(ModelError::validation(
                    &path,
                    Rule::Pattern,
                    format!("Field '{path}' value '{s}' does not match pattern '{}'", regex.as_str()),
                ));
            }
        }

        if let Some(allowed) = &property.enumeration {
            check_enumeration(&path, allowed, value)?;
        }

        check_bounds(&path, property, value)?;
    }

    Ok(())
}

/// Primary key of the nested model when `value` is a scalar id standing in
/// for a record of a keyed model.
fn reference_key<'r>(record: &'r Record, property: &PropertySchema, value: &Value) -> Option<&'r PropertySchema> {
    if !property.is_model_object() || !matches!(value, Value::String(_) | Value::Integer(_)) {
        return None;
    }
    record.registry().lookup(property.model.as_deref()?)?.primary_key()
}

fn check_type(path: &str, property: &PropertySchema, value: &Value) -> Result<()> {
    let matches = match property.kind {
        PropertyType::Any => true,
        PropertyType::Boolean => matches!(value, Value::Bool(_)),
        PropertyType::Integer => matches!(value, Value::Integer(_)),
        PropertyType::Number => matches!(value, Value::Integer(_) | Value::Float(_)),
        PropertyType::String => matches!(value, Value::String(_)),
        PropertyType::Uuid => value.as_str().is_some_and(|s| s.chars().count() == 36),
        PropertyType::Url => value.as_str().is_some_and(|s| url::Url::parse(s).is_ok()),
        PropertyType::Email => value.as_str().is_some_and(|s| email_pattern().is_match(s)),
        PropertyType::Datetime => value.as_str().is_some_and(is_datetime),
        PropertyType::Date => value
            .as_str()
            .is_some_and(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()),
        PropertyType::Time => value.as_str().is_some_and(is_time),
        PropertyType::Array => matches!(value, Value::Array(_)),
        PropertyType::Object => matches!(value, Value::Object(_) | Value::Record(_)),
        // Callables have no data representation
        PropertyType::Function => false,
    };

    if matches {
        Ok(())
    } else {
        Err(ModelError::validation(
            path,
            Rule::Type,
            format!(
                "Field '{path}' expected {}, got {}",
                property.kind,
                describe(value)
            ),
        ))
    }
}

/// Object values must be records of `target`; array values must hold only
/// such records. Nested records are validated in turn.
fn check_instances(
    path: &str,
    property: &PropertySchema,
    value: &Value,
    target: &str,
    rule: Rule,
) -> Result<()> {
    // The object check only recurses when no model check already did
    let recurse = rule == Rule::Model || property.model.is_none();

    match value {
        Value::Array(items) if property.kind == PropertyType::Array => {
            for (i, item) in items.iter().enumerate() {
                let item_path = format!("{path}[{i}]");
                let record = instance_of(&item_path, item, target, rule)?;
                if recurse {
                    validate_at(record, &format!("{item_path}."))?;
                }
            }
            Ok(())
        }
        _ => {
            let record = instance_of(path, value, target, rule)?;
            if recurse {
                validate_at(record, &format!("{path}."))?;
            }
            Ok(())
        }
    }
}

fn instance_of<'a>(path: &str, value: &'a Value, target: &str, rule: Rule) -> Result<&'a Record> {
    match value {
        Value::Record(record) if record.model().is_a(target) => Ok(record),
        other => Err(ModelError::validation(
            path,
            rule,
            format!("Field '{path}' expected a '{target}' record, got {}", describe(other)),
        )),
    }
}

fn check_enumeration(path: &str, allowed: &[serde_json::Value], value: &Value) -> Result<()> {
    let allowed: Vec<Value> = allowed.iter().map(Value::from).collect();
    let listed = allowed
        .iter()
        .map(Value::to_key)
        .collect::<Vec<_>>()
        .join(", ");

    match value {
        Value::Array(items) => {
            if let Some(bad) = items.iter().find(|item| !listed_in(&allowed, item)) {
                return Err(ModelError::validation(
                    path,
                    Rule::Enumeration,
                    format!("Field '{path}' contains '{}' which is not in [{listed}]", bad.to_key()),
                ));
            }
        }
        scalar => {
            if !listed_in(&allowed, scalar) {
                return Err(ModelError::validation(
                    path,
                    Rule::Enumeration,
                    format!("Field '{path}' value '{}' is not in [{listed}]", scalar.to_key()),
                ));
            }
        }
    }
    Ok(())
}

/// Numbers compare by value, so a stored `2.0` matches a listed `2`.
fn listed_in(allowed: &[Value], value: &Value) -> bool {
    allowed.iter().any(|candidate| match (candidate.as_f64(), value.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => candidate == value,
    })
}

fn check_bounds(path: &str, property: &PropertySchema, value: &Value) -> Result<()> {
    if property.min.is_none() && property.max.is_none() {
        return Ok(());
    }

    let (measure, what) = match value {
        Value::Integer(_) | Value::Float(_) => match value.as_f64() {
            Some(n) => (n, "value"),
            None => return Ok(()),
        },
        Value::String(s) => (s.chars().count() as f64, "length"),
        Value::Array(items) => (items.len() as f64, "element count"),
        _ => return Ok(()),
    };

    if let Some(min) = property.min {
        if measure < min {
            return Err(ModelError::validation(
                path,
                Rule::Min,
                format!("Field '{path}' {what} {measure} is below the minimum of {min}"),
            ));
        }
    }
    if let Some(max) = property.max {
        if measure > max {
            return Err(ModelError::validation(
                path,
                Rule::Max,
                format!("Field '{path}' {what} {measure} exceeds the maximum of {max}"),
            ));
        }
    }
    Ok(())
}

fn is_datetime(s: &str) -> bool {
    DateTime::parse_from_rfc3339(s).is_ok()
        || NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").is_ok()
        || NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").is_ok()
}

fn is_time(s: &str) -> bool {
    ["%H:%M:%S", "%H:%M:%S%.f", "%H:%M"]
        .iter()
        .any(|format| NaiveTime::parse_from_str(s, format).is_ok())
}

fn email_pattern() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern is valid"))
}

fn describe(value: &Value) -> String {
    match value {
        Value::Record(record) => format!("a '{}' record", record.model().name()),
        Value::String(s) => format!("string '{s}'"),
        other => other.kind_name().to_string(),
    }
}
