use thiserror::Error;

/// The constraint a value violated during validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    Required,
    Type,
    Model,
    Object,
    Pattern,
    Enumeration,
    Min,
    Max,
}

impl std::fmt::Display for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Rule::Required => "required",
            Rule::Type => "type",
            Rule::Model => "model",
            Rule::Object => "object",
            Rule::Pattern => "pattern",
            Rule::Enumeration => "enumeration",
            Rule::Min => "min",
            Rule::Max => "max",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Validation error on '{field}' ({rule}): {message}")]
    Validation {
        field: String,
        rule: Rule,
        message: String,
    },

    #[error("Mutation error on {model}.{field}: {reason}")]
    Mutation {
        model: String,
        field: String,
        reason: String,
    },

    #[error("Schema definition error: {0}")]
    SchemaDefinition(String),

    #[error("Record not found: {model}/{id}")]
    NotFound { model: String, id: String },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("SQL error: {0}")]
    Sql(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl ModelError {
    pub(crate) fn validation(field: impl Into<String>, rule: Rule, message: impl Into<String>) -> Self {
        ModelError::Validation {
            field: field.into(),
            rule,
            message: message.into(),
        }
    }

    pub(crate) fn mutation(
        model: impl Into<String>,
        field: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        ModelError::Mutation {
            model: model.into(),
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// The rule a validation error reports, if this is one.
    pub fn rule(&self) -> Option<Rule> {
        match self {
            ModelError::Validation { rule, .. } => Some(*rule),
            _ => None,
        }
    }

    /// The field path a validation or mutation error names.
    pub fn field(&self) -> Option<&str> {
        match self {
            ModelError::Validation { field, .. } | ModelError::Mutation { field, .. } => {
                Some(field)
            }
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ModelError>;
