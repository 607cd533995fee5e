use crate::schema::PropertyType;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A column type as the database reports it, normalized for comparison.
///
/// Integer display widths are dropped except for `tinyint(1)`, which the
/// server keeps as the boolean marker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum ColumnType {
    TinyInt(u32),
    BigInt,
    Decimal(u32, u32),
    Char(u32),
    Varchar(u32),
    Text,
    LongText,
    Other(String),
}

impl ColumnType {
    pub fn parse(raw: &str) -> ColumnType {
        let lower = raw.trim().to_ascii_lowercase();
        let (base, args) = match lower.split_once('(') {
            Some((base, rest)) => (
                base.trim(),
                rest.split(')')
                    .next()
                    .unwrap_or_default()
                    .split(',')
                    .filter_map(|n| n.trim().parse::<u32>().ok())
                    .collect::<Vec<_>>(),
            ),
            None => (lower.as_str(), Vec::new()),
        };

        match (base, args.as_slice()) {
            ("tinyint", [1]) | ("bool", []) | ("boolean", []) => ColumnType::TinyInt(1),
            ("bigint", _) => ColumnType::BigInt,
            ("decimal", [p, s]) => ColumnType::Decimal(*p, *s),
            ("char", [n]) => ColumnType::Char(*n),
            ("varchar", [n]) => ColumnType::Varchar(*n),
            ("text", _) => ColumnType::Text,
            ("longtext", _) => ColumnType::LongText,
            _ => ColumnType::Other(lower.clone()),
        }
    }

    /// Whether values of this type are numbers, so defaults render unquoted.
    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnType::TinyInt(_) | ColumnType::BigInt | ColumnType::Decimal(..))
    }

    /// Whether the server rejects a literal default on this type.
    pub fn is_blob(&self) -> bool {
        matches!(self, ColumnType::Text | ColumnType::LongText)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::TinyInt(n) => write!(f, "tinyint({n})"),
            ColumnType::BigInt => f.write_str("bigint"),
            ColumnType::Decimal(p, s) => write!(f, "decimal({p},{s})"),
            ColumnType::Char(n) => write!(f, "char({n})"),
            ColumnType::Varchar(n) => write!(f, "varchar({n})"),
            ColumnType::Text => f.write_str("text"),
            ColumnType::LongText => f.write_str("longtext"),
            ColumnType::Other(raw) => f.write_str(raw),
        }
    }
}

impl From<String> for ColumnType {
    fn from(raw: String) -> Self {
        ColumnType::parse(&raw)
    }
}

impl From<ColumnType> for String {
    fn from(column_type: ColumnType) -> Self {
        column_type.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(default)]
    pub required: bool,
    /// Raw default value, unquoted.
    #[serde(default)]
    pub default: Option<String>,
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: ColumnType, required: bool) -> Self {
        Column {
            name: name.into(),
            column_type,
            required,
            default: None,
        }
    }

    /// Same definition, ignoring the name.
    pub fn same_definition(&self, other: &Column) -> bool {
        self.column_type == other.column_type
            && self.required == other.required
            && same_default(self.default.as_deref(), other.default.as_deref())
    }
}

/// Defaults compare numerically when both sides are numbers, since the
/// server pads decimals (`1.5` reads back as `1.5000000000000000`).
fn same_default(a: Option<&str>, b: Option<&str>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => match (a.parse::<f64>(), b.parse::<f64>()) {
            (Ok(x), Ok(y)) => x == y,
            _ => a == b,
        },
        _ => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    Primary,
    Unique,
    Index,
    Foreign,
}

/// Referential action of a foreign key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Cascade,
    SetNull,
    #[default]
    Restrict,
    NoAction,
}

impl Action {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Action::Cascade => "CASCADE",
            Action::SetNull => "SET NULL",
            Action::Restrict => "RESTRICT",
            Action::NoAction => "NO ACTION",
        }
    }

    pub fn parse(raw: &str) -> Action {
        match raw.trim().to_ascii_uppercase().as_str() {
            "CASCADE" => Action::Cascade,
            "SET NULL" => Action::SetNull,
            "NO ACTION" => Action::NoAction,
            _ => Action::Restrict,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignRef {
    pub table: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub on_update: Action,
    #[serde(default)]
    pub on_delete: Action,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    pub name: String,
    pub kind: IndexKind,
    pub columns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<ForeignRef>,
}

/// Name the server gives every primary-key index.
pub const PRIMARY_INDEX: &str = "PRIMARY";

impl Index {
    pub fn primary(columns: Vec<String>) -> Self {
        Index {
            name: PRIMARY_INDEX.to_string(),
            kind: IndexKind::Primary,
            columns,
            reference: None,
        }
    }

    pub fn new(name: impl Into<String>, kind: IndexKind, columns: Vec<String>) -> Self {
        Index {
            name: name.into(),
            kind,
            columns,
            reference: None,
        }
    }

    pub fn foreign(name: impl Into<String>, columns: Vec<String>, reference: ForeignRef) -> Self {
        Index {
            name: name.into(),
            kind: IndexKind::Foreign,
            columns,
            reference: Some(reference),
        }
    }

    pub fn is_foreign(&self) -> bool {
        self.kind == IndexKind::Foreign
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
    #[serde(default)]
    pub indexes: Vec<Index>,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Table {
            name: name.into(),
            columns: Vec::new(),
            indexes: Vec::new(),
        }
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn index(&self, name: &str) -> Option<&Index> {
        self.indexes.iter().find(|i| i.name == name)
    }

    pub fn primary_key(&self) -> Option<&Index> {
        self.indexes.iter().find(|i| i.kind == IndexKind::Primary)
    }

    pub fn foreign_keys(&self) -> impl Iterator<Item = &Index> {
        self.indexes.iter().filter(|i| i.is_foreign())
    }

    /// Add `column` to the index called `name`, creating it if needed.
    pub(crate) fn push_index_column(&mut self, name: &str, kind: IndexKind, column: &str) {
        match self.indexes.iter_mut().find(|i| i.name == name) {
            Some(index) => index.columns.push(column.to_string()),
            None => self.indexes.push(Index::new(name, kind, vec![column.to_string()])),
        }
    }
}

/// The structure of a live database: every table, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSchema {
    #[serde(default)]
    pub tables: IndexMap<String, Table>,
}

impl DatabaseSchema {
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    pub fn from_json_str(content: &str) -> crate::error::Result<Self> {
        Ok(serde_json::from_str(content)?)
    }
}

/// Join table backing an array-of-model property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationTable {
    pub table: Table,
    pub owner: String,
    pub child: String,
    pub property: String,
    pub owner_column: String,
    pub child_column: String,
}

/// How one property is stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "storage", rename_all = "snake_case")]
pub enum FieldStorage {
    /// Scalar column holding the value itself.
    Column { kind: PropertyType },
    /// JSON text column holding a keyless nested model or free-form data.
    Inline,
    /// Column holding the primary key of a nested record.
    Reference { model: String },
    /// Rows in a relation table, one per child.
    Relation {
        model: String,
        table: String,
        owner_column: String,
        child_column: String,
    },
}

/// Storage layout of one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMapping {
    pub model: String,
    /// Absent for keyless models, which are only stored inline.
    pub table: Option<String>,
    pub primary: Option<String>,
    pub fields: IndexMap<String, FieldStorage>,
}

/// Everything the generator derives from a registry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaTarget {
    pub tables: IndexMap<String, Table>,
    pub relations: IndexMap<String, RelationTable>,
    pub mappings: IndexMap<String, ModelMapping>,
}

impl SchemaTarget {
    /// Model tables, then relation tables.
    pub fn all_tables(&self) -> impl Iterator<Item = &Table> {
        self.tables
            .values()
            .chain(self.relations.values().map(|r| &r.table))
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables
            .get(name)
            .or_else(|| self.relations.get(name).map(|r| &r.table))
    }

    pub fn mapping(&self, model: &str) -> Option<&ModelMapping> {
        self.mappings.get(model)
    }

    /// The database this target describes, as introspection would see it.
    pub fn to_database(&self) -> DatabaseSchema {
        DatabaseSchema {
            tables: self
                .all_tables()
                .map(|t| (t.name.clone(), t.clone()))
                .collect(),
        }
    }
}
