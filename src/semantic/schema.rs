//! Semantic Schema Model
//!
//! Business-friendly model of a database: tables, columns, relationships,
//! table synonyms and date-range aliases.

use crate::error::{PilotError, Result};
use crate::semantic::date_alias::DateRule;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// Column data type, reduced to what scoring and prompting care about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    #[default]
    Text,
    Integer,
    Decimal,
    Boolean,
    Date,
    Timestamp,
    Other,
}

impl ColumnType {
    /// Map a database type name ("varchar(32)", "BIGINT", "timestamptz") onto a column type
    pub fn from_sql_type(type_name: &str) -> Self {
        let t = type_name.trim().to_lowercase();
        let base = t.split(|c: char| c == '(' || c == ' ').next().unwrap_or("");
        match base {
            "int" | "integer" | "bigint" | "smallint" | "tinyint" | "int2" | "int4" | "int8"
            | "serial" | "bigserial" => ColumnType::Integer,
            "numeric" | "decimal" | "real" | "double" | "float" | "float4" | "float8"
            | "money" | "number" => ColumnType::Decimal,
            "bool" | "boolean" | "bit" => ColumnType::Boolean,
            "date" => ColumnType::Date,
            "timestamp" | "timestamptz" | "datetime" | "time" => ColumnType::Timestamp,
            "char" | "character" | "varchar" | "nvarchar" | "text" | "string" | "uuid"
            | "citext" | "enum" => ColumnType::Text,
            _ => ColumnType::Other,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnType::Integer | ColumnType::Decimal)
    }

    pub fn is_temporal(&self) -> bool {
        matches!(self, ColumnType::Date | ColumnType::Timestamp)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ColumnType::Text => "text",
            ColumnType::Integer => "integer",
            ColumnType::Decimal => "decimal",
            ColumnType::Boolean => "boolean",
            ColumnType::Date => "date",
            ColumnType::Timestamp => "timestamp",
            ColumnType::Other => "other",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticColumn {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub data_type: ColumnType,
    #[serde(default)]
    pub synonyms: Vec<String>,
    /// Explicit business-flag marker; see [`SemanticColumn::is_flag`]
    #[serde(default)]
    pub flag: bool,
}

impl SemanticColumn {
    pub fn new(name: impl Into<String>, data_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            data_type,
            synonyms: Vec::new(),
            flag: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_synonyms(mut self, synonyms: &[&str]) -> Self {
        self.synonyms = synonyms.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Boolean-like business flag. Flags must be filtered with a literal
    /// boolean, never by matching their description text.
    pub fn is_flag(&self) -> bool {
        if self.flag || self.data_type == ColumnType::Boolean {
            return true;
        }
        let name = self.name.to_lowercase();
        name.starts_with("is_") || name.starts_with("has_") || name.ends_with("_flag")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticTable {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub columns: Vec<SemanticColumn>,
}

impl SemanticTable {
    pub fn new(name: impl Into<String>, columns: Vec<SemanticColumn>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            columns,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn column(&self, name: &str) -> Option<&SemanticColumn> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// Cardinality tag on a relationship (authoritative metadata)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    OneToOne,
    #[default]
    ManyToOne,
    OneToMany,
    ManyToMany,
}

impl Cardinality {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "one_to_one" | "1:1" | "one-to-one" => Some(Cardinality::OneToOne),
            "many_to_one" | "n:1" | "many-to-one" => Some(Cardinality::ManyToOne),
            "one_to_many" | "1:n" | "one-to-many" => Some(Cardinality::OneToMany),
            "many_to_many" | "n:n" | "many-to-many" => Some(Cardinality::ManyToMany),
            _ => None,
        }
    }
}

/// `source_table.source_column -> target_table.target_column`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemanticRelationship {
    pub source_table: String,
    pub source_column: String,
    pub target_table: String,
    pub target_column: String,
    #[serde(default)]
    pub cardinality: Cardinality,
}

impl SemanticRelationship {
    pub fn new(source: &str, target: &str) -> Result<Self> {
        let (source_table, source_column) = split_column_ref(source)?;
        let (target_table, target_column) = split_column_ref(target)?;
        Ok(Self {
            source_table,
            source_column,
            target_table,
            target_column,
            cardinality: Cardinality::default(),
        })
    }

    pub fn connects(&self, a: &str, b: &str) -> bool {
        (self.source_table == a && self.target_table == b)
            || (self.source_table == b && self.target_table == a)
    }

    pub fn touches(&self, table: &str) -> bool {
        self.source_table == table || self.target_table == table
    }
}

impl fmt::Display for SemanticRelationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} -> {}.{}",
            self.source_table, self.source_column, self.target_table, self.target_column
        )
    }
}

/// Logical date alias, e.g. "last month" -> previous calendar month
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateAliasDef {
    pub rule: DateRule,
    /// `table.column` the alias applies to, when the schema pins one
    #[serde(default)]
    pub column: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SemanticSchema {
    pub tables: Vec<SemanticTable>,
    #[serde(default)]
    pub relationships: Vec<SemanticRelationship>,
    /// table name -> synonyms
    #[serde(default)]
    pub synonyms: BTreeMap<String, Vec<String>>,
    /// alias phrase -> rule
    #[serde(default)]
    pub date_aliases: BTreeMap<String, DateAliasDef>,
}

impl SemanticSchema {
    pub fn table(&self, name: &str) -> Option<&SemanticTable> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn column(&self, table: &str, column: &str) -> Option<&SemanticColumn> {
        self.table(table).and_then(|t| t.column(column))
    }

    /// Check structural invariants. Must pass before an index is built.
    pub fn validate(&self) -> Result<()> {
        let mut table_names = HashSet::new();
        for table in &self.tables {
            if table.name.trim().is_empty() {
                return Err(PilotError::SchemaInvalid("table with empty name".to_string()));
            }
            if !table_names.insert(table.name.as_str()) {
                return Err(PilotError::SchemaInvalid(format!(
                    "duplicate table '{}'",
                    table.name
                )));
            }
            let mut column_names = HashSet::new();
            for column in &table.columns {
                if column.name.trim().is_empty() {
                    return Err(PilotError::SchemaInvalid(format!(
                        "table '{}' has a column with an empty name",
                        table.name
                    )));
                }
                if !column_names.insert(column.name.as_str()) {
                    return Err(PilotError::SchemaInvalid(format!(
                        "duplicate column '{}.{}'",
                        table.name, column.name
                    )));
                }
            }
        }

        for rel in &self.relationships {
            for (table, column) in [
                (&rel.source_table, &rel.source_column),
                (&rel.target_table, &rel.target_column),
            ] {
                if self.column(table, column).is_none() {
                    return Err(PilotError::SchemaInvalid(format!(
                        "relationship {} references missing column {}.{}",
                        rel, table, column
                    )));
                }
            }
        }

        for table in self.synonyms.keys() {
            if self.table(table).is_none() {
                return Err(PilotError::SchemaInvalid(format!(
                    "synonyms declared for unknown table '{}'",
                    table
                )));
            }
        }

        for (alias, def) in &self.date_aliases {
            def.rule.check().map_err(|e| {
                PilotError::SchemaInvalid(format!("date alias '{}': {}", alias, e))
            })?;
            if let Some(ref column_ref) = def.column {
                let (table, column) = split_column_ref(column_ref)?;
                if self.column(&table, &column).is_none() {
                    return Err(PilotError::SchemaInvalid(format!(
                        "date alias '{}' bound to missing column {}",
                        alias, column_ref
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Split `table.column` into its parts
pub fn split_column_ref(reference: &str) -> Result<(String, String)> {
    match reference.split_once('.') {
        Some((table, column)) if !table.is_empty() && !column.is_empty() => {
            Ok((table.to_string(), column.to_string()))
        }
        _ => Err(PilotError::SchemaInvalid(format!(
            "'{}' is not a table.column reference",
            reference
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orders_schema() -> SemanticSchema {
        SemanticSchema {
            tables: vec![
                SemanticTable::new(
                    "orders",
                    vec![
                        SemanticColumn::new("id", ColumnType::Integer),
                        SemanticColumn::new("customer_id", ColumnType::Integer),
                    ],
                ),
                SemanticTable::new("customers", vec![SemanticColumn::new("id", ColumnType::Integer)]),
            ],
            relationships: vec![SemanticRelationship::new("orders.customer_id", "customers.id").unwrap()],
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_schema_passes() {
        assert!(orders_schema().validate().is_ok());
    }

    #[test]
    fn test_dangling_relationship_is_rejected() {
        let mut schema = orders_schema();
        schema.relationships.push(SemanticRelationship::new("orders.region_id", "regions.id").unwrap());
        let err = schema.validate().unwrap_err();
        assert!(matches!(err, PilotError::SchemaInvalid(_)));
        assert!(err.to_string().contains("orders.region_id"));
    }

    #[test]
    fn test_duplicate_column_is_rejected() {
        let mut schema = orders_schema();
        schema.tables[1].columns.push(SemanticColumn::new("id", ColumnType::Text));
        assert!(matches!(schema.validate(), Err(PilotError::SchemaInvalid(_))));
    }

    #[test]
    fn test_flag_detection() {
        assert!(SemanticColumn::new("is_active", ColumnType::Integer).is_flag());
        assert!(SemanticColumn::new("vip", ColumnType::Boolean).is_flag());
        assert!(SemanticColumn::new("churn_flag", ColumnType::Text).is_flag());
        assert!(!SemanticColumn::new("status", ColumnType::Text).is_flag());
    }

    #[test]
    fn test_sql_type_mapping() {
        assert_eq!(ColumnType::from_sql_type("VARCHAR(255)"), ColumnType::Text);
        assert_eq!(ColumnType::from_sql_type("numeric(10,2)"), ColumnType::Decimal);
        assert_eq!(ColumnType::from_sql_type("timestamp with time zone"), ColumnType::Timestamp);
        assert_eq!(ColumnType::from_sql_type("BIGINT"), ColumnType::Integer);
        assert_eq!(ColumnType::from_sql_type("geometry"), ColumnType::Other);
    }
}
