//! Semantic Schema Loader
//!
//! Loads a semantic schema from JSON configuration files, or converts the raw
//! metadata returned by a schema extractor.

use crate::error::{PilotError, Result};
use crate::semantic::schema::{
    Cardinality, ColumnType, DateAliasDef, SemanticColumn, SemanticRelationship, SemanticSchema,
    SemanticTable,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

/// JSON representation of a column
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnJson {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_type")]
    pub data_type: String, // any SQL type name: "varchar", "bigint", "boolean", ...
    #[serde(default)]
    pub synonyms: Vec<String>,
    #[serde(default)]
    pub flag: bool,
}

fn default_type() -> String {
    "text".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableJson {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub columns: Vec<ColumnJson>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipJson {
    /// `table.column`
    pub from: String,
    /// `table.column`
    pub to: String,
    /// "one_to_one", "many_to_one", "one_to_many", "many_to_many" (or 1:1, n:1, ...)
    #[serde(default)]
    pub cardinality: Option<String>,
}

/// Semantic schema configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticSchemaJson {
    pub tables: Vec<TableJson>,
    #[serde(default)]
    pub relationships: Vec<RelationshipJson>,
    #[serde(default)]
    pub synonyms: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub date_aliases: BTreeMap<String, DateAliasDef>,
}

/// Load and validate a semantic schema from JSON
pub fn load_from_json(json_str: &str) -> Result<SemanticSchema> {
    let schema_json: SemanticSchemaJson = serde_json::from_str(json_str)
        .map_err(|e| PilotError::SchemaInvalid(format!("Failed to parse semantic schema JSON: {}", e)))?;

    let tables = schema_json
        .tables
        .into_iter()
        .map(|t| SemanticTable {
            name: t.name,
            description: t.description,
            columns: t
                .columns
                .into_iter()
                .map(|c| SemanticColumn {
                    data_type: ColumnType::from_sql_type(&c.data_type),
                    name: c.name,
                    description: c.description,
                    synonyms: c.synonyms,
                    flag: c.flag,
                })
                .collect(),
        })
        .collect();

    let relationships = schema_json
        .relationships
        .into_iter()
        .map(|r| {
            let mut rel = SemanticRelationship::new(&r.from, &r.to)?;
            if let Some(ref c) = r.cardinality {
                rel.cardinality = Cardinality::parse(c).ok_or_else(|| {
                    PilotError::SchemaInvalid(format!("Unknown cardinality '{}' on {}", c, rel))
                })?;
            }
            Ok(rel)
        })
        .collect::<Result<Vec<_>>>()?;

    let schema = SemanticSchema {
        tables,
        relationships,
        synonyms: schema_json.synonyms,
        date_aliases: schema_json.date_aliases,
    };
    schema.validate()?;
    Ok(schema)
}

/// Load semantic schema from file
pub fn load_from_file(path: impl AsRef<Path>) -> Result<SemanticSchema> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|e| {
        PilotError::SchemaInvalid(format!("Failed to read schema file {}: {}", path.display(), e))
    })?;
    let schema = load_from_json(&contents)?;
    info!(
        "Loaded semantic schema from {} ({} tables, {} relationships)",
        path.display(),
        schema.tables.len(),
        schema.relationships.len()
    );
    Ok(schema)
}

/// Raw metadata as returned by a live-database schema extractor
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawSchema {
    pub tables: Vec<RawTable>,
    #[serde(default)]
    pub foreign_keys: Vec<RawForeignKey>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTable {
    pub name: String,
    #[serde(default)]
    pub comment: Option<String>,
    pub columns: Vec<RawColumn>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawColumn {
    pub name: String,
    pub data_type: String,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawForeignKey {
    pub table: String,
    pub column: String,
    pub referenced_table: String,
    pub referenced_column: String,
}

/// Source of raw schema metadata (a database connection in production)
#[async_trait]
pub trait SchemaExtractor: Send + Sync {
    async fn extract(&self) -> Result<RawSchema>;
}

/// Convert extractor output into a validated semantic schema.
///
/// Comments become descriptions; foreign keys become many-to-one
/// relationships. Synonyms and date aliases are curated separately and start
/// empty.
pub fn from_raw(raw: RawSchema) -> Result<SemanticSchema> {
    let tables = raw
        .tables
        .into_iter()
        .map(|t| SemanticTable {
            name: t.name,
            description: t.comment.unwrap_or_default(),
            columns: t
                .columns
                .into_iter()
                .map(|c| SemanticColumn {
                    data_type: ColumnType::from_sql_type(&c.data_type),
                    name: c.name,
                    description: c.comment.unwrap_or_default(),
                    synonyms: Vec::new(),
                    flag: false,
                })
                .collect(),
        })
        .collect();

    let relationships = raw
        .foreign_keys
        .into_iter()
        .map(|fk| SemanticRelationship {
            source_table: fk.table,
            source_column: fk.column,
            target_table: fk.referenced_table,
            target_column: fk.referenced_column,
            cardinality: Cardinality::ManyToOne,
        })
        .collect();

    let schema = SemanticSchema {
        tables,
        relationships,
        ..Default::default()
    };
    schema.validate()?;
    Ok(schema)
}
