//! Knowledge Index
//!
//! Compact, query-oriented view of a semantic schema: per-table and
//! per-column keyword tokens, a synonym lookup and date-alias phrases. The
//! index is a pure function of the schema it was built from.

use crate::error::{PilotError, Result};
use crate::knowledge::tokenizer::{token_sequence, token_set, words};
use crate::semantic::{ColumnType, DateRule, SemanticRelationship, SemanticSchema};
use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexedColumn {
    pub name: String,
    pub tokens: BTreeSet<String>,
    pub data_type: ColumnType,
    pub is_flag: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexedTable {
    pub name: String,
    /// Tokens from the table name, description and synonyms
    pub tokens: BTreeSet<String>,
    pub columns: Vec<IndexedColumn>,
}

impl IndexedTable {
    pub fn column(&self, name: &str) -> Option<&IndexedColumn> {
        self.columns.iter().find(|c| c.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexedDateAlias {
    pub name: String,
    pub phrase: Vec<String>,
    pub rule: DateRule,
    pub column: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KnowledgeIndex {
    fingerprint: u64,
    tables: Vec<IndexedTable>,
    /// normalized synonym phrase -> canonical table name
    synonyms: BTreeMap<String, String>,
    /// longest phrases first, so "last business month" wins over "last month"
    date_aliases: Vec<IndexedDateAlias>,
    schema: Arc<SemanticSchema>,
}

impl KnowledgeIndex {
    /// Build the index. Fails with `SchemaInvalid` before any construction if
    /// the schema breaks its invariants.
    pub fn build(schema: impl Into<Arc<SemanticSchema>>) -> Result<Self> {
        let schema: Arc<SemanticSchema> = schema.into();
        schema.validate()?;

        let fingerprint = fingerprint(&schema)?;

        let tables: Vec<IndexedTable> = schema
            .tables
            .iter()
            .map(|table| {
                let synonyms = schema.synonyms.get(&table.name);
                let mut fragments: Vec<&str> = vec![table.name.as_str(), table.description.as_str()];
                if let Some(syns) = synonyms {
                    fragments.extend(syns.iter().map(|s| s.as_str()));
                }

                let columns = table
                    .columns
                    .iter()
                    .map(|column| {
                        let mut col_fragments = vec![column.name.as_str(), column.description.as_str()];
                        col_fragments.extend(column.synonyms.iter().map(|s| s.as_str()));
                        IndexedColumn {
                            name: column.name.clone(),
                            tokens: token_set(col_fragments),
                            data_type: column.data_type,
                            is_flag: column.is_flag(),
                        }
                    })
                    .collect();

                IndexedTable {
                    name: table.name.clone(),
                    tokens: token_set(fragments),
                    columns,
                }
            })
            .collect();

        let mut synonyms = BTreeMap::new();
        for (table, syns) in &schema.synonyms {
            for syn in syns {
                let key = token_sequence(syn).join(" ");
                if !key.is_empty() {
                    synonyms.insert(key, table.clone());
                }
            }
        }

        let mut date_aliases: Vec<IndexedDateAlias> = schema
            .date_aliases
            .iter()
            .map(|(name, def)| IndexedDateAlias {
                name: name.clone(),
                phrase: words(name),
                rule: def.rule.clone(),
                column: def.column.clone(),
            })
            .filter(|a| !a.phrase.is_empty())
            .collect();
        date_aliases.sort_by(|a, b| b.phrase.len().cmp(&a.phrase.len()).then_with(|| a.name.cmp(&b.name)));

        debug!(
            "Built knowledge index: {} tables, {} synonyms, {} date aliases (fingerprint {:016x})",
            tables.len(),
            synonyms.len(),
            date_aliases.len(),
            fingerprint
        );

        Ok(Self {
            fingerprint,
            tables,
            synonyms,
            date_aliases,
            schema,
        })
    }

    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    pub fn tables(&self) -> &[IndexedTable] {
        &self.tables
    }

    pub fn table(&self, name: &str) -> Option<&IndexedTable> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn date_aliases(&self) -> &[IndexedDateAlias] {
        &self.date_aliases
    }

    pub fn schema(&self) -> &SemanticSchema {
        &self.schema
    }

    pub fn schema_arc(&self) -> Arc<SemanticSchema> {
        Arc::clone(&self.schema)
    }

    /// Resolve a table name or one of its synonyms to the canonical table name
    pub fn canonical_table(&self, name: &str) -> Option<&str> {
        if let Some(t) = self.table(name) {
            return Some(t.name.as_str());
        }
        let key = token_sequence(name).join(" ");
        self.synonyms.get(&key).map(|s| s.as_str())
    }

    /// Relationships in declaration order whose two endpoints lie in `tables`
    pub fn relationships_within<'a>(
        &'a self,
        tables: &'a [String],
    ) -> impl Iterator<Item = (usize, &'a SemanticRelationship)> + 'a {
        self.schema
            .relationships
            .iter()
            .enumerate()
            .filter(move |(_, r)| tables.contains(&r.source_table) && tables.contains(&r.target_table))
    }

    /// Whether `table` is directly related to any of `selected`
    pub fn is_join_target(&self, table: &str, selected: &[String]) -> bool {
        self.schema
            .relationships
            .iter()
            .any(|r| selected.iter().any(|s| s != table && r.connects(table, s)))
    }
}

fn fingerprint(schema: &SemanticSchema) -> Result<u64> {
    let canonical = serde_json::to_string(schema)
        .map_err(|e| PilotError::SchemaInvalid(format!("Failed to serialize schema: {}", e)))?;
    let mut hasher = DefaultHasher::new();
    canonical.hash(&mut hasher);
    Ok(hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantic::{DateAliasDef, Period, SemanticColumn, SemanticTable};

    fn schema() -> SemanticSchema {
        let mut schema = SemanticSchema {
            tables: vec![
                SemanticTable::new(
                    "orders",
                    vec![
                        SemanticColumn::new("id", ColumnType::Integer),
                        SemanticColumn::new("customer_id", ColumnType::Integer),
                        SemanticColumn::new("amount", ColumnType::Decimal)
                            .with_description("Total order amount"),
                    ],
                )
                .with_description("Purchase orders"),
                SemanticTable::new("customers", vec![SemanticColumn::new("id", ColumnType::Integer)]),
            ],
            relationships: vec![SemanticRelationship::new("orders.customer_id", "customers.id").unwrap()],
            ..Default::default()
        };
        schema.synonyms.insert("customers".into(), vec!["Client Account".into()]);
        schema.date_aliases.insert(
            "last month".into(),
            DateAliasDef { rule: DateRule::PreviousPeriod { period: Period::Month }, column: None },
        );
        schema
    }

    #[test]
    fn test_build_is_deterministic() {
        let a = KnowledgeIndex::build(schema()).unwrap();
        let b = KnowledgeIndex::build(schema()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_tokens_cover_names_descriptions_and_synonyms() {
        let index = KnowledgeIndex::build(schema()).unwrap();
        let orders = index.table("orders").unwrap();
        assert!(orders.tokens.contains("purchase"));
        assert!(orders.column("amount").unwrap().tokens.contains("total"));
        assert!(orders.column("customer_id").unwrap().tokens.contains("customer"));
        assert!(index.table("customers").unwrap().tokens.contains("client"));
        assert_eq!(index.canonical_table("client account"), Some("customers"));
        assert_eq!(index.date_aliases()[0].phrase, vec!["last", "month"]);
    }

    #[test]
    fn test_schema_change_changes_fingerprint() {
        let a = KnowledgeIndex::build(schema()).unwrap();
        let mut changed = schema();
        changed.tables[1].description = "People who buy".into();
        let b = KnowledgeIndex::build(changed).unwrap();
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_invalid_schema_fails_before_build() {
        let mut bad = schema();
        bad.relationships.push(SemanticRelationship::new("orders.ghost_id", "customers.id").unwrap());
        assert!(matches!(KnowledgeIndex::build(bad), Err(PilotError::SchemaInvalid(_))));
    }
}
