//! Context Clipper
//!
//! Narrows an intent to the minimal, self-contained schema subset handed to
//! query generation, with a hard cap on relationships to bound prompt size.

use crate::error::{PilotError, Result};
use crate::intent::{ColumnRef, Intent};
use crate::knowledge::KnowledgeIndex;
use crate::semantic::{DateRule, SemanticColumn, SemanticRelationship};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClippedTable {
    pub name: String,
    pub description: String,
    pub columns: Vec<SemanticColumn>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClippedDateAlias {
    pub name: String,
    pub rule: DateRule,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub column: Option<ColumnRef>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClippedContext {
    pub tables: Vec<ClippedTable>,
    pub relationships: Vec<SemanticRelationship>,
    pub date_aliases: Vec<ClippedDateAlias>,
}

impl ClippedContext {
    pub fn table(&self, name: &str) -> Option<&ClippedTable> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn has_column(&self, column: &ColumnRef) -> bool {
        self.table(&column.table)
            .map_or(false, |t| t.columns.iter().any(|c| c.name == column.column))
    }

    /// Boolean-like business flags present in the context
    pub fn flag_columns(&self) -> Vec<ColumnRef> {
        self.tables
            .iter()
            .flat_map(|t| {
                t.columns
                    .iter()
                    .filter(|c| c.is_flag())
                    .map(move |c| ColumnRef::new(&t.name, &c.name))
            })
            .collect()
    }
}

pub struct ContextClipper {
    max_relationships: usize,
}

impl ContextClipper {
    pub fn new(max_relationships: usize) -> Self {
        Self { max_relationships }
    }

    pub fn max_relationships(&self) -> usize {
        self.max_relationships
    }

    pub fn clip(&self, intent: &Intent, index: &KnowledgeIndex) -> Result<ClippedContext> {
        clip(intent, index, self.max_relationships)
    }
}

/// Resolve an intent against the schema behind `index`
pub fn clip(intent: &Intent, index: &KnowledgeIndex, max_relationships: usize) -> Result<ClippedContext> {
    let schema = index.schema();

    let canonical = |name: &str| -> Result<String> {
        index
            .canonical_table(name)
            .map(|s| s.to_string())
            .ok_or_else(|| PilotError::ContextIncomplete(format!("table '{}' is not in the schema", name)))
    };

    // Step 1: full column metadata for every selected table
    let mut names: Vec<String> = Vec::new();
    for name in &intent.tables {
        let name = canonical(name)?;
        if !names.contains(&name) {
            names.push(name);
        }
    }
    if names.is_empty() {
        return Err(PilotError::ContextIncomplete("intent selects no tables".to_string()));
    }

    let tables: Vec<ClippedTable> = names
        .iter()
        .filter_map(|n| schema.table(n))
        .map(|t| ClippedTable {
            name: t.name.clone(),
            description: t.description.clone(),
            columns: t.columns.clone(),
        })
        .collect();

    // Step 4 (checked first): every reference resolves inside `tables`
    let mut referenced: HashSet<ColumnRef> = HashSet::new();
    for column in intent.referenced_columns() {
        let table = canonical(&column.table)?;
        if !names.contains(&table) {
            return Err(PilotError::ContextIncomplete(format!(
                "{} references table '{}' outside the selected tables",
                column, table
            )));
        }
        if schema.column(&table, &column.column).is_none() {
            return Err(PilotError::ContextIncomplete(format!(
                "column {} does not exist",
                column
            )));
        }
        referenced.insert(ColumnRef::new(table, column.column.clone()));
    }
    let mut joined: Vec<(String, String)> = Vec::new();
    for join in &intent.joins {
        let left = canonical(&join.left)?;
        let right = canonical(&join.right)?;
        for side in [&left, &right] {
            if !names.contains(side) {
                return Err(PilotError::ContextIncomplete(format!(
                    "join {} <-> {} leaves the selected tables",
                    join.left, join.right
                )));
            }
        }
        joined.push((left, right));
    }

    // Step 2: qualifying relationships, ranked then capped
    let mut candidates: Vec<(usize, usize, &SemanticRelationship)> = index
        .relationships_within(&names)
        .map(|(pos, rel)| {
            let mut rank = 0;
            if referenced.contains(&ColumnRef::new(&rel.source_table, &rel.source_column)) {
                rank += 1;
            }
            if referenced.contains(&ColumnRef::new(&rel.target_table, &rel.target_column)) {
                rank += 1;
            }
            if joined.iter().any(|(l, r)| rel.connects(l, r)) {
                rank += 1;
            }
            (pos, rank, rel)
        })
        .collect();
    let qualifying = candidates.len();
    candidates.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    candidates.truncate(max_relationships);
    candidates.sort_by_key(|(pos, _, _)| *pos);
    if qualifying > max_relationships {
        info!(
            "Clipped relationships from {} to {} (max_relationships)",
            qualifying, max_relationships
        );
    }
    let relationships: Vec<SemanticRelationship> = candidates.into_iter().map(|(_, _, r)| r.clone()).collect();

    // Step 3: only the date alias the intent actually resolved
    let mut date_aliases = Vec::new();
    if let Some(range) = &intent.date_range {
        let def = schema.date_aliases.get(&range.alias).ok_or_else(|| {
            PilotError::ContextIncomplete(format!("date alias '{}' is not in the schema", range.alias))
        })?;
        date_aliases.push(ClippedDateAlias {
            name: range.alias.clone(),
            rule: def.rule.clone(),
            start: range.start,
            end: range.end,
            column: range.column.clone(),
        });
    }

    debug!(
        "Clipped context: {} tables, {} relationships, {} date aliases",
        tables.len(),
        relationships.len(),
        date_aliases.len()
    );

    Ok(ClippedContext {
        tables,
        relationships,
        date_aliases,
    })
}
