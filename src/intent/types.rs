//! Intent types
//!
//! Structured extraction of a question. The serialized `Intent` carries
//! exactly `tables, columns, filters, joins, order_by, date_range` so it can be
//! appended to a message trace and parsed back without re-running extraction.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Fully-qualified column reference, serialized as `"table.column"`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ColumnRef {
    pub table: String,
    pub column: String,
}

impl ColumnRef {
    pub fn new(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
        }
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.table, self.column)
    }
}

impl TryFrom<String> for ColumnRef {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.split_once('.') {
            Some((t, c)) if !t.is_empty() && !c.is_empty() => Ok(ColumnRef::new(t, c)),
            _ => Err(format!("'{}' is not a table.column reference", value)),
        }
    }
}

impl From<ColumnRef> for String {
    fn from(value: ColumnRef) -> Self {
        value.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOperator {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    NotEq,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Lte,
}

impl FilterOperator {
    pub fn as_sql(&self) -> &'static str {
        match self {
            FilterOperator::Eq => "=",
            FilterOperator::NotEq => "!=",
            FilterOperator::Gt => ">",
            FilterOperator::Gte => ">=",
            FilterOperator::Lt => "<",
            FilterOperator::Lte => "<=",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl fmt::Display for FilterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterValue::Bool(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            FilterValue::Number(n) => write!(f, "{}", n),
            FilterValue::Text(s) => write!(f, "'{}'", s.replace('\'', "''")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub column: ColumnRef,
    pub operator: FilterOperator,
    pub value: FilterValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Join {
    pub left: String,
    pub right: String,
}

impl Join {
    pub fn involves(&self, a: &str, b: &str) -> bool {
        (self.left == a && self.right == b) || (self.left == b && self.right == a)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub column: ColumnRef,
    pub direction: SortDirection,
}

/// Resolved interval for a date alias (never the literal phrase)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub alias: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    #[serde(default)]
    pub column: Option<ColumnRef>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Intent {
    pub tables: Vec<String>,
    pub columns: Vec<ColumnRef>,
    pub filters: Vec<Filter>,
    pub joins: Vec<Join>,
    pub order_by: Vec<OrderBy>,
    pub date_range: Option<DateRange>,
}

impl Intent {
    /// Every table mentioned anywhere in the intent, tables list included
    pub fn referenced_tables(&self) -> BTreeSet<&str> {
        let mut out: BTreeSet<&str> = self.tables.iter().map(|t| t.as_str()).collect();
        out.extend(self.columns.iter().map(|c| c.table.as_str()));
        out.extend(self.filters.iter().map(|f| f.column.table.as_str()));
        out.extend(self.order_by.iter().map(|o| o.column.table.as_str()));
        for join in &self.joins {
            out.insert(join.left.as_str());
            out.insert(join.right.as_str());
        }
        if let Some(col) = self.date_range.as_ref().and_then(|d| d.column.as_ref()) {
            out.insert(col.table.as_str());
        }
        out
    }

    /// Column references the query must be able to resolve
    pub fn referenced_columns(&self) -> Vec<&ColumnRef> {
        let mut out: Vec<&ColumnRef> = self.columns.iter().collect();
        out.extend(self.filters.iter().map(|f| &f.column));
        out.extend(self.order_by.iter().map(|o| &o.column));
        if let Some(col) = self.date_range.as_ref().and_then(|d| d.column.as_ref()) {
            out.push(col);
        }
        out
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.tables.iter().any(|t| t == table)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    Sum,
    Avg,
    Count,
    Max,
    Min,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationHint {
    pub function: Aggregation,
    pub column: Option<ColumnRef>,
}

/// Extractor output: the intent plus generation hints that are not part of
/// the intent record itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    pub intent: Intent,
    /// Share of question tokens matched by the selected schema objects (0.0–1.0)
    pub confidence: f64,
    pub table_scores: Vec<(String, f64)>,
    pub limit: Option<u32>,
    pub aggregations: Vec<AggregationHint>,
}
