//! Prompts for SQL generation and result explanation

use crate::context::ClippedContext;
use crate::execution::QueryOutput;
use crate::intent::{Aggregation, Extraction, SortDirection};

/// System prompt for the SQL generation stage
pub const SQL_SYSTEM_PROMPT: &str = r#"You are a SQL generator for an analytics database (SQLite dialect).

Write exactly ONE read-only SELECT statement that answers the user's question.

Rules:
- Use only the tables, columns and relationships listed in the schema context.
- Join tables only along the listed relationships.
- Apply every required filter, date range, ordering and limit you are given.
- Flag columns hold booleans: compare them with the literals TRUE or FALSE, never with descriptive text such as 'active', 'Y' or 'yes'.
- Never modify data (no INSERT, UPDATE, DELETE, DDL).
- Return only the SQL, with no explanation and no markdown."#;

/// System prompt for the explanation stage
pub const EXPLAIN_SYSTEM_PROMPT: &str = r#"You explain query results to business users.
Answer in two or three plain sentences. Mention the numbers that matter and any filters or date ranges that were applied. Do not show SQL."#;

/// Maximum result rows quoted back to the model when explaining
const EXPLAIN_SAMPLE_ROWS: usize = 20;

fn aggregation_sql(function: Aggregation) -> &'static str {
    match function {
        Aggregation::Sum => "SUM",
        Aggregation::Avg => "AVG",
        Aggregation::Count => "COUNT",
        Aggregation::Max => "MAX",
        Aggregation::Min => "MIN",
    }
}

pub fn build_sql_prompt(question: &str, extraction: &Extraction, context: &ClippedContext) -> String {
    let intent = &extraction.intent;
    let mut parts = Vec::new();

    parts.push(format!("USER QUESTION: {}", question));
    parts.push("\nSCHEMA CONTEXT:".to_string());

    for table in &context.tables {
        if table.description.is_empty() {
            parts.push(format!("- table {}", table.name));
        } else {
            parts.push(format!("- table {}: {}", table.name, table.description));
        }
        for column in &table.columns {
            let mut line = format!("    - {} ({})", column.name, column.data_type);
            if column.is_flag() {
                line.push_str(" [flag: TRUE/FALSE]");
            }
            if !column.description.is_empty() {
                line.push_str(&format!(": {}", column.description));
            }
            parts.push(line);
        }
    }

    if !context.relationships.is_empty() {
        parts.push("\nRELATIONSHIPS:".to_string());
        for rel in &context.relationships {
            parts.push(format!("- {}", rel));
        }
    }

    if !intent.columns.is_empty() {
        let columns: Vec<String> = intent.columns.iter().map(|c| c.to_string()).collect();
        parts.push(format!("\nRELEVANT COLUMNS: {}", columns.join(", ")));
    }

    if !intent.filters.is_empty() {
        parts.push("\nREQUIRED FILTERS:".to_string());
        for filter in &intent.filters {
            parts.push(format!("- {} {} {}", filter.column, filter.operator.as_sql(), filter.value));
        }
    }

    for alias in &context.date_aliases {
        let column = alias
            .column
            .as_ref()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "the relevant date column".to_string());
        parts.push(format!(
            "\nDATE RANGE (\"{}\"): {} BETWEEN '{}' AND '{}' (inclusive)",
            alias.name, column, alias.start, alias.end
        ));
    }

    if !extraction.aggregations.is_empty() {
        let hints: Vec<String> = extraction
            .aggregations
            .iter()
            .map(|a| match &a.column {
                Some(c) => format!("{}({})", aggregation_sql(a.function), c),
                None => format!("{}(*)", aggregation_sql(a.function)),
            })
            .collect();
        parts.push(format!("\nAGGREGATIONS: {}", hints.join(", ")));
    }

    if !intent.order_by.is_empty() {
        let order: Vec<String> = intent
            .order_by
            .iter()
            .map(|o| {
                let dir = match o.direction {
                    SortDirection::Asc => "ASC",
                    SortDirection::Desc => "DESC",
                };
                format!("{} {}", o.column, dir)
            })
            .collect();
        parts.push(format!("\nORDER BY: {}", order.join(", ")));
    }

    if let Some(limit) = extraction.limit {
        parts.push(format!("LIMIT: {}", limit));
    }

    let flags = context.flag_columns();
    if !flags.is_empty() {
        let names: Vec<String> = flags.iter().map(|c| c.to_string()).collect();
        parts.push(format!(
            "\nFLAG COLUMNS ({}) must be compared with TRUE or FALSE, never with text.",
            names.join(", ")
        ));
    }

    parts.push("\nReturn only the SQL.".to_string());
    parts.join("\n")
}

pub fn build_explain_prompt(question: &str, sql: &str, output: &QueryOutput) -> String {
    let mut parts = Vec::new();
    parts.push(format!("QUESTION: {}", question));
    parts.push(format!("SQL:\n{}", sql));
    parts.push(format!(
        "RESULT: {} row(s){}, columns: {}",
        output.rows.len(),
        if output.truncated { " (truncated)" } else { "" },
        output.columns.join(", ")
    ));
    for row in output.rows.iter().take(EXPLAIN_SAMPLE_ROWS) {
        parts.push(serde_json::Value::Array(row.clone()).to_string());
    }
    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ClippedTable;
    use crate::intent::{ColumnRef, Filter, FilterOperator, FilterValue, Intent};
    use crate::semantic::{ColumnType, SemanticColumn};

    #[test]
    fn test_flag_filter_rendered_as_literal_boolean() {
        let context = ClippedContext {
            tables: vec![ClippedTable {
                name: "customers".into(),
                description: "Customer accounts".into(),
                columns: vec![
                    SemanticColumn::new("id", ColumnType::Integer),
                    SemanticColumn::new("is_active", ColumnType::Boolean).with_description("Active customer"),
                ],
            }],
            ..Default::default()
        };
        let extraction = Extraction {
            intent: Intent {
                tables: vec!["customers".into()],
                filters: vec![Filter {
                    column: ColumnRef::new("customers", "is_active"),
                    operator: FilterOperator::Eq,
                    value: FilterValue::Bool(false),
                }],
                ..Default::default()
            },
            confidence: 1.0,
            table_scores: vec![],
            limit: Some(5),
            aggregations: vec![],
        };
        let prompt = build_sql_prompt("inactive customers", &extraction, &context);
        assert!(prompt.contains("customers.is_active = FALSE"));
        assert!(prompt.contains("FLAG COLUMNS (customers.is_active)"));
        assert!(prompt.contains("LIMIT: 5"));
        assert!(SQL_SYSTEM_PROMPT.contains("TRUE or FALSE"));
    }
}
