//! Intent Extractor
//!
//! Scores every indexed table and column against the question, keeps the
//! ones above threshold (capped), then layers on date ranges, comparison,
//! ordering and aggregation keywords, and boolean flag filters.

use crate::config::ExtractionConfig;
use crate::error::{PilotError, Result};
use crate::intent::scorer::{RelevanceScorer, TokenOverlapScorer};
use crate::intent::types::{
    Aggregation, AggregationHint, ColumnRef, DateRange, Extraction, Filter, FilterOperator,
    FilterValue, Intent, Join, OrderBy, SortDirection,
};
use crate::knowledge::tokenizer::{contains_phrase, token_sequence, tokenize, words};
use crate::knowledge::{IndexedColumn, IndexedTable, KnowledgeIndex};
use chrono::{NaiveDate, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

lazy_static! {
    static ref COMPARISON: Regex = Regex::new(
        r"\b(more than|greater than|exceeding|over|above|at least|less than|fewer than|under|below|at most)\s+\$?(\d+(?:\.\d+)?)"
    )
    .unwrap();
    static ref TOP_N: Regex = Regex::new(r"\b(top|highest|largest|biggest)\b(?:\s+(\d+))?").unwrap();
    static ref BOTTOM_N: Regex = Regex::new(r"\b(bottom|lowest|smallest)\b(?:\s+(\d+))?").unwrap();
    static ref NEWEST: Regex = Regex::new(r"\b(latest|most recent|newest)\b").unwrap();
    static ref OLDEST: Regex = Regex::new(r"\b(oldest|earliest)\b").unwrap();
    static ref AGGREGATIONS: Vec<(Aggregation, Regex)> = vec![
        (Aggregation::Sum, Regex::new(r"\b(total|sum)\b").unwrap()),
        (Aggregation::Avg, Regex::new(r"\b(average|avg|mean)\b").unwrap()),
        (Aggregation::Count, Regex::new(r"\b(count|number of|how many)\b").unwrap()),
        (Aggregation::Max, Regex::new(r"\b(maximum|max)\b").unwrap()),
        (Aggregation::Min, Regex::new(r"\b(minimum|min)\b").unwrap()),
    ];
}

pub struct IntentExtractor {
    config: ExtractionConfig,
    scorer: Arc<dyn RelevanceScorer>,
    reference_date: Option<NaiveDate>,
}

impl IntentExtractor {
    pub fn new(config: ExtractionConfig) -> Self {
        Self {
            config,
            scorer: Arc::new(TokenOverlapScorer),
            reference_date: None,
        }
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn RelevanceScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    /// Pin the date relative aliases resolve against
    pub fn with_reference_date(mut self, date: Option<NaiveDate>) -> Self {
        self.reference_date = date;
        self
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// Extract a structured intent. A question that matches no table fails
    /// with `NoIntentMatch`; an empty intent is never returned.
    pub fn extract(&self, question: &str, index: &KnowledgeIndex) -> Result<Extraction> {
        let sequence = words(question);
        let tokens = tokenize(question);
        let lowered = question.to_lowercase();

        // Step 1-2: score every table (own tokens plus its columns)
        let mut scored: Vec<(usize, &IndexedTable, f64)> = index
            .tables()
            .iter()
            .enumerate()
            .map(|(pos, t)| (pos, t, self.scorer.score_table(&tokens, t)))
            .collect();

        if scored.iter().all(|(_, _, s)| *s <= 0.0) {
            debug!("No table scored for question '{}' ({} tokens)", question, tokens.len());
            return Err(no_match(question));
        }

        // Step 3: threshold, rank, cap
        scored.retain(|(_, _, s)| *s > self.config.min_table_score);
        scored.sort_by(|a, b| by_score_then_position((a.2, a.0), (b.2, b.0)));
        scored.truncate(self.config.max_tables);
        if scored.is_empty() {
            return Err(no_match(question));
        }

        let table_scores: Vec<(String, f64)> = scored.iter().map(|(_, t, s)| (t.name.clone(), *s)).collect();
        let tables: Vec<String> = scored.iter().map(|(_, t, _)| t.name.clone()).collect();
        let mut matched: HashSet<String> = HashSet::new();

        // Step 4: columns per selected table
        let mut columns = Vec::new();
        for (_, table, _) in &scored {
            note_matches(&mut matched, self.scorer.matches(&tokens, &table.tokens));

            let mut col_scores: Vec<(usize, &IndexedColumn, f64)> = table
                .columns
                .iter()
                .enumerate()
                .map(|(pos, c)| (pos, c, self.scorer.score_column(&tokens, c)))
                .filter(|(_, _, s)| *s > self.config.min_column_score)
                .collect();
            col_scores.sort_by(|a, b| by_score_then_position((a.2, a.0), (b.2, b.0)));
            col_scores.truncate(self.config.max_columns_per_table);

            for (_, column, _) in col_scores {
                note_matches(&mut matched, self.scorer.matches(&tokens, &column.tokens));
                columns.push(ColumnRef::new(&table.name, &column.name));
            }
        }

        // Step 5a: date aliases resolve to a concrete interval
        let today = self.reference_date.unwrap_or_else(|| Utc::now().date_naive());
        let mut date_range = None;
        if let Some(alias) = index
            .date_aliases()
            .iter()
            .find(|a| contains_phrase(&sequence, &a.phrase))
        {
            let (start, end) = alias.rule.resolve(today)?;
            let column = match alias.column.as_deref() {
                Some(c) => ColumnRef::try_from(c.to_string()).ok(),
                None => best_temporal_column(index, &tables, &columns),
            };
            matched.extend(alias.phrase.iter().cloned());
            date_range = Some(DateRange {
                alias: alias.name.clone(),
                start,
                end,
                column,
            });
        }

        // Step 5b: comparison keywords become provisional filters
        let mut filters = Vec::new();
        for caps in COMPARISON.captures_iter(&lowered) {
            let operator = match &caps[1] {
                "at least" => FilterOperator::Gte,
                "at most" => FilterOperator::Lte,
                "less than" | "fewer than" | "under" | "below" => FilterOperator::Lt,
                _ => FilterOperator::Gt,
            };
            let Ok(value) = caps[2].parse::<f64>() else {
                continue;
            };
            if let Some(column) = best_numeric_column(index, &tables, &columns) {
                filters.push(Filter {
                    column,
                    operator,
                    value: FilterValue::Number(value),
                });
            }
        }

        // Step 5c: ordering and limit hints
        let mut order_by = Vec::new();
        let mut limit = None;
        let ranking = TOP_N
            .captures(&lowered)
            .map(|c| (c, SortDirection::Desc))
            .or_else(|| BOTTOM_N.captures(&lowered).map(|c| (c, SortDirection::Asc)));
        if let Some((caps, direction)) = ranking {
            limit = caps.get(2).and_then(|m| m.as_str().parse::<u32>().ok());
            if let Some(column) = best_numeric_column(index, &tables, &columns) {
                order_by.push(OrderBy { column, direction });
            }
        }
        let recency = if NEWEST.is_match(&lowered) {
            Some(SortDirection::Desc)
        } else if OLDEST.is_match(&lowered) {
            Some(SortDirection::Asc)
        } else {
            None
        };
        if let Some(direction) = recency {
            let column = date_range
                .as_ref()
                .and_then(|d| d.column.clone())
                .or_else(|| best_temporal_column(index, &tables, &columns));
            if let Some(column) = column {
                order_by.push(OrderBy { column, direction });
            }
        }

        let aggregations: Vec<AggregationHint> = AGGREGATIONS
            .iter()
            .filter(|(_, re)| re.is_match(&lowered))
            .map(|(function, _)| AggregationHint {
                function: *function,
                column: match function {
                    Aggregation::Count => None,
                    _ => best_numeric_column(index, &tables, &columns),
                },
            })
            .collect();

        // Step 6: flags filter on the literal boolean, never on description text
        for table in index.tables() {
            for column in table.columns.iter().filter(|c| c.is_flag) {
                let Some(flag_token) = token_sequence(&column.name).into_iter().find(|t| t != "flag") else {
                    continue;
                };
                if let Some(value) = flag_mention(&sequence, &flag_token) {
                    let column_ref = ColumnRef::new(&table.name, &column.name);
                    if filters.iter().any(|f: &Filter| f.column == column_ref) {
                        continue;
                    }
                    matched.insert(flag_token.clone());
                    filters.push(Filter {
                        column: column_ref,
                        operator: FilterOperator::Eq,
                        value: FilterValue::Bool(value),
                    });
                }
            }
        }

        // Step 7: every reference must land inside `tables`
        let mut intent = Intent {
            tables,
            columns,
            filters,
            joins: Vec::new(),
            order_by,
            date_range,
        };
        reconcile_references(&mut intent, index);
        intent.joins = derive_joins(&intent.tables, index);

        let confidence = if tokens.is_empty() {
            0.0
        } else {
            let hits = tokens.iter().filter(|t| matched.contains(t.as_str())).count();
            hits as f64 / tokens.len() as f64
        };

        info!(
            "Extracted intent: tables={:?}, {} columns, {} filters, {} joins (confidence {:.2}, scorer {})",
            intent.tables,
            intent.columns.len(),
            intent.filters.len(),
            intent.joins.len(),
            confidence,
            self.scorer.name()
        );

        Ok(Extraction {
            intent,
            confidence,
            table_scores,
            limit,
            aggregations,
        })
    }
}

fn no_match(question: &str) -> PilotError {
    PilotError::NoIntentMatch {
        question: question.to_string(),
    }
}

fn by_score_then_position(a: (f64, usize), b: (f64, usize)) -> Ordering {
    b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal).then(a.1.cmp(&b.1))
}

fn note_matches(matched: &mut HashSet<String>, hits: Vec<(&str, f64)>) {
    matched.extend(hits.into_iter().map(|(t, _)| t.to_string()));
}

fn is_key_column(name: &str) -> bool {
    let n = name.to_lowercase();
    n == "id" || n.ends_with("_id")
}

/// Prefer a selected column, else the first candidate in the highest ranked table
fn best_column<F>(index: &KnowledgeIndex, tables: &[String], columns: &[ColumnRef], accept: F) -> Option<ColumnRef>
where
    F: Fn(&IndexedColumn) -> bool,
{
    let selected = columns.iter().find(|c| {
        index
            .table(&c.table)
            .and_then(|t| t.column(&c.column))
            .map_or(false, &accept)
    });
    if let Some(c) = selected {
        return Some(c.clone());
    }
    tables.iter().find_map(|t| {
        index
            .table(t)
            .and_then(|it| it.columns.iter().find(|c| accept(c)))
            .map(|c| ColumnRef::new(t, &c.name))
    })
}

fn best_numeric_column(index: &KnowledgeIndex, tables: &[String], columns: &[ColumnRef]) -> Option<ColumnRef> {
    best_column(index, tables, columns, |c| c.data_type.is_numeric() && !is_key_column(&c.name))
}

fn best_temporal_column(index: &KnowledgeIndex, tables: &[String], columns: &[ColumnRef]) -> Option<ColumnRef> {
    best_column(index, tables, columns, |c| c.data_type.is_temporal())
}

/// `Some(true)` for "active", `Some(false)` for "inactive" / "not active" /
/// "non-active", `None` if absent. Negators may sit up to two words before the flag.
fn flag_mention(sequence: &[String], flag_token: &str) -> Option<bool> {
    const NEGATORS: [&str; 4] = ["not", "non", "no", "without"];
    let negated_forms = [
        format!("in{}", flag_token),
        format!("un{}", flag_token),
        format!("non{}", flag_token),
    ];
    if sequence.iter().any(|w| negated_forms.contains(w)) {
        return Some(false);
    }
    let positions: Vec<usize> = sequence
        .iter()
        .enumerate()
        .filter(|(_, w)| w.as_str() == flag_token)
        .map(|(i, _)| i)
        .collect();
    if positions.is_empty() {
        return None;
    }
    let negated = positions
        .iter()
        .any(|&i| sequence[i.saturating_sub(2)..i].iter().any(|w| NEGATORS.contains(&w.as_str())));
    Some(!negated)
}

/// Add genuine join targets, drop references that cannot be satisfied
fn reconcile_references(intent: &mut Intent, index: &KnowledgeIndex) {
    let outside: Vec<String> = intent
        .referenced_tables()
        .into_iter()
        .filter(|t| !intent.has_table(t))
        .map(|t| t.to_string())
        .collect();

    for table in outside {
        if index.table(&table).is_some() && index.is_join_target(&table, &intent.tables) {
            info!("Adding join target '{}' referenced by the intent", table);
            intent.tables.push(table);
            continue;
        }
        warn!("Dropping references to '{}': not selected and not joinable", table);
        intent.columns.retain(|c| c.table != table);
        intent.filters.retain(|f| f.column.table != table);
        intent.order_by.retain(|o| o.column.table != table);
        intent.joins.retain(|j| j.left != table && j.right != table);
        if let Some(range) = intent.date_range.as_mut() {
            if range.column.as_ref().map_or(false, |c| c.table == table) {
                range.column = None;
            }
        }
    }
}

fn derive_joins(tables: &[String], index: &KnowledgeIndex) -> Vec<Join> {
    let mut joins: Vec<Join> = Vec::new();
    for (_, rel) in index.relationships_within(tables) {
        if rel.source_table == rel.target_table {
            continue;
        }
        if joins.iter().any(|j| j.involves(&rel.source_table, &rel.target_table)) {
            continue;
        }
        joins.push(Join {
            left: rel.source_table.clone(),
            right: rel.target_table.clone(),
        });
    }
    joins
}
