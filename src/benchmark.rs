//! Benchmark Engine
//!
//! Replays (question, expected SQL) pairs through extraction, clipping and
//! generation, and scores the chatbot as `correct / total` over normalized
//! SQL comparisons.

use crate::config::PipelineConfig;
use crate::context::ContextClipper;
use crate::db::ConversationStore;
use crate::error::{PilotError, Result};
use crate::intent::IntentExtractor;
use crate::knowledge::{KnowledgeIndex, KnowledgeStore};
use crate::pipeline::{with_provider_retry, QueryStages, RetryPolicy};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use sqlparser::ast::{BinaryOperator, Expr, SetExpr, Statement};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub question: String,
    pub expected_sql: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseResult {
    pub question: String,
    pub expected_sql: String,
    pub generated_sql: Option<String>,
    pub correct: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkRun {
    pub total: usize,
    pub correct: usize,
    pub efficiency: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cases: Vec<CaseResult>,
}

/// Load cases from `.json` (array of `{question, expected_sql}`) or `.csv`
/// (`question,expected_sql` header)
pub fn load_cases(path: impl AsRef<Path>) -> Result<Vec<TestCase>> {
    let path = path.as_ref();
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("csv") => {
            let mut reader = csv::Reader::from_path(path)?;
            let cases = reader
                .deserialize::<TestCase>()
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(cases)
        }
        _ => {
            let contents = std::fs::read_to_string(path)?;
            serde_json::from_str(&contents).map_err(|e| {
                PilotError::Benchmark(format!("Failed to parse test cases {}: {}", path.display(), e))
            })
        }
    }
}

fn collapse(sql: &str) -> String {
    sql.split_whitespace()
        .join(" ")
        .trim_end_matches(|c: char| c == ';' || c.is_whitespace())
        .to_lowercase()
}

fn split_conjuncts(expr: Expr, out: &mut Vec<Expr>) {
    match expr {
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            split_conjuncts(*left, out);
            split_conjuncts(*right, out);
        }
        other => out.push(other),
    }
}

/// Canonical form used to compare generated and expected SQL.
///
/// Parsed SQL is re-rendered, its SELECT items and top-level `AND` conjuncts
/// sorted; anything unparseable falls back to whitespace/case folding.
pub fn normalize_sql(sql: &str) -> String {
    let trimmed = sql.trim().trim_end_matches(';');
    let mut statements = match Parser::parse_sql(&GenericDialect {}, trimmed) {
        Ok(statements) if statements.len() == 1 => statements,
        _ => return collapse(trimmed),
    };

    if let Statement::Query(query) = &mut statements[0] {
        if let SetExpr::Select(select) = query.body.as_mut() {
            select
                .projection
                .sort_by_cached_key(|item| item.to_string().to_lowercase());
            if let Some(selection) = select.selection.take() {
                let mut conjuncts = Vec::new();
                split_conjuncts(selection, &mut conjuncts);
                conjuncts.sort_by_cached_key(|e| e.to_string().to_lowercase());
                select.selection = conjuncts.into_iter().reduce(|left, right| Expr::BinaryOp {
                    left: Box::new(left),
                    op: BinaryOperator::And,
                    right: Box::new(right),
                });
            }
        }
    }
    collapse(&statements[0].to_string())
}

pub fn sql_matches(generated: &str, expected: &str) -> bool {
    normalize_sql(generated) == normalize_sql(expected)
}

pub struct BenchmarkEngine {
    extractor: IntentExtractor,
    clipper: ContextClipper,
    stages: Arc<dyn QueryStages>,
    retry: RetryPolicy,
}

impl BenchmarkEngine {
    pub fn new(config: &PipelineConfig, stages: Arc<dyn QueryStages>) -> Self {
        Self {
            extractor: IntentExtractor::new(config.extraction.clone()).with_reference_date(config.reference_date),
            clipper: ContextClipper::new(config.max_relationships),
            stages,
            retry: RetryPolicy::from_config(config),
        }
    }

    pub fn with_extractor(mut self, extractor: IntentExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    async fn generate(&self, question: &str, index: &KnowledgeIndex) -> Result<String> {
        let extraction = self.extractor.extract(question, index)?;
        let context = self.clipper.clip(&extraction.intent, index)?;
        with_provider_retry(&self.retry, "generating", || {
            self.stages.generate(question, &extraction, &context)
        })
        .await
    }

    /// Score every case; a case that fails to generate counts as incorrect
    pub async fn run(&self, index: &KnowledgeIndex, cases: &[TestCase]) -> Result<BenchmarkRun> {
        if cases.is_empty() {
            return Err(PilotError::Benchmark("benchmark has no test cases".to_string()));
        }

        let mut results = Vec::with_capacity(cases.len());
        for (i, case) in cases.iter().enumerate() {
            let result = match self.generate(&case.question, index).await {
                Ok(sql) => {
                    let correct = sql_matches(&sql, &case.expected_sql);
                    debug!("Case {}: correct={} sql={}", i + 1, correct, sql);
                    CaseResult {
                        question: case.question.clone(),
                        expected_sql: case.expected_sql.clone(),
                        generated_sql: Some(sql),
                        correct,
                        error: None,
                    }
                }
                Err(e) => {
                    warn!("Case {} ({}) failed: {}", i + 1, case.question, e);
                    CaseResult {
                        question: case.question.clone(),
                        expected_sql: case.expected_sql.clone(),
                        generated_sql: None,
                        correct: false,
                        error: Some(e.to_string()),
                    }
                }
            };
            results.push(result);
        }

        let total = results.len();
        let correct = results.iter().filter(|r| r.correct).count();
        let efficiency = correct as f64 / total as f64;
        info!("Benchmark: {}/{} correct (efficiency {:.3})", correct, total, efficiency);
        Ok(BenchmarkRun {
            total,
            correct,
            efficiency,
            cases: results,
        })
    }

    /// Run against the chatbot's current index and persist its efficiency score
    pub async fn run_and_record(
        &self,
        chatbot_id: &str,
        knowledge: &KnowledgeStore,
        store: &dyn ConversationStore,
        cases: &[TestCase],
    ) -> Result<BenchmarkRun> {
        let index = knowledge.require(chatbot_id)?;
        let run = self.run(&index, cases).await?;
        store.record_efficiency(chatbot_id, &run)?;
        Ok(run)
    }
}
