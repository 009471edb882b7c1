#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDate;
use querypilot::config::PipelineConfig;
use querypilot::context::ClippedContext;
use querypilot::error::{PilotError, Result};
use querypilot::execution::QueryOutput;
use querypilot::intent::Extraction;
use querypilot::pipeline::QueryStages;
use querypilot::semantic::{
    ColumnType, DateAliasDef, DateRule, SemanticColumn, SemanticRelationship, SemanticSchema, SemanticTable,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

pub const CHATBOT: &str = "shop";

/// orders(id, customer_id, amount, status, created_at) -> customers(id, name, is_active)
pub fn shop_schema() -> SemanticSchema {
    let mut schema = SemanticSchema {
        tables: vec![
            SemanticTable::new(
                "orders",
                vec![
                    SemanticColumn::new("id", ColumnType::Integer),
                    SemanticColumn::new("customer_id", ColumnType::Integer),
                    SemanticColumn::new("amount", ColumnType::Decimal).with_description("Total order amount"),
                    SemanticColumn::new("status", ColumnType::Text),
                    SemanticColumn::new("created_at", ColumnType::Timestamp),
                ],
            )
            .with_description("Orders placed in the shop"),
            SemanticTable::new(
                "customers",
                vec![
                    SemanticColumn::new("id", ColumnType::Integer),
                    SemanticColumn::new("name", ColumnType::Text),
                    SemanticColumn::new("is_active", ColumnType::Boolean),
                ],
            ),
        ],
        relationships: vec![SemanticRelationship::new("orders.customer_id", "customers.id").unwrap()],
        ..Default::default()
    };
    schema.synonyms.insert("customers".into(), vec!["customer".into()]);
    schema.date_aliases.insert(
        "last month".into(),
        DateAliasDef {
            rule: DateRule::Fixed {
                start: NaiveDate::from_ymd_opt(2025, 2, 1).unwrap(),
                end: NaiveDate::from_ymd_opt(2025, 2, 28).unwrap(),
            },
            column: None,
        },
    );
    schema
}

pub fn test_config() -> PipelineConfig {
    PipelineConfig {
        provider_timeout_secs: 5,
        retry_backoff_ms: 1,
        reference_date: NaiveDate::from_ymd_opt(2025, 3, 14),
        ..Default::default()
    }
}

type SqlFn = Box<dyn Fn(&str, &Extraction) -> String + Send + Sync>;

/// Scripted stages: SQL comes from `sql_for`, the first `timeouts` generate
/// calls time out, and generation waits on `gate` when one is set
pub struct FakeStages {
    sql_for: SqlFn,
    timeouts: AtomicU32,
    pub generate_calls: AtomicU32,
    pub gate: Option<Arc<Notify>>,
    pub fail_execute: bool,
}

impl FakeStages {
    pub fn new() -> Self {
        Self::with_sql(|_, extraction| format!("SELECT * FROM {}", extraction.intent.tables.join(", ")))
    }

    pub fn with_sql<F>(f: F) -> Self
    where
        F: Fn(&str, &Extraction) -> String + Send + Sync + 'static,
    {
        Self {
            sql_for: Box::new(f),
            timeouts: AtomicU32::new(0),
            generate_calls: AtomicU32::new(0),
            gate: None,
            fail_execute: false,
        }
    }

    pub fn timing_out(self, times: u32) -> Self {
        self.timeouts.store(times, Ordering::SeqCst);
        self
    }

    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn failing_execute(mut self) -> Self {
        self.fail_execute = true;
        self
    }

    pub fn calls(&self) -> u32 {
        self.generate_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueryStages for FakeStages {
    async fn generate(&self, question: &str, extraction: &Extraction, _context: &ClippedContext) -> Result<String> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        let remaining = self.timeouts.load(Ordering::SeqCst);
        if remaining > 0 {
            self.timeouts.store(remaining - 1, Ordering::SeqCst);
            return Err(PilotError::ProviderTimeout("scripted timeout".into()));
        }
        Ok((self.sql_for)(question, extraction))
    }

    async fn validate(&self, sql: &str, _context: &ClippedContext) -> Result<String> {
        querypilot::pipeline::validate_read_only(sql)
    }

    async fn execute(&self, _sql: &str) -> Result<QueryOutput> {
        if self.fail_execute {
            return Err(PilotError::Execution("no such table: orders".into()));
        }
        Ok(QueryOutput {
            columns: vec!["n".into()],
            rows: vec![vec![serde_json::json!(1)]],
            truncated: false,
            execution_time_ms: 0,
        })
    }

    async fn explain(&self, _question: &str, _sql: &str, output: &QueryOutput) -> Result<String> {
        Ok(format!("{} row(s)", output.rows.len()))
    }
}

/// Poll `check` until it holds or a second passes
pub async fn wait_until<F: Fn() -> bool>(check: F) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}
