//! Query stages
//!
//! Generation, validation, execution and explanation run behind
//! [`QueryStages`]; the state machine only sequences them.

use crate::context::ClippedContext;
use crate::error::{PilotError, Result};
use crate::execution::{QueryOutput, SqlExecutor};
use crate::intent::Extraction;
use crate::llm::{strip_code_fences, GenerationParams, LlmProvider};
use crate::prompt::{build_explain_prompt, build_sql_prompt, EXPLAIN_SYSTEM_PROMPT, SQL_SYSTEM_PROMPT};
use async_trait::async_trait;
use sqlparser::ast::Statement;
use sqlparser::dialect::SQLiteDialect;
use sqlparser::parser::Parser;
use std::sync::Arc;
use tracing::{debug, info};

#[async_trait]
pub trait QueryStages: Send + Sync {
    async fn generate(&self, question: &str, extraction: &Extraction, context: &ClippedContext) -> Result<String>;

    /// Returns the SQL to execute, or `Validation` if it must not run
    async fn validate(&self, sql: &str, context: &ClippedContext) -> Result<String>;

    async fn execute(&self, sql: &str) -> Result<QueryOutput>;

    async fn explain(&self, question: &str, sql: &str, output: &QueryOutput) -> Result<String>;
}

/// Parse `sql` and require a single read-only query
pub fn validate_read_only(sql: &str) -> Result<String> {
    let statements = Parser::parse_sql(&SQLiteDialect {}, sql)
        .map_err(|e| PilotError::Validation(format!("SQL does not parse: {}", e)))?;
    match statements.as_slice() {
        [Statement::Query(query)] => Ok(query.to_string()),
        [] => Err(PilotError::Validation("no SQL statement generated".to_string())),
        [_] => Err(PilotError::Validation("only SELECT queries may be executed".to_string())),
        many => Err(PilotError::Validation(format!(
            "expected a single statement, got {}",
            many.len()
        ))),
    }
}

pub struct LlmQueryStages {
    provider: Arc<dyn LlmProvider>,
    executor: Arc<dyn SqlExecutor>,
    params: GenerationParams,
}

impl LlmQueryStages {
    pub fn new(provider: Arc<dyn LlmProvider>, executor: Arc<dyn SqlExecutor>) -> Self {
        Self {
            provider,
            executor,
            params: GenerationParams::default(),
        }
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }
}

#[async_trait]
impl QueryStages for LlmQueryStages {
    async fn generate(&self, question: &str, extraction: &Extraction, context: &ClippedContext) -> Result<String> {
        let prompt = build_sql_prompt(question, extraction, context);
        debug!("SQL prompt:\n{}", prompt);
        let response = self.provider.complete(SQL_SYSTEM_PROMPT, &prompt, &self.params).await?;
        let sql = strip_code_fences(&response);
        if sql.is_empty() {
            return Err(PilotError::Llm("provider returned no SQL".to_string()));
        }
        info!("Generated SQL with {}", self.provider.name());
        Ok(sql)
    }

    async fn validate(&self, sql: &str, context: &ClippedContext) -> Result<String> {
        let validated = validate_read_only(sql)?;
        debug!(
            "Validated SQL against {} tables: {}",
            context.tables.len(),
            validated
        );
        Ok(validated)
    }

    async fn execute(&self, sql: &str) -> Result<QueryOutput> {
        self.executor.execute(sql).await
    }

    async fn explain(&self, question: &str, sql: &str, output: &QueryOutput) -> Result<String> {
        let prompt = build_explain_prompt(question, sql, output);
        let response = self.provider.complete(EXPLAIN_SYSTEM_PROMPT, &prompt, &self.params).await?;
        Ok(response.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::Intent;
    use std::sync::Mutex;

    struct CannedProvider {
        response: String,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LlmProvider for CannedProvider {
        fn name(&self) -> &str {
            "canned"
        }

        async fn complete(&self, _system: &str, prompt: &str, _params: &GenerationParams) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok(self.response.clone())
        }
    }

    struct NoExecutor;

    #[async_trait]
    impl SqlExecutor for NoExecutor {
        fn name(&self) -> &'static str {
            "none"
        }

        async fn execute(&self, _sql: &str) -> Result<QueryOutput> {
            Ok(QueryOutput::default())
        }

        async fn health_check(&self) -> Result<bool> {
            Ok(true)
        }
    }

    fn extraction() -> Extraction {
        Extraction {
            intent: Intent {
                tables: vec!["orders".to_string()],
                ..Default::default()
            },
            confidence: 1.0,
            table_scores: vec![("orders".to_string(), 1.0)],
            limit: None,
            aggregations: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_generate_strips_fences_from_provider_output() {
        let provider = Arc::new(CannedProvider {
            response: "```sql\nSELECT id FROM orders\n```".to_string(),
            prompts: Mutex::new(Vec::new()),
        });
        let stages = LlmQueryStages::new(provider.clone(), Arc::new(NoExecutor));

        let sql = stages
            .generate("list orders", &extraction(), &ClippedContext::default())
            .await
            .unwrap();
        assert_eq!(sql, "SELECT id FROM orders");
        assert!(provider.prompts.lock().unwrap()[0].contains("list orders"));
    }

    #[tokio::test]
    async fn test_empty_generation_is_a_provider_error() {
        let provider = Arc::new(CannedProvider {
            response: "   ".to_string(),
            prompts: Mutex::new(Vec::new()),
        });
        let stages = LlmQueryStages::new(provider, Arc::new(NoExecutor));
        let err = stages
            .generate("list orders", &extraction(), &ClippedContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PilotError::Llm(_)));
    }

    #[test]
    fn test_validate_read_only() {
        let sql = validate_read_only("select id from orders where amount > 100").unwrap();
        assert_eq!(sql, "SELECT id FROM orders WHERE amount > 100");

        assert!(matches!(
            validate_read_only("DELETE FROM orders"),
            Err(PilotError::Validation(_))
        ));
        assert!(matches!(
            validate_read_only("SELECT 1; DROP TABLE orders"),
            Err(PilotError::Validation(_))
        ));
        assert!(matches!(validate_read_only("SELEC id"), Err(PilotError::Validation(_))));
        assert!(matches!(validate_read_only(""), Err(PilotError::Validation(_))));
    }
}
