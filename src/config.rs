//! Pipeline configuration
//!
//! Defaults, optionally overridden by a JSON file and then by `QUERYPILOT_*`
//! environment variables (a `.env` file is honored).

use crate::error::{PilotError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Selection thresholds and caps for intent extraction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Tables must score strictly above this (0.0 = any overlap)
    pub min_table_score: f64,
    pub max_tables: usize,
    /// Columns must score strictly above this
    pub min_column_score: f64,
    pub max_columns_per_table: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            min_table_score: 0.0,
            max_tables: 5,
            min_column_score: 0.0,
            max_columns_per_table: 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub extraction: ExtractionConfig,
    pub max_relationships: usize,
    pub interaction_cap: u32,
    /// Status responses include the remaining allowance once this close to the cap
    pub near_cap_threshold: u32,
    pub provider_timeout_secs: u64,
    /// Retries after the first attempt when the provider times out
    pub provider_max_retries: u32,
    pub retry_backoff_ms: u64,
    pub max_result_rows: usize,
    pub database_path: Option<PathBuf>,
    /// Anchor for relative date aliases; today (UTC) when unset
    pub reference_date: Option<NaiveDate>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            extraction: ExtractionConfig::default(),
            max_relationships: 10,
            interaction_cap: 10,
            near_cap_threshold: 2,
            provider_timeout_secs: 30,
            provider_max_retries: 2,
            retry_backoff_ms: 250,
            max_result_rows: 500,
            database_path: None,
            reference_date: None,
        }
    }
}

impl PipelineConfig {
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    /// File (if given) then environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenv::dotenv().ok();
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.check()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            PilotError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&contents)
            .map_err(|e| PilotError::Config(format!("Failed to parse config file {}: {}", path.display(), e)))
    }

    /// Apply `QUERYPILOT_*` overrides from an environment lookup
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(key: &str, raw: String) -> Result<T> {
            raw.trim()
                .parse()
                .map_err(|_| PilotError::Config(format!("Invalid value '{}' for {}", raw, key)))
        }

        if let Some(v) = lookup("QUERYPILOT_MAX_TABLES") {
            self.extraction.max_tables = parse("QUERYPILOT_MAX_TABLES", v)?;
        }
        if let Some(v) = lookup("QUERYPILOT_MAX_COLUMNS_PER_TABLE") {
            self.extraction.max_columns_per_table = parse("QUERYPILOT_MAX_COLUMNS_PER_TABLE", v)?;
        }
        if let Some(v) = lookup("QUERYPILOT_MIN_TABLE_SCORE") {
            self.extraction.min_table_score = parse("QUERYPILOT_MIN_TABLE_SCORE", v)?;
        }
        if let Some(v) = lookup("QUERYPILOT_MIN_COLUMN_SCORE") {
            self.extraction.min_column_score = parse("QUERYPILOT_MIN_COLUMN_SCORE", v)?;
        }
        if let Some(v) = lookup("QUERYPILOT_MAX_RELATIONSHIPS") {
            self.max_relationships = parse("QUERYPILOT_MAX_RELATIONSHIPS", v)?;
        }
        if let Some(v) = lookup("QUERYPILOT_INTERACTION_CAP") {
            self.interaction_cap = parse("QUERYPILOT_INTERACTION_CAP", v)?;
        }
        if let Some(v) = lookup("QUERYPILOT_PROVIDER_TIMEOUT_SECS") {
            self.provider_timeout_secs = parse("QUERYPILOT_PROVIDER_TIMEOUT_SECS", v)?;
        }
        if let Some(v) = lookup("QUERYPILOT_PROVIDER_MAX_RETRIES") {
            self.provider_max_retries = parse("QUERYPILOT_PROVIDER_MAX_RETRIES", v)?;
        }
        if let Some(v) = lookup("QUERYPILOT_DATABASE_PATH") {
            self.database_path = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("QUERYPILOT_REFERENCE_DATE") {
            self.reference_date = Some(parse("QUERYPILOT_REFERENCE_DATE", v)?);
        }
        debug!("Effective pipeline config: {:?}", self);
        Ok(())
    }

    pub fn check(&self) -> Result<()> {
        if self.extraction.max_tables == 0 {
            return Err(PilotError::Config("max_tables must be at least 1".to_string()));
        }
        if self.extraction.max_columns_per_table == 0 {
            return Err(PilotError::Config("max_columns_per_table must be at least 1".to_string()));
        }
        if self.interaction_cap == 0 {
            return Err(PilotError::Config("interaction_cap must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.interaction_cap, 10);
        assert_eq!(config.max_relationships, 10);
        assert_eq!(config.extraction.min_table_score, 0.0);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"interaction_cap": 3, "extraction": {"max_tables": 2}}"#).unwrap();
        assert_eq!(config.interaction_cap, 3);
        assert_eq!(config.extraction.max_tables, 2);
        assert_eq!(config.extraction.max_columns_per_table, 8);
        assert_eq!(config.max_relationships, 10);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("QUERYPILOT_INTERACTION_CAP", "4"),
            ("QUERYPILOT_REFERENCE_DATE", "2025-03-15"),
        ]
        .into_iter()
        .collect();
        let mut config = PipelineConfig::default();
        config.apply_env(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.interaction_cap, 4);
        assert_eq!(config.reference_date, NaiveDate::from_ymd_opt(2025, 3, 15));

        let mut config = PipelineConfig::default();
        let err = config.apply_env(|k| (k == "QUERYPILOT_MAX_TABLES").then(|| "many".to_string()));
        assert!(matches!(err, Err(PilotError::Config(_))));
    }
}
