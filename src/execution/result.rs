//! Query Output - row-capped result of executing validated SQL

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QueryOutput {
    pub columns: Vec<String>,
    /// Row values in column order
    pub rows: Vec<Vec<serde_json::Value>>,
    /// More rows were available than the executor's row cap
    pub truncated: bool,
    pub execution_time_ms: u64,
}

impl QueryOutput {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows as column-name keyed JSON objects
    pub fn to_records(&self) -> Vec<serde_json::Map<String, serde_json::Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect()
            })
            .collect()
    }
}
