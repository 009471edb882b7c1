//! Message trace
//!
//! Append-only log of what each turn produced. Intent records are stored in
//! their exact serialized form so they can be parsed back and re-clipped.

use crate::context::{clip, ClippedContext};
use crate::error::{ErrorKind, Result};
use crate::execution::QueryOutput;
use crate::intent::Intent;
use crate::knowledge::KnowledgeIndex;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum TraceRecord {
    Question(String),
    Intent(Intent),
    ClippedContext(ClippedContext),
    Sql(String),
    Result(QueryOutput),
    Explanation(String),
    Error { kind: ErrorKind, message: String },
}

impl TraceRecord {
    pub fn kind(&self) -> &'static str {
        match self {
            TraceRecord::Question(_) => "question",
            TraceRecord::Intent(_) => "intent",
            TraceRecord::ClippedContext(_) => "clipped_context",
            TraceRecord::Sql(_) => "sql",
            TraceRecord::Result(_) => "result",
            TraceRecord::Explanation(_) => "explanation",
            TraceRecord::Error { .. } => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub turn_id: String,
    pub recorded_at: DateTime<Utc>,
    pub record: TraceRecord,
}

impl TraceEntry {
    pub fn new(turn_id: impl Into<String>, record: TraceRecord) -> Self {
        Self {
            turn_id: turn_id.into(),
            recorded_at: Utc::now(),
            record,
        }
    }
}

/// Most recent intent record in the trace
pub fn last_intent(entries: &[TraceEntry]) -> Option<&Intent> {
    entries.iter().rev().find_map(|e| match &e.record {
        TraceRecord::Intent(intent) => Some(intent),
        _ => None,
    })
}

/// Clip the most recent intent in the trace against `index`
pub fn replay(entries: &[TraceEntry], index: &KnowledgeIndex, max_relationships: usize) -> Result<Option<ClippedContext>> {
    match last_intent(entries) {
        Some(intent) => clip(intent, index, max_relationships).map(Some),
        None => Ok(None),
    }
}
