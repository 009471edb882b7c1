use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PilotError {
    #[error("Schema invalid: {0}")]
    SchemaInvalid(String),

    #[error("No schema objects matched the question \"{question}\"; please rephrase")]
    NoIntentMatch { question: String },

    #[error("Context incomplete: {0}")]
    ContextIncomplete(String),

    #[error("Interaction limit reached for conversation {conversation_id} ({cap} interactions)")]
    CapacityExceeded { conversation_id: String, cap: u32 },

    #[error("LLM provider timed out: {0}")]
    ProviderTimeout(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Conversation {0} is already processing a turn")]
    ConversationBusy(String),

    #[error("Unknown chatbot: {0}")]
    UnknownChatbot(String),

    #[error("Unknown conversation: {0}")]
    UnknownConversation(String),

    #[error("Benchmark error: {0}")]
    Benchmark(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, PilotError>;

/// Failure taxonomy recorded on interaction records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    SchemaInvalid,
    NoIntentMatch,
    ContextIncomplete,
    CapacityExceeded,
    ProviderTimeout,
    Provider,
    Validation,
    Execution,
    Busy,
    Cancelled,
    Internal,
}

impl ErrorKind {
    /// Whether the same request may succeed if submitted again unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::ProviderTimeout | ErrorKind::Provider | ErrorKind::Busy | ErrorKind::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::SchemaInvalid => "schema_invalid",
            ErrorKind::NoIntentMatch => "no_intent_match",
            ErrorKind::ContextIncomplete => "context_incomplete",
            ErrorKind::CapacityExceeded => "capacity_exceeded",
            ErrorKind::ProviderTimeout => "provider_timeout",
            ErrorKind::Provider => "provider",
            ErrorKind::Validation => "validation",
            ErrorKind::Execution => "execution",
            ErrorKind::Busy => "busy",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        }
    }

    pub fn parse(s: &str) -> Option<ErrorKind> {
        let kind = match s {
            "schema_invalid" => ErrorKind::SchemaInvalid,
            "no_intent_match" => ErrorKind::NoIntentMatch,
            "context_incomplete" => ErrorKind::ContextIncomplete,
            "capacity_exceeded" => ErrorKind::CapacityExceeded,
            "provider_timeout" => ErrorKind::ProviderTimeout,
            "provider" => ErrorKind::Provider,
            "validation" => ErrorKind::Validation,
            "execution" => ErrorKind::Execution,
            "busy" => ErrorKind::Busy,
            "cancelled" => ErrorKind::Cancelled,
            "internal" => ErrorKind::Internal,
            _ => return None,
        };
        Some(kind)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PilotError {
    /// Classify this error for interaction records and status reporting.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PilotError::SchemaInvalid(_) => ErrorKind::SchemaInvalid,
            PilotError::NoIntentMatch { .. } => ErrorKind::NoIntentMatch,
            PilotError::ContextIncomplete(_) => ErrorKind::ContextIncomplete,
            PilotError::CapacityExceeded { .. } => ErrorKind::CapacityExceeded,
            PilotError::ProviderTimeout(_) => ErrorKind::ProviderTimeout,
            PilotError::Llm(_) => ErrorKind::Provider,
            PilotError::Validation(_) => ErrorKind::Validation,
            PilotError::Execution(_) => ErrorKind::Execution,
            PilotError::ConversationBusy(_) => ErrorKind::Busy,
            _ => ErrorKind::Internal,
        }
    }
}
