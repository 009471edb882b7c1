//! Conversation persistence
//!
//! Conversation state with checkpoints, interaction records, the message
//! trace and per-chatbot efficiency scores. Calls are synchronous so state can
//! still be written from `Drop` when a turn is cancelled.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::benchmark::BenchmarkRun;
use crate::error::Result;
use crate::pipeline::{ConversationState, InteractionRecord, TraceEntry};

pub trait ConversationStore: Send + Sync {
    fn save_conversation(&self, state: &ConversationState) -> Result<()>;

    fn load_conversation(&self, conversation_id: &str) -> Result<Option<ConversationState>>;

    fn list_conversations(&self) -> Result<Vec<ConversationState>>;

    /// Remove the conversation with its interactions and trace
    fn delete_conversation(&self, conversation_id: &str) -> Result<bool>;

    /// Persist the final turn state and its interaction record together.
    /// Returns `false` (and writes nothing) when the turn was already completed.
    fn complete_turn(&self, state: &ConversationState, record: &InteractionRecord) -> Result<bool>;

    fn interactions(&self, conversation_id: &str) -> Result<Vec<InteractionRecord>>;

    fn append_trace(&self, conversation_id: &str, entry: &TraceEntry) -> Result<()>;

    fn trace(&self, conversation_id: &str) -> Result<Vec<TraceEntry>>;

    fn record_efficiency(&self, chatbot_id: &str, run: &BenchmarkRun) -> Result<()>;

    fn efficiency(&self, chatbot_id: &str) -> Result<Option<f64>>;
}
