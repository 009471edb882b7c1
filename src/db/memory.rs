//! In-memory conversation store

use crate::benchmark::BenchmarkRun;
use crate::db::ConversationStore;
use crate::error::{PilotError, Result};
use crate::pipeline::{ConversationState, InteractionRecord, TraceEntry};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct Inner {
    conversations: HashMap<String, ConversationState>,
    interactions: Vec<InteractionRecord>,
    completed_turns: HashSet<String>,
    /// Trace entries kept serialized so reads re-parse them like the SQLite store
    trace: HashMap<String, Vec<String>>,
    efficiency: HashMap<String, f64>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| PilotError::Storage("memory store lock poisoned".to_string()))
    }
}

impl ConversationStore for MemoryStore {
    fn save_conversation(&self, state: &ConversationState) -> Result<()> {
        self.lock()?
            .conversations
            .insert(state.conversation_id.clone(), state.clone());
        Ok(())
    }

    fn load_conversation(&self, conversation_id: &str) -> Result<Option<ConversationState>> {
        Ok(self.lock()?.conversations.get(conversation_id).cloned())
    }

    fn list_conversations(&self) -> Result<Vec<ConversationState>> {
        let mut all: Vec<ConversationState> = self.lock()?.conversations.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(all)
    }

    fn delete_conversation(&self, conversation_id: &str) -> Result<bool> {
        let mut inner = self.lock()?;
        let existed = inner.conversations.remove(conversation_id).is_some();
        inner.interactions.retain(|r| r.conversation_id != conversation_id);
        inner.trace.remove(conversation_id);
        Ok(existed)
    }

    fn complete_turn(&self, state: &ConversationState, record: &InteractionRecord) -> Result<bool> {
        let mut inner = self.lock()?;
        if !inner.completed_turns.insert(record.turn_id.clone()) {
            return Ok(false);
        }
        inner.interactions.push(record.clone());
        inner
            .conversations
            .insert(state.conversation_id.clone(), state.clone());
        Ok(true)
    }

    fn interactions(&self, conversation_id: &str) -> Result<Vec<InteractionRecord>> {
        Ok(self
            .lock()?
            .interactions
            .iter()
            .filter(|r| r.conversation_id == conversation_id)
            .cloned()
            .collect())
    }

    fn append_trace(&self, conversation_id: &str, entry: &TraceEntry) -> Result<()> {
        let json = serde_json::to_string(entry)?;
        self.lock()?
            .trace
            .entry(conversation_id.to_string())
            .or_default()
            .push(json);
        Ok(())
    }

    fn trace(&self, conversation_id: &str) -> Result<Vec<TraceEntry>> {
        let inner = self.lock()?;
        let Some(entries) = inner.trace.get(conversation_id) else {
            return Ok(Vec::new());
        };
        entries
            .iter()
            .map(|json| serde_json::from_str(json).map_err(PilotError::from))
            .collect()
    }

    fn record_efficiency(&self, chatbot_id: &str, run: &BenchmarkRun) -> Result<()> {
        self.lock()?.efficiency.insert(chatbot_id.to_string(), run.efficiency);
        Ok(())
    }

    fn efficiency(&self, chatbot_id: &str) -> Result<Option<f64>> {
        Ok(self.lock()?.efficiency.get(chatbot_id).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{Outcome, TraceRecord};
    use chrono::Utc;

    fn record(state: &ConversationState, turn_id: &str) -> InteractionRecord {
        InteractionRecord {
            turn_id: turn_id.into(),
            conversation_id: state.conversation_id.clone(),
            chatbot_id: state.chatbot_id.clone(),
            question: "q".into(),
            sql: None,
            explanation: None,
            outcome: Outcome::Succeeded,
            error_kind: None,
            error_message: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_complete_turn_is_idempotent() {
        let store = MemoryStore::new();
        let mut state = ConversationState::new("bot", 10);
        store.save_conversation(&state).unwrap();

        state.interaction_count = 1;
        assert!(store.complete_turn(&state, &record(&state, "t1")).unwrap());
        state.interaction_count = 2;
        assert!(!store.complete_turn(&state, &record(&state, "t1")).unwrap());

        let loaded = store.load_conversation(&state.conversation_id).unwrap().unwrap();
        assert_eq!(loaded.interaction_count, 1);
        assert_eq!(store.interactions(&state.conversation_id).unwrap().len(), 1);
    }

    #[test]
    fn test_delete_removes_trace() {
        let store = MemoryStore::new();
        let state = ConversationState::new("bot", 10);
        store.save_conversation(&state).unwrap();
        store
            .append_trace(&state.conversation_id, &TraceEntry::new("t1", TraceRecord::Question("q".into())))
            .unwrap();
        assert_eq!(store.trace(&state.conversation_id).unwrap().len(), 1);
        assert!(store.delete_conversation(&state.conversation_id).unwrap());
        assert!(store.trace(&state.conversation_id).unwrap().is_empty());
        assert!(!store.delete_conversation(&state.conversation_id).unwrap());
    }
}
