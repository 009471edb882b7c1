//! SQLite conversation store
//!
//! Architecture: a single `rusqlite` connection behind a mutex. Conversation
//! state is stored as JSON alongside the indexed columns used for lookups;
//! turn completion is one transaction keyed by turn id.

use crate::benchmark::BenchmarkRun;
use crate::db::ConversationStore;
use crate::error::{ErrorKind, PilotError, Result};
use crate::pipeline::{ConversationState, InteractionRecord, Outcome, TraceEntry};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::info;

pub struct SqliteStore {
    db: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the store at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db = Connection::open(path)
            .map_err(|e| PilotError::Storage(format!("Failed to open database {}: {}", path.display(), e)))?;
        let store = Self { db: Mutex::new(db) };
        store.init_schema()?;
        info!("Opened conversation store at {}", path.display());
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let db = Connection::open_in_memory()
            .map_err(|e| PilotError::Storage(format!("Failed to open in-memory database: {}", e)))?;
        let store = Self { db: Mutex::new(db) };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|_| PilotError::Storage("database lock poisoned".to_string()))
    }

    fn init_schema(&self) -> Result<()> {
        let db = self.conn()?;
        db.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                conversation_id TEXT PRIMARY KEY,
                chatbot_id TEXT NOT NULL,
                step TEXT NOT NULL,
                interaction_count INTEGER NOT NULL,
                state TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS interactions (
                turn_id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL,
                chatbot_id TEXT NOT NULL,
                question TEXT NOT NULL,
                sql TEXT,
                explanation TEXT,
                outcome TEXT NOT NULL,
                error_kind TEXT,
                error_message TEXT,
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS trace_entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id TEXT NOT NULL,
                turn_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                entry TEXT NOT NULL,
                recorded_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS chatbot_efficiency (
                chatbot_id TEXT PRIMARY KEY,
                total INTEGER NOT NULL,
                correct INTEGER NOT NULL,
                efficiency REAL NOT NULL,
                recorded_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_interactions_conversation ON interactions(conversation_id);
            CREATE INDEX IF NOT EXISTS idx_trace_conversation ON trace_entries(conversation_id);
            "#,
        )
        .map_err(|e| PilotError::Storage(format!("Failed to create tables: {}", e)))?;
        Ok(())
    }
}

fn write_state(db: &Connection, state: &ConversationState) -> Result<()> {
    let json = serde_json::to_string(state)?;
    db.execute(
        r#"
        INSERT INTO conversations (conversation_id, chatbot_id, step, interaction_count, state, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        ON CONFLICT(conversation_id) DO UPDATE SET
            step = excluded.step,
            interaction_count = excluded.interaction_count,
            state = excluded.state,
            updated_at = excluded.updated_at
        "#,
        params![
            state.conversation_id,
            state.chatbot_id,
            state.step.as_str(),
            state.interaction_count,
            json,
            state.created_at.to_rfc3339(),
            state.updated_at.to_rfc3339(),
        ],
    )
    .map_err(|e| PilotError::Storage(format!("Failed to save conversation: {}", e)))?;
    Ok(())
}

fn parse_state(json: String) -> Result<ConversationState> {
    serde_json::from_str(&json)
        .map_err(|e| PilotError::Storage(format!("Corrupt conversation state: {}", e)))
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| PilotError::Storage(format!("Invalid timestamp '{}': {}", raw, e)))
}

/// Raw interaction row; enum and timestamp columns are parsed afterwards
struct InteractionRow {
    turn_id: String,
    conversation_id: String,
    chatbot_id: String,
    question: String,
    sql: Option<String>,
    explanation: Option<String>,
    outcome: String,
    error_kind: Option<String>,
    error_message: Option<String>,
    created_at: String,
}

impl InteractionRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            turn_id: row.get(0)?,
            conversation_id: row.get(1)?,
            chatbot_id: row.get(2)?,
            question: row.get(3)?,
            sql: row.get(4)?,
            explanation: row.get(5)?,
            outcome: row.get(6)?,
            error_kind: row.get(7)?,
            error_message: row.get(8)?,
            created_at: row.get(9)?,
        })
    }

    fn into_record(self) -> Result<InteractionRecord> {
        let outcome = Outcome::parse(&self.outcome)
            .ok_or_else(|| PilotError::Storage(format!("Unknown outcome '{}'", self.outcome)))?;
        let error_kind = match self.error_kind {
            Some(kind) => Some(
                ErrorKind::parse(&kind).ok_or_else(|| PilotError::Storage(format!("Unknown error kind '{}'", kind)))?,
            ),
            None => None,
        };
        Ok(InteractionRecord {
            created_at: parse_time(&self.created_at)?,
            turn_id: self.turn_id,
            conversation_id: self.conversation_id,
            chatbot_id: self.chatbot_id,
            question: self.question,
            sql: self.sql,
            explanation: self.explanation,
            outcome,
            error_kind,
            error_message: self.error_message,
        })
    }
}

impl ConversationStore for SqliteStore {
    fn save_conversation(&self, state: &ConversationState) -> Result<()> {
        let db = self.conn()?;
        write_state(&db, state)
    }

    fn load_conversation(&self, conversation_id: &str) -> Result<Option<ConversationState>> {
        let db = self.conn()?;
        let json: Option<String> = db
            .query_row(
                "SELECT state FROM conversations WHERE conversation_id = ?1",
                params![conversation_id],
                |row| row.get(0),
            )
            .optional()?;
        json.map(parse_state).transpose()
    }

    fn list_conversations(&self) -> Result<Vec<ConversationState>> {
        let db = self.conn()?;
        let mut stmt = db.prepare("SELECT state FROM conversations ORDER BY created_at, conversation_id")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter().map(parse_state).collect()
    }

    fn delete_conversation(&self, conversation_id: &str) -> Result<bool> {
        let mut db = self.conn()?;
        let tx = db.transaction()?;
        let removed = tx.execute(
            "DELETE FROM conversations WHERE conversation_id = ?1",
            params![conversation_id],
        )?;
        tx.execute("DELETE FROM interactions WHERE conversation_id = ?1", params![conversation_id])?;
        tx.execute("DELETE FROM trace_entries WHERE conversation_id = ?1", params![conversation_id])?;
        tx.commit()?;
        Ok(removed > 0)
    }

    fn complete_turn(&self, state: &ConversationState, record: &InteractionRecord) -> Result<bool> {
        let mut db = self.conn()?;
        let tx = db
            .transaction()
            .map_err(|e| PilotError::Storage(format!("Failed to start transaction: {}", e)))?;

        let inserted = tx
            .execute(
                r#"
                INSERT OR IGNORE INTO interactions
                (turn_id, conversation_id, chatbot_id, question, sql, explanation, outcome, error_kind, error_message, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                "#,
                params![
                    record.turn_id,
                    record.conversation_id,
                    record.chatbot_id,
                    record.question,
                    record.sql,
                    record.explanation,
                    record.outcome.as_str(),
                    record.error_kind.map(|k| k.as_str()),
                    record.error_message,
                    record.created_at.to_rfc3339(),
                ],
            )
            .map_err(|e| PilotError::Storage(format!("Failed to insert interaction: {}", e)))?;
        if inserted == 0 {
            return Ok(false);
        }

        write_state(&tx, state)?;
        tx.commit()
            .map_err(|e| PilotError::Storage(format!("Failed to commit transaction: {}", e)))?;
        Ok(true)
    }

    fn interactions(&self, conversation_id: &str) -> Result<Vec<InteractionRecord>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            r#"
            SELECT turn_id, conversation_id, chatbot_id, question, sql, explanation, outcome, error_kind, error_message, created_at
            FROM interactions WHERE conversation_id = ?1 ORDER BY created_at, rowid
            "#,
        )?;
        let rows = stmt
            .query_map(params![conversation_id], InteractionRow::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter().map(InteractionRow::into_record).collect()
    }

    fn append_trace(&self, conversation_id: &str, entry: &TraceEntry) -> Result<()> {
        let json = serde_json::to_string(entry)?;
        let db = self.conn()?;
        db.execute(
            "INSERT INTO trace_entries (conversation_id, turn_id, kind, entry, recorded_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                conversation_id,
                entry.turn_id,
                entry.record.kind(),
                json,
                entry.recorded_at.to_rfc3339(),
            ],
        )
        .map_err(|e| PilotError::Storage(format!("Failed to append trace entry: {}", e)))?;
        Ok(())
    }

    fn trace(&self, conversation_id: &str) -> Result<Vec<TraceEntry>> {
        let db = self.conn()?;
        let mut stmt = db.prepare("SELECT entry FROM trace_entries WHERE conversation_id = ?1 ORDER BY id")?;
        let rows = stmt
            .query_map(params![conversation_id], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.iter()
            .map(|json| serde_json::from_str(json).map_err(PilotError::from))
            .collect()
    }

    fn record_efficiency(&self, chatbot_id: &str, run: &BenchmarkRun) -> Result<()> {
        let db = self.conn()?;
        db.execute(
            r#"
            INSERT INTO chatbot_efficiency (chatbot_id, total, correct, efficiency, recorded_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(chatbot_id) DO UPDATE SET
                total = excluded.total,
                correct = excluded.correct,
                efficiency = excluded.efficiency,
                recorded_at = excluded.recorded_at
            "#,
            params![
                chatbot_id,
                run.total as i64,
                run.correct as i64,
                run.efficiency,
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(|e| PilotError::Storage(format!("Failed to record efficiency: {}", e)))?;
        Ok(())
    }

    fn efficiency(&self, chatbot_id: &str) -> Result<Option<f64>> {
        let db = self.conn()?;
        Ok(db
            .query_row(
                "SELECT efficiency FROM chatbot_efficiency WHERE chatbot_id = ?1",
                params![chatbot_id],
                |row| row.get(0),
            )
            .optional()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{Step, TraceRecord, TurnCheckpoint};
    use tempfile::TempDir;

    fn record(state: &ConversationState, turn_id: &str, outcome: Outcome) -> InteractionRecord {
        InteractionRecord {
            turn_id: turn_id.into(),
            conversation_id: state.conversation_id.clone(),
            chatbot_id: state.chatbot_id.clone(),
            question: "total orders".into(),
            sql: Some("SELECT COUNT(*) FROM orders".into()),
            explanation: None,
            outcome,
            error_kind: (outcome == Outcome::Failed).then_some(ErrorKind::Execution),
            error_message: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_state_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pilot.db");

        let mut state = ConversationState::new("bot", 10);
        state.checkpoint = Some(TurnCheckpoint::new("total orders"));
        state.enter(Step::ClippingContext);
        {
            let store = SqliteStore::open(&path).unwrap();
            store.save_conversation(&state).unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        let loaded = store.load_conversation(&state.conversation_id).unwrap().unwrap();
        assert_eq!(loaded, state);
        assert_eq!(store.list_conversations().unwrap().len(), 1);
        assert!(store.load_conversation("missing").unwrap().is_none());
    }

    #[test]
    fn test_complete_turn_once() {
        let store = SqliteStore::in_memory().unwrap();
        let mut state = ConversationState::new("bot", 10);
        store.save_conversation(&state).unwrap();

        state.interaction_count = 1;
        assert!(store.complete_turn(&state, &record(&state, "t1", Outcome::Succeeded)).unwrap());
        state.interaction_count = 2;
        assert!(!store.complete_turn(&state, &record(&state, "t1", Outcome::Succeeded)).unwrap());
        assert!(store.complete_turn(&state, &record(&state, "t2", Outcome::Failed)).unwrap());

        let loaded = store.load_conversation(&state.conversation_id).unwrap().unwrap();
        assert_eq!(loaded.interaction_count, 2);
        let records = store.interactions(&state.conversation_id).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].error_kind, Some(ErrorKind::Execution));
    }

    #[test]
    fn test_trace_and_efficiency() {
        let store = SqliteStore::in_memory().unwrap();
        let state = ConversationState::new("bot", 10);
        store.save_conversation(&state).unwrap();
        store
            .append_trace(&state.conversation_id, &TraceEntry::new("t1", TraceRecord::Question("q".into())))
            .unwrap();
        store
            .append_trace(&state.conversation_id, &TraceEntry::new("t1", TraceRecord::Sql("SELECT 1".into())))
            .unwrap();
        let trace = store.trace(&state.conversation_id).unwrap();
        assert_eq!(trace.len(), 2);
        assert_eq!(trace[1].record, TraceRecord::Sql("SELECT 1".into()));

        let run = BenchmarkRun {
            total: 10,
            correct: 7,
            efficiency: 0.7,
            cases: Vec::new(),
        };
        store.record_efficiency("bot", &run).unwrap();
        assert_eq!(store.efficiency("bot").unwrap(), Some(0.7));
        assert_eq!(store.efficiency("other").unwrap(), None);

        assert!(store.delete_conversation(&state.conversation_id).unwrap());
        assert!(store.trace(&state.conversation_id).unwrap().is_empty());
    }
}
