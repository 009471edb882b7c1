//! Conversation Pipeline
//!
//! Sequences a turn through
//! `extracting_intent → clipping_context → generating → validating →
//! executing → explaining → done`, persisting a checkpoint on every
//! transition so a restarted process resumes a turn at its checkpointed step.
//! Any stage failure moves the conversation to `failed` with the original
//! error kind recorded.

use crate::config::PipelineConfig;
use crate::context::{ClippedContext, ContextClipper};
use crate::db::ConversationStore;
use crate::error::{ErrorKind, PilotError, Result};
use crate::execution::QueryOutput;
use crate::intent::IntentExtractor;
use crate::knowledge::{KnowledgeIndex, KnowledgeStore};
use crate::pipeline::retry::{with_provider_retry, RetryPolicy};
use crate::pipeline::stages::QueryStages;
use crate::pipeline::state::{
    ConversationState, InteractionRecord, Outcome, StatusReport, Step, TurnCheckpoint,
};
use crate::pipeline::trace::{self, TraceEntry, TraceRecord};
use chrono::Utc;
use dashmap::DashSet;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Result of a turn that reached `done`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnOutcome {
    pub conversation_id: String,
    pub turn_id: String,
    pub sql: String,
    pub output: QueryOutput,
    pub explanation: String,
    pub status: StatusReport,
}

/// Marks a conversation as in flight for the lifetime of one turn.
///
/// If the turn future is dropped before finishing, the last persisted state
/// is kept when at least one stage completed (so `resume` can continue it),
/// otherwise the conversation is marked failed as cancelled.
struct TurnGuard {
    store: Arc<dyn ConversationStore>,
    in_flight: Arc<DashSet<String>>,
    conversation_id: String,
    last_saved: Option<ConversationState>,
    finished: bool,
}

impl TurnGuard {
    fn save(&mut self, state: &ConversationState) -> Result<()> {
        self.store.save_conversation(state)?;
        self.last_saved = Some(state.clone());
        Ok(())
    }

    fn finish(&mut self) {
        self.finished = true;
    }
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        if !self.finished {
            if let Some(mut state) = self.last_saved.take() {
                let completed = state
                    .checkpoint
                    .as_ref()
                    .map_or(false, |c| c.has_completed_stage());
                if completed {
                    info!(
                        "Turn in conversation {} interrupted at {}; checkpoint kept",
                        self.conversation_id, state.step
                    );
                } else {
                    state.fail(ErrorKind::Cancelled, "Turn cancelled before any stage completed");
                    if let Err(e) = self.store.save_conversation(&state) {
                        error!("Failed to record cancellation of {}: {}", self.conversation_id, e);
                    }
                }
            }
        }
        self.in_flight.remove(&self.conversation_id);
    }
}

pub struct Pipeline {
    config: PipelineConfig,
    knowledge: Arc<KnowledgeStore>,
    store: Arc<dyn ConversationStore>,
    stages: Arc<dyn QueryStages>,
    extractor: IntentExtractor,
    clipper: ContextClipper,
    retry: RetryPolicy,
    in_flight: Arc<DashSet<String>>,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        knowledge: Arc<KnowledgeStore>,
        store: Arc<dyn ConversationStore>,
        stages: Arc<dyn QueryStages>,
    ) -> Self {
        let extractor =
            IntentExtractor::new(config.extraction.clone()).with_reference_date(config.reference_date);
        Self {
            clipper: ContextClipper::new(config.max_relationships),
            retry: RetryPolicy::from_config(&config),
            extractor,
            config,
            knowledge,
            store,
            stages,
            in_flight: Arc::new(DashSet::new()),
        }
    }

    /// Replace the default extractor (e.g. to use a fuzzy scorer)
    pub fn with_extractor(mut self, extractor: IntentExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn knowledge(&self) -> &Arc<KnowledgeStore> {
        &self.knowledge
    }

    pub fn start_conversation(&self, chatbot_id: &str) -> Result<ConversationState> {
        self.knowledge.require(chatbot_id)?;
        let state = ConversationState::new(chatbot_id, self.config.interaction_cap);
        self.store.save_conversation(&state)?;
        info!("Started conversation {} for chatbot {}", state.conversation_id, chatbot_id);
        Ok(state)
    }

    pub fn status(&self, conversation_id: &str) -> Result<StatusReport> {
        let state = self.load(conversation_id)?;
        Ok(StatusReport::from_state(&state, self.config.near_cap_threshold))
    }

    pub fn trace(&self, conversation_id: &str) -> Result<Vec<TraceEntry>> {
        self.load(conversation_id)?;
        self.store.trace(conversation_id)
    }

    /// Re-clip the latest intent recorded in the conversation's trace
    pub fn replay(&self, conversation_id: &str) -> Result<Option<ClippedContext>> {
        let state = self.load(conversation_id)?;
        let index = self.knowledge.require(&state.chatbot_id)?;
        let entries = self.store.trace(conversation_id)?;
        trace::replay(&entries, &index, self.config.max_relationships)
    }

    pub fn interactions(&self, conversation_id: &str) -> Result<Vec<InteractionRecord>> {
        self.load(conversation_id)?;
        self.store.interactions(conversation_id)
    }

    pub fn delete_conversation(&self, conversation_id: &str) -> Result<()> {
        if self.in_flight.contains(conversation_id) {
            return Err(PilotError::ConversationBusy(conversation_id.to_string()));
        }
        if !self.store.delete_conversation(conversation_id)? {
            return Err(PilotError::UnknownConversation(conversation_id.to_string()));
        }
        info!("Deleted conversation {}", conversation_id);
        Ok(())
    }

    /// Run a new turn for `question`
    pub async fn submit(&self, conversation_id: &str, question: &str) -> Result<TurnOutcome> {
        let mut guard = self.claim(conversation_id)?;
        let mut state = self.load(conversation_id)?;
        if state.step.is_in_progress() {
            return Err(PilotError::ConversationBusy(conversation_id.to_string()));
        }

        let checkpoint = TurnCheckpoint::new(question);
        let turn_id = checkpoint.turn_id.clone();
        self.append_trace(conversation_id, &turn_id, TraceRecord::Question(question.to_string()))?;
        state.checkpoint = Some(checkpoint);

        // Step 1: interaction cap, checked before any stage runs
        if state.at_cap() {
            let err = PilotError::CapacityExceeded {
                conversation_id: conversation_id.to_string(),
                cap: state.interaction_cap,
            };
            warn!("{}", err);
            return Err(self.fail_turn(&mut guard, state, err, false));
        }

        info!("Conversation {} turn {}: {}", conversation_id, turn_id, question);
        self.run_turn(&mut guard, state).await
    }

    /// Continue a turn that was interrupted mid-flight. `None` when the
    /// conversation has no turn in progress.
    pub async fn resume(&self, conversation_id: &str) -> Result<Option<TurnOutcome>> {
        let mut guard = self.claim(conversation_id)?;
        let state = self.load(conversation_id)?;
        if !state.step.is_in_progress() || state.checkpoint.is_none() {
            return Ok(None);
        }
        info!("Resuming conversation {} at {}", conversation_id, state.step);
        self.run_turn(&mut guard, state).await.map(Some)
    }

    /// Resume every persisted turn left in progress, e.g. after a restart
    pub async fn resume_all(&self) -> Result<Vec<(String, Result<TurnOutcome>)>> {
        let pending: Vec<String> = self
            .store
            .list_conversations()?
            .into_iter()
            .filter(|s| s.step.is_in_progress())
            .map(|s| s.conversation_id)
            .collect();
        info!("Resuming {} interrupted turns", pending.len());

        let mut results = Vec::with_capacity(pending.len());
        for id in pending {
            let result = match self.resume(&id).await {
                Ok(Some(outcome)) => Ok(outcome),
                Ok(None) => continue,
                Err(e) => Err(e),
            };
            results.push((id, result));
        }
        Ok(results)
    }

    fn claim(&self, conversation_id: &str) -> Result<TurnGuard> {
        if !self.in_flight.insert(conversation_id.to_string()) {
            return Err(PilotError::ConversationBusy(conversation_id.to_string()));
        }
        Ok(TurnGuard {
            store: Arc::clone(&self.store),
            in_flight: Arc::clone(&self.in_flight),
            conversation_id: conversation_id.to_string(),
            last_saved: None,
            finished: false,
        })
    }

    fn load(&self, conversation_id: &str) -> Result<ConversationState> {
        self.store
            .load_conversation(conversation_id)?
            .ok_or_else(|| PilotError::UnknownConversation(conversation_id.to_string()))
    }

    fn append_trace(&self, conversation_id: &str, turn_id: &str, record: TraceRecord) -> Result<()> {
        self.store
            .append_trace(conversation_id, &TraceEntry::new(turn_id, record))
    }

    /// Append a stage's output unless this turn already holds a record of the same kind
    fn record_stage(&self, conversation_id: &str, turn_id: &str, record: TraceRecord) -> Result<()> {
        let kind = record.kind();
        let recorded = self
            .store
            .trace(conversation_id)?
            .iter()
            .any(|e| e.turn_id == turn_id && e.record.kind() == kind);
        if recorded {
            debug!("Turn {} already has a {} trace record", turn_id, kind);
            return Ok(());
        }
        self.append_trace(conversation_id, turn_id, record)
    }

    async fn run_turn(&self, guard: &mut TurnGuard, mut state: ConversationState) -> Result<TurnOutcome> {
        let index = match self.knowledge.require(&state.chatbot_id) {
            Ok(index) => index,
            Err(e) => return Err(self.fail_turn(guard, state, e, true)),
        };
        let Some(mut checkpoint) = state.checkpoint.clone() else {
            return Err(PilotError::Storage(format!(
                "conversation {} has no turn to run",
                state.conversation_id
            )));
        };

        // Step 2: stages, each transition persisted before and after
        loop {
            let step = checkpoint.resume_step();
            if step == Step::Done {
                break;
            }
            state.enter(step);
            guard.save(&state)?;

            if let Err(e) = self.run_stage(step, &mut checkpoint, &index, &state.conversation_id).await {
                warn!("Stage {} failed for {}: {}", step, state.conversation_id, e);
                state.checkpoint = Some(checkpoint);
                return Err(self.fail_turn(guard, state, e, true));
            }
            state.checkpoint = Some(checkpoint.clone());
            guard.save(&state)?;
        }

        // Step 3: completion, counted once per turn id
        let (Some(sql), Some(output), Some(explanation)) = (
            checkpoint.validated_sql.clone(),
            checkpoint.output.clone(),
            checkpoint.explanation.clone(),
        ) else {
            return Err(PilotError::Storage("completed turn is missing stage output".to_string()));
        };
        state.enter(Step::Done);
        state.interaction_count += 1;
        let record = InteractionRecord {
            turn_id: checkpoint.turn_id.clone(),
            conversation_id: state.conversation_id.clone(),
            chatbot_id: state.chatbot_id.clone(),
            question: checkpoint.question.clone(),
            sql: Some(sql.clone()),
            explanation: Some(explanation.clone()),
            outcome: Outcome::Succeeded,
            error_kind: None,
            error_message: None,
            created_at: Utc::now(),
        };
        if !self.store.complete_turn(&state, &record)? {
            warn!("Turn {} was already completed; not counted again", record.turn_id);
        }
        guard.finish();
        info!(
            "Conversation {} turn {} done ({}/{} interactions)",
            state.conversation_id, record.turn_id, state.interaction_count, state.interaction_cap
        );

        Ok(TurnOutcome {
            conversation_id: state.conversation_id.clone(),
            turn_id: record.turn_id,
            sql,
            output,
            explanation,
            status: StatusReport::from_state(&state, self.config.near_cap_threshold),
        })
    }

    async fn run_stage(
        &self,
        step: Step,
        checkpoint: &mut TurnCheckpoint,
        index: &KnowledgeIndex,
        conversation_id: &str,
    ) -> Result<()> {
        let turn_id = checkpoint.turn_id.clone();
        let missing = |what: &str| PilotError::Storage(format!("checkpoint for turn {} has no {}", turn_id, what));

        match step {
            Step::ExtractingIntent => {
                let extraction = self.extractor.extract(&checkpoint.question, index)?;
                self.record_stage(conversation_id, &turn_id, TraceRecord::Intent(extraction.intent.clone()))?;
                checkpoint.extraction = Some(extraction);
            }
            Step::ClippingContext => {
                let extraction = checkpoint.extraction.as_ref().ok_or_else(|| missing("intent"))?;
                let context = self.clipper.clip(&extraction.intent, index)?;
                self.record_stage(conversation_id, &turn_id, TraceRecord::ClippedContext(context.clone()))?;
                checkpoint.context = Some(context);
            }
            Step::Generating => {
                let sql = {
                    let extraction = checkpoint.extraction.as_ref().ok_or_else(|| missing("intent"))?;
                    let context = checkpoint.context.as_ref().ok_or_else(|| missing("context"))?;
                    let question = checkpoint.question.as_str();
                    with_provider_retry(&self.retry, step.as_str(), || {
                        self.stages.generate(question, extraction, context)
                    })
                    .await?
                };
                checkpoint.sql = Some(sql);
            }
            Step::Validating => {
                let validated = {
                    let sql = checkpoint.sql.as_deref().ok_or_else(|| missing("sql"))?;
                    let context = checkpoint.context.as_ref().ok_or_else(|| missing("context"))?;
                    self.stages.validate(sql, context).await?
                };
                self.record_stage(conversation_id, &turn_id, TraceRecord::Sql(validated.clone()))?;
                checkpoint.validated_sql = Some(validated);
            }
            Step::Executing => {
                let output = {
                    let sql = checkpoint.validated_sql.as_deref().ok_or_else(|| missing("validated sql"))?;
                    self.stages.execute(sql).await?
                };
                self.record_stage(conversation_id, &turn_id, TraceRecord::Result(output.clone()))?;
                checkpoint.output = Some(output);
            }
            Step::Explaining => {
                let explanation = {
                    let sql = checkpoint.validated_sql.as_deref().ok_or_else(|| missing("validated sql"))?;
                    let output = checkpoint.output.as_ref().ok_or_else(|| missing("result"))?;
                    let question = checkpoint.question.as_str();
                    with_provider_retry(&self.retry, step.as_str(), || {
                        self.stages.explain(question, sql, output)
                    })
                    .await?
                };
                self.record_stage(conversation_id, &turn_id, TraceRecord::Explanation(explanation.clone()))?;
                checkpoint.explanation = Some(explanation);
            }
            Step::Idle | Step::Done | Step::Failed => {}
        }
        Ok(())
    }

    /// Record a terminal failure and hand back the original error.
    ///
    /// `counted` failures consumed an interaction; capacity rejections do not.
    fn fail_turn(
        &self,
        guard: &mut TurnGuard,
        mut state: ConversationState,
        err: PilotError,
        counted: bool,
    ) -> PilotError {
        let kind = err.kind();
        let message = err.to_string();
        let (turn_id, question, sql) = match &state.checkpoint {
            Some(c) => (c.turn_id.clone(), c.question.clone(), c.validated_sql.clone().or_else(|| c.sql.clone())),
            None => (uuid::Uuid::new_v4().to_string(), String::new(), None),
        };

        state.fail(kind, message.clone());
        if counted {
            state.interaction_count += 1;
        }
        let record = InteractionRecord {
            turn_id: turn_id.clone(),
            conversation_id: state.conversation_id.clone(),
            chatbot_id: state.chatbot_id.clone(),
            question,
            sql,
            explanation: None,
            outcome: Outcome::Failed,
            error_kind: Some(kind),
            error_message: Some(message.clone()),
            created_at: Utc::now(),
        };

        let persisted = self.store.complete_turn(&state, &record).and_then(|_| {
            self.append_trace(
                &state.conversation_id,
                &turn_id,
                TraceRecord::Error { kind, message },
            )
        });
        if let Err(e) = persisted {
            error!("Failed to record failure of turn {}: {}", turn_id, e);
        }
        guard.finish();
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;

    fn guard_for(store: Arc<dyn ConversationStore>, state: &ConversationState) -> (TurnGuard, Arc<DashSet<String>>) {
        let in_flight = Arc::new(DashSet::new());
        in_flight.insert(state.conversation_id.clone());
        let mut guard = TurnGuard {
            store,
            in_flight: Arc::clone(&in_flight),
            conversation_id: state.conversation_id.clone(),
            last_saved: None,
            finished: false,
        };
        guard.save(state).unwrap();
        (guard, in_flight)
    }

    #[test]
    fn test_drop_before_any_stage_marks_cancelled() {
        let store: Arc<dyn ConversationStore> = Arc::new(MemoryStore::new());
        let mut state = ConversationState::new("shop", 5);
        state.checkpoint = Some(TurnCheckpoint::new("total orders"));
        state.enter(Step::ExtractingIntent);

        let (guard, in_flight) = guard_for(Arc::clone(&store), &state);
        drop(guard);

        let saved = store.load_conversation(&state.conversation_id).unwrap().unwrap();
        assert_eq!(saved.step, Step::Failed);
        assert_eq!(saved.last_error, Some(ErrorKind::Cancelled));
        assert!(in_flight.is_empty());
    }

    #[test]
    fn test_finished_guard_leaves_state_alone() {
        let store: Arc<dyn ConversationStore> = Arc::new(MemoryStore::new());
        let mut state = ConversationState::new("shop", 5);
        state.enter(Step::ExtractingIntent);

        let (mut guard, in_flight) = guard_for(Arc::clone(&store), &state);
        guard.finish();
        drop(guard);

        let saved = store.load_conversation(&state.conversation_id).unwrap().unwrap();
        assert_eq!(saved.step, Step::ExtractingIntent);
        assert!(in_flight.is_empty());
    }
}
