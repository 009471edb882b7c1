//! Conversation state
//!
//! Step/progress bookkeeping, per-turn checkpoints and the records written
//! when a turn completes.

use crate::context::ClippedContext;
use crate::error::ErrorKind;
use crate::execution::QueryOutput;
use crate::intent::Extraction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Idle,
    ExtractingIntent,
    ClippingContext,
    Generating,
    Validating,
    Executing,
    Explaining,
    Done,
    Failed,
}

impl Step {
    /// Stages of a turn in execution order
    pub const STAGES: [Step; 6] = [
        Step::ExtractingIntent,
        Step::ClippingContext,
        Step::Generating,
        Step::Validating,
        Step::Executing,
        Step::Explaining,
    ];

    /// Progress reported on entering this step; `Failed` keeps the previous value
    pub fn progress(&self) -> Option<u8> {
        match self {
            Step::Idle => Some(0),
            Step::ExtractingIntent => Some(10),
            Step::ClippingContext => Some(25),
            Step::Generating => Some(40),
            Step::Validating => Some(60),
            Step::Executing => Some(75),
            Step::Explaining => Some(90),
            Step::Done => Some(100),
            Step::Failed => None,
        }
    }

    pub fn next(&self) -> Option<Step> {
        match self {
            Step::Idle => Some(Step::ExtractingIntent),
            Step::ExtractingIntent => Some(Step::ClippingContext),
            Step::ClippingContext => Some(Step::Generating),
            Step::Generating => Some(Step::Validating),
            Step::Validating => Some(Step::Executing),
            Step::Executing => Some(Step::Explaining),
            Step::Explaining => Some(Step::Done),
            Step::Done | Step::Failed => None,
        }
    }

    /// A turn is mid-flight
    pub fn is_in_progress(&self) -> bool {
        !matches!(self, Step::Idle | Step::Done | Step::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Idle => "idle",
            Step::ExtractingIntent => "extracting_intent",
            Step::ClippingContext => "clipping_context",
            Step::Generating => "generating",
            Step::Validating => "validating",
            Step::Executing => "executing",
            Step::Explaining => "explaining",
            Step::Done => "done",
            Step::Failed => "failed",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Step::Idle => "Waiting for a question",
            Step::ExtractingIntent => "Understanding the question",
            Step::ClippingContext => "Selecting relevant schema",
            Step::Generating => "Writing SQL",
            Step::Validating => "Checking SQL",
            Step::Executing => "Running query",
            Step::Explaining => "Explaining results",
            Step::Done => "Answer ready",
            Step::Failed => "Failed",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outputs of every stage a turn has completed so far
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnCheckpoint {
    pub turn_id: String,
    pub question: String,
    #[serde(default)]
    pub extraction: Option<Extraction>,
    #[serde(default)]
    pub context: Option<ClippedContext>,
    #[serde(default)]
    pub sql: Option<String>,
    #[serde(default)]
    pub validated_sql: Option<String>,
    #[serde(default)]
    pub output: Option<QueryOutput>,
    #[serde(default)]
    pub explanation: Option<String>,
}

impl TurnCheckpoint {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            turn_id: Uuid::new_v4().to_string(),
            question: question.into(),
            extraction: None,
            context: None,
            sql: None,
            validated_sql: None,
            output: None,
            explanation: None,
        }
    }

    /// First stage whose output is missing, or `Done`
    pub fn resume_step(&self) -> Step {
        if self.extraction.is_none() {
            Step::ExtractingIntent
        } else if self.context.is_none() {
            Step::ClippingContext
        } else if self.sql.is_none() {
            Step::Generating
        } else if self.validated_sql.is_none() {
            Step::Validating
        } else if self.output.is_none() {
            Step::Executing
        } else if self.explanation.is_none() {
            Step::Explaining
        } else {
            Step::Done
        }
    }

    pub fn has_completed_stage(&self) -> bool {
        self.extraction.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub conversation_id: String,
    pub chatbot_id: String,
    pub step: Step,
    pub progress: u8,
    pub interaction_count: u32,
    pub interaction_cap: u32,
    pub checkpoint: Option<TurnCheckpoint>,
    pub message: String,
    pub last_error: Option<ErrorKind>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationState {
    pub fn new(chatbot_id: impl Into<String>, interaction_cap: u32) -> Self {
        let now = Utc::now();
        Self {
            conversation_id: Uuid::new_v4().to_string(),
            chatbot_id: chatbot_id.into(),
            step: Step::Idle,
            progress: 0,
            interaction_count: 0,
            interaction_cap,
            checkpoint: None,
            message: Step::Idle.message().to_string(),
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn remaining(&self) -> u32 {
        self.interaction_cap.saturating_sub(self.interaction_count)
    }

    pub fn at_cap(&self) -> bool {
        self.interaction_count >= self.interaction_cap
    }

    /// Move to `step`; a new turn (re)starts progress from zero
    pub fn enter(&mut self, step: Step) {
        if let Some(progress) = step.progress() {
            self.progress = if step == Step::ExtractingIntent || step == Step::Idle {
                progress
            } else {
                self.progress.max(progress)
            };
        }
        self.step = step;
        self.message = step.message().to_string();
        if step != Step::Failed {
            self.last_error = None;
        }
        self.updated_at = Utc::now();
    }

    pub fn fail(&mut self, kind: ErrorKind, message: impl Into<String>) {
        self.enter(Step::Failed);
        self.last_error = Some(kind);
        self.message = message.into();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Succeeded,
    Failed,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Succeeded => "succeeded",
            Outcome::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "succeeded" => Some(Outcome::Succeeded),
            "failed" => Some(Outcome::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub turn_id: String,
    pub conversation_id: String,
    pub chatbot_id: String,
    pub question: String,
    pub sql: Option<String>,
    pub explanation: Option<String>,
    pub outcome: Outcome,
    pub error_kind: Option<ErrorKind>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// What callers see when polling a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub step: Step,
    pub progress: u8,
    pub message: String,
    pub interaction_count: u32,
    pub interaction_cap: u32,
    /// Present once the conversation is close to its interaction cap
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_interactions: Option<u32>,
}

impl StatusReport {
    pub fn from_state(state: &ConversationState, near_cap_threshold: u32) -> Self {
        let remaining = state.remaining();
        Self {
            step: state.step,
            progress: state.progress,
            message: state.message.clone(),
            interaction_count: state.interaction_count,
            interaction_cap: state.interaction_cap,
            remaining_interactions: (remaining <= near_cap_threshold).then_some(remaining),
        }
    }
}
