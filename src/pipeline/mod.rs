//! Conversation pipeline: state machine, stages, checkpoints and trace

pub mod machine;
pub mod retry;
pub mod stages;
pub mod state;
pub mod trace;

pub use machine::{Pipeline, TurnOutcome};
pub use retry::{with_provider_retry, RetryPolicy};
pub use stages::{validate_read_only, LlmQueryStages, QueryStages};
pub use state::*;
pub use trace::{last_intent, replay, TraceEntry, TraceRecord};
