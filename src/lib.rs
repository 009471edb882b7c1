//! QueryPilot
//!
//! Natural-language-to-SQL chatbot core: a semantic schema model, a cached
//! knowledge index per chatbot, deterministic intent extraction, context
//! clipping, a checkpointed conversation pipeline and a benchmark engine.

pub mod benchmark;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod execution;
pub mod intent;
pub mod knowledge;
pub mod llm;
pub mod pipeline;
pub mod prompt;
pub mod semantic;

pub use benchmark::{BenchmarkEngine, BenchmarkRun, TestCase};
pub use config::PipelineConfig;
pub use context::{ClippedContext, ContextClipper};
pub use error::{ErrorKind, PilotError, Result};
pub use intent::{Extraction, Intent, IntentExtractor};
pub use knowledge::{KnowledgeIndex, KnowledgeStore};
pub use pipeline::{Pipeline, StatusReport, Step, TurnOutcome};
pub use semantic::SemanticSchema;
