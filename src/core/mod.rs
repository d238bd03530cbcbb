//! Core benchmark logic.
//!
//! This module contains:
//! - RecordStore: Tab-delimited result rows with append and patch
//! - DedupIndex: Ids already present in a store
//! - Prompts: Versioned templates and rendering
//! - Invoke: Structured model calls with bounded retries
//! - Scorer: Deferred similarity scoring
//! - Metrics: Classification metrics over stored rows
//! - Runner: The resumable evaluation loop

pub mod dedup;
pub mod error_log;
pub mod invoke;
pub mod metrics;
pub mod prompts;
pub mod record_store;
pub mod runner;
pub mod scorer;

// Re-export commonly used types
pub use dedup::DedupIndex;
pub use error_log::ErrorLog;
pub use invoke::{
    apply_think, invoke, ChoiceAnswer, InvokeError, InvokeFailure, JudgeScore, NarrativeAnswer,
    ReasonedAnswer, ResponseSchema, RetryPolicy,
};
pub use metrics::{ClassificationReport, MultiLabelReport, NarrativeReport, SummaryStats};
pub use prompts::{PromptCatalog, PromptError, TaskKind, Template};
pub use record_store::{sanitize, PatchOutcome, RecordStore, StoreLock, StoreLockError};
pub use runner::{run, RunOptions, RunSummary, SampleError, Task};
pub use scorer::{
    backfill_similarity, BackfillStats, EmbeddingScorer, LexicalScorer, ScoreLanguage,
    SimilarityScore, SimilarityScorer,
};
