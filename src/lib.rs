//! drivel-bench - Drivelology benchmark runner
//!
//! Evaluates language models on texts that are syntactically coherent but
//! pragmatically layered ("nonsense with depth"): detection, multiple-choice
//! narrative selection, category tagging and free-form narrative generation.
//!
//! # Architecture
//!
//! Every experiment is a resumable batch job over a dataset:
//! - Results are appended to a tab-delimited record store, one row per sample
//! - Samples already present in the store are skipped on rerun
//! - Model calls are retried until the answer parses and passes validation
//! - Narrative rows are scored in two stages; the second stage patches rows
//!   in place and can be re-run until every row is complete
//!
//! # Modules
//!
//! - `adapters`: Model backends and the dataset hub
//! - `core`: Record store, prompts, retrying calls, scoring, metrics, run loop
//! - `domain`: Data structures (Sample, labels, records)
//! - `tasks`: The four benchmark experiments
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Run detection with a DeepSeek model
//! drivel-bench detect --prompt-version v1_en --llm-model deepseek-chat
//!
//! # Re-evaluate an existing store without calling the model
//! drivel-bench mcqa --hard --eval-only
//!
//! # Generate narratives, judge them and fill in similarity scores
//! drivel-bench narrative --prompt-version v1_zh_tw --evaluation-version v1_zh_tw
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod tasks;

// Re-export main types at crate root for convenience
pub use core::{run, RecordStore, RunOptions, RunSummary, Task};
pub use domain::{Record, Sample};
