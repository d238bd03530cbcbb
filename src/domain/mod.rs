//! Domain types for the Drivelology benchmark.
//!
//! This module contains the core data structures:
//! - Sample: Immutable dataset input
//! - Labels: Closed answer vocabularies per task
//! - Record: Typed result rows persisted to the record store

pub mod labels;
pub mod record;
pub mod sample;

// Re-export commonly used types
pub use labels::{
    categories_lenient, join_categories, parse_categories, Category, ChoiceLetter,
    DetectionLabel, LabelError,
};
pub use record::{
    DetectionRecord, McqaEasyRecord, McqaHardRecord, McqaRecord, NarrativeRecord, Record,
    TaggingRecord, SIMILARITY_COLUMNS,
};
pub use sample::{content_id, Sample};
