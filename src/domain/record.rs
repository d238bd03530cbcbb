//! Result records persisted to the record store.
//!
//! Each task has its own record type with a fixed, named column order. The
//! on-disk format is a tab-delimited row per record; the column names here are
//! the schema, and patching addresses columns by name rather than position.

use serde::{Deserialize, Serialize};

/// A row type that can be stored in a [`crate::core::RecordStore`]
pub trait Record: Sized {
    /// Column names, in on-disk order. The first column is always the id.
    const COLUMNS: &'static [&'static str];

    /// Whether the store file starts with a header row of `COLUMNS`
    const HAS_HEADER: bool = false;

    /// Minimum number of fields for a stored line to be readable
    const MIN_FIELDS: usize = Self::COLUMNS.len();

    /// Record identity (first column)
    fn id(&self) -> &str;

    /// Serialize to unsanitized field values, one per column
    fn to_fields(&self) -> Vec<String>;

    /// Rebuild from stored field values; `None` when the row is malformed
    fn from_fields(fields: &[&str]) -> Option<Self>;

    /// Position of a named column
    fn column_index(name: &str) -> Option<usize> {
        Self::COLUMNS.iter().position(|c| *c == name)
    }
}

/// Detection task row: id, text, reason, ground_truth, prediction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub id: String,
    pub text: String,
    pub reason: String,
    pub ground_truth: String,
    pub prediction: String,
}

impl Record for DetectionRecord {
    const COLUMNS: &'static [&'static str] = &["id", "text", "reason", "ground_truth", "prediction"];

    fn id(&self) -> &str {
        &self.id
    }

    fn to_fields(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.text.clone(),
            self.reason.clone(),
            self.ground_truth.clone(),
            self.prediction.clone(),
        ]
    }

    fn from_fields(fields: &[&str]) -> Option<Self> {
        if fields.len() < Self::MIN_FIELDS {
            return None;
        }
        Some(Self {
            id: fields[0].to_string(),
            text: fields[1].to_string(),
            reason: fields[2].to_string(),
            ground_truth: fields[3].to_string(),
            prediction: fields[4].to_string(),
        })
    }
}

/// Multiple-choice row with `N` narrative options.
///
/// The easy variant stores five options (A-E); the hard variant stores four,
/// with "None of the above" implied as option E.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McqaRecord<const N: usize> {
    pub id: String,
    pub text: String,
    pub options: Vec<String>,
    pub ground_truth: String,
    pub prediction: String,
}

pub type McqaEasyRecord = McqaRecord<5>;
pub type McqaHardRecord = McqaRecord<4>;

impl<const N: usize> McqaRecord<N> {
    fn fields(&self) -> Vec<String> {
        let mut fields = Vec::with_capacity(N + 4);
        fields.push(self.id.clone());
        fields.push(self.text.clone());
        fields.extend((0..N).map(|i| self.options.get(i).cloned().unwrap_or_default()));
        fields.push(self.ground_truth.clone());
        fields.push(self.prediction.clone());
        fields
    }

    fn parse(fields: &[&str]) -> Option<Self> {
        if fields.len() < N + 4 {
            return None;
        }
        Some(Self {
            id: fields[0].to_string(),
            text: fields[1].to_string(),
            options: fields[2..2 + N].iter().map(|s| s.to_string()).collect(),
            ground_truth: fields[2 + N].to_string(),
            prediction: fields[3 + N].to_string(),
        })
    }
}

impl Record for McqaRecord<5> {
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "text",
        "opt_A",
        "opt_B",
        "opt_C",
        "opt_D",
        "opt_E",
        "ground_truth",
        "prediction",
    ];

    fn id(&self) -> &str {
        &self.id
    }

    fn to_fields(&self) -> Vec<String> {
        self.fields()
    }

    fn from_fields(fields: &[&str]) -> Option<Self> {
        Self::parse(fields)
    }
}

impl Record for McqaRecord<4> {
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "text",
        "opt_A",
        "opt_B",
        "opt_C",
        "opt_D",
        "ground_truth",
        "prediction",
    ];

    fn id(&self) -> &str {
        &self.id
    }

    fn to_fields(&self) -> Vec<String> {
        self.fields()
    }

    fn from_fields(fields: &[&str]) -> Option<Self> {
        Self::parse(fields)
    }
}

/// Tagging task row: id, text, reason, ground_truth_csv, prediction_csv
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaggingRecord {
    pub id: String,
    pub text: String,
    pub reason: String,
    pub ground_truth: String,
    pub prediction: String,
}

impl Record for TaggingRecord {
    const COLUMNS: &'static [&'static str] = &["id", "text", "reason", "ground_truth", "prediction"];

    fn id(&self) -> &str {
        &self.id
    }

    fn to_fields(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.text.clone(),
            self.reason.clone(),
            self.ground_truth.clone(),
            self.prediction.clone(),
        ]
    }

    fn from_fields(fields: &[&str]) -> Option<Self> {
        if fields.len() < Self::MIN_FIELDS {
            return None;
        }
        Some(Self {
            id: fields[0].to_string(),
            text: fields[1].to_string(),
            reason: fields[2].to_string(),
            ground_truth: fields[3].to_string(),
            prediction: fields[4].to_string(),
        })
    }
}

/// Similarity columns filled in by the deferred scoring pass
pub const SIMILARITY_COLUMNS: [&str; 3] = ["bert_precision", "bert_recall", "bert_f1"];

/// Narrative task row, written with a header.
///
/// `geval_score` is filled at append time (if the judge succeeded); the three
/// similarity fields are patched in later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarrativeRecord {
    pub id: String,
    pub text: String,
    pub reference: String,
    pub candidate: String,
    pub geval_score: Option<i64>,
    pub bert_precision: Option<f64>,
    pub bert_recall: Option<f64>,
    pub bert_f1: Option<f64>,
}

impl NarrativeRecord {
    pub fn new(
        id: impl Into<String>,
        text: impl Into<String>,
        reference: impl Into<String>,
        candidate: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            reference: reference.into(),
            candidate: candidate.into(),
            geval_score: None,
            bert_precision: None,
            bert_recall: None,
            bert_f1: None,
        }
    }

    /// True when any similarity field is still empty
    pub fn needs_similarity(&self) -> bool {
        self.bert_precision.is_none() || self.bert_recall.is_none() || self.bert_f1.is_none()
    }
}

fn optional<T: ToString>(value: &Option<T>) -> String {
    value.as_ref().map(ToString::to_string).unwrap_or_default()
}

fn parse_optional<T: std::str::FromStr>(fields: &[&str], index: usize) -> Option<T> {
    fields
        .get(index)
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .and_then(|s| s.parse().ok())
}

impl Record for NarrativeRecord {
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "text",
        "reference",
        "candidate",
        "geval_score",
        "bert_precision",
        "bert_recall",
        "bert_f1",
    ];

    const HAS_HEADER: bool = true;

    // id, text, reference, candidate; scores may be missing on short rows
    const MIN_FIELDS: usize = 4;

    fn id(&self) -> &str {
        &self.id
    }

    fn to_fields(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.text.clone(),
            self.reference.clone(),
            self.candidate.clone(),
            optional(&self.geval_score),
            optional(&self.bert_precision),
            optional(&self.bert_recall),
            optional(&self.bert_f1),
        ]
    }

    fn from_fields(fields: &[&str]) -> Option<Self> {
        if fields.len() < Self::MIN_FIELDS {
            return None;
        }
        Some(Self {
            id: fields[0].to_string(),
            text: fields[1].to_string(),
            reference: fields[2].to_string(),
            candidate: fields[3].to_string(),
            geval_score: parse_optional(fields, 4),
            bert_precision: parse_optional(fields, 5),
            bert_recall: parse_optional(fields, 6),
            bert_f1: parse_optional(fields, 7),
        })
    }
}
