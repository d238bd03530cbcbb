//! Input samples drawn from a benchmark dataset.
//!
//! A sample is immutable once loaded. Task modules decide which of the
//! auxiliary fields they need and how the sample id is derived.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// One input unit from a dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Dataset-provided id (empty when the dataset has none)
    pub source_id: String,

    /// Raw text of the sample
    pub text: String,

    /// Integer label, if the dataset carries one
    pub label: Option<i64>,

    /// Tagging categories, if the dataset carries them
    #[serde(default)]
    pub taggings: Vec<String>,

    /// Remaining string-valued columns (narratives, distractors, ...)
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

impl Sample {
    /// Create a sample with just an id and text
    pub fn new(source_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            text: text.into(),
            label: None,
            taggings: Vec::new(),
            fields: BTreeMap::new(),
        }
    }

    /// Attach an integer label
    pub fn with_label(mut self, label: i64) -> Self {
        self.label = Some(label);
        self
    }

    /// Attach tagging categories
    pub fn with_taggings<I, S>(mut self, taggings: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.taggings = taggings.into_iter().map(Into::into).collect();
        self
    }

    /// Attach an auxiliary string field
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Look up an auxiliary field, treating empty strings as absent
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    /// Build a sample from a dataset row.
    ///
    /// Returns `None` when the row has no usable `text` column.
    pub fn from_row(row: &Value) -> Option<Self> {
        let obj = row.as_object()?;
        let text = obj.get("text").and_then(value_to_text)?;

        let source_id = obj.get("id").and_then(value_to_text).unwrap_or_default();
        let label = obj.get("label").and_then(Value::as_i64);
        let taggings = obj
            .get("taggings")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(value_to_text).collect())
            .unwrap_or_default();

        let fields = obj
            .iter()
            .filter(|(key, _)| !matches!(key.as_str(), "id" | "text" | "label" | "taggings"))
            .filter_map(|(key, value)| value_to_text(value).map(|v| (key.clone(), v)))
            .collect();

        Some(Self {
            source_id,
            text,
            label,
            taggings,
            fields,
        })
    }
}

fn value_to_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Derive a deterministic id from sample text (first 16 hex chars of SHA-256)
pub fn content_id(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..8])
}
