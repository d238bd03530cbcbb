//! Closed label vocabularies for each benchmark task.
//!
//! Model answers are only accepted when they parse into one of these types;
//! anything else is a domain-rule violation and triggers a retry.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised when an answer falls outside a task's label set
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LabelError {
    #[error("Invalid prediction: {0}")]
    InvalidDetection(String),

    #[error("Invalid option letter: {0}")]
    InvalidOption(String),

    #[error("Invalid category: {0}")]
    InvalidCategory(String),

    #[error("Unknown dataset label: {0}")]
    UnknownDatasetLabel(i64),
}

/// Binary detection label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DetectionLabel {
    #[serde(rename = "Drivelology")]
    Drivelology,
    #[serde(rename = "non-Drivelology")]
    NonDrivelology,
}

impl DetectionLabel {
    pub const ALL: [DetectionLabel; 2] = [Self::Drivelology, Self::NonDrivelology];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Drivelology => "Drivelology",
            Self::NonDrivelology => "non-Drivelology",
        }
    }

    /// Map the dataset's integer label (0 = Drivelology, 1 = non-Drivelology)
    pub fn from_dataset(label: i64) -> Result<Self, LabelError> {
        match label {
            0 => Ok(Self::Drivelology),
            1 => Ok(Self::NonDrivelology),
            other => Err(LabelError::UnknownDatasetLabel(other)),
        }
    }
}

impl fmt::Display for DetectionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DetectionLabel {
    type Err = LabelError;

    /// Exact match only; the model must reproduce the label verbatim
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Drivelology" => Ok(Self::Drivelology),
            "non-Drivelology" => Ok(Self::NonDrivelology),
            other => Err(LabelError::InvalidDetection(other.to_string())),
        }
    }
}

/// Multiple-choice option letter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChoiceLetter {
    A,
    B,
    C,
    D,
    E,
}

impl ChoiceLetter {
    pub const ALL: [ChoiceLetter; 5] = [Self::A, Self::B, Self::C, Self::D, Self::E];

    /// Letter for a zero-based option index
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
            Self::E => "E",
        }
    }
}

impl fmt::Display for ChoiceLetter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChoiceLetter {
    type Err = LabelError;

    /// Trims and upper-cases before matching
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "A" => Ok(Self::A),
            "B" => Ok(Self::B),
            "C" => Ok(Self::C),
            "D" => Ok(Self::D),
            "E" => Ok(Self::E),
            _ => Err(LabelError::InvalidOption(s.to_string())),
        }
    }
}

/// Rhetorical category used by the tagging task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Inversion,
    Misdirection,
    Paradox,
    Switchbait,
    Wordplay,
}

impl Category {
    /// Fixed vocabulary, in the column order used for multi-label vectors
    pub const ALL: [Category; 5] = [
        Self::Inversion,
        Self::Misdirection,
        Self::Paradox,
        Self::Switchbait,
        Self::Wordplay,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inversion => "inversion",
            Self::Misdirection => "misdirection",
            Self::Paradox => "paradox",
            Self::Switchbait => "switchbait",
            Self::Wordplay => "wordplay",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = LabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == needle)
            .ok_or_else(|| LabelError::InvalidCategory(s.trim().to_string()))
    }
}

/// Parse a comma-separated category list, case-insensitively.
///
/// Every element must be a known category; duplicates collapse.
pub fn parse_categories(csv: &str) -> Result<BTreeSet<Category>, LabelError> {
    csv.split(',').map(str::parse::<Category>).collect()
}

/// Lenient parse used when reading stored rows: unknown entries are ignored
pub fn categories_lenient(csv: &str) -> BTreeSet<Category> {
    csv.split(',').filter_map(|c| c.parse().ok()).collect()
}

/// Canonical comma-separated form ("inversion, wordplay")
pub fn join_categories(categories: &BTreeSet<Category>) -> String {
    categories
        .iter()
        .map(Category::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detection_label_is_exact() {
        assert_eq!(
            "Drivelology".parse::<DetectionLabel>().unwrap(),
            DetectionLabel::Drivelology
        );
        assert_eq!(
            "non-Drivelology".parse::<DetectionLabel>().unwrap(),
            DetectionLabel::NonDrivelology
        );
        assert!("drivelology".parse::<DetectionLabel>().is_err());
        assert!("Drivelology.".parse::<DetectionLabel>().is_err());
    }

    #[test]
    fn test_detection_label_from_dataset() {
        assert_eq!(DetectionLabel::from_dataset(0).unwrap(), DetectionLabel::Drivelology);
        assert_eq!(
            DetectionLabel::from_dataset(1).unwrap(),
            DetectionLabel::NonDrivelology
        );
        assert_eq!(
            DetectionLabel::from_dataset(2),
            Err(LabelError::UnknownDatasetLabel(2))
        );
    }

    #[test]
    fn test_choice_letter_normalizes() {
        assert_eq!(" b ".parse::<ChoiceLetter>().unwrap(), ChoiceLetter::B);
        assert_eq!("E".parse::<ChoiceLetter>().unwrap(), ChoiceLetter::E);
        assert!("F".parse::<ChoiceLetter>().is_err());
        assert!("AB".parse::<ChoiceLetter>().is_err());
        assert_eq!(ChoiceLetter::from_index(2), Some(ChoiceLetter::C));
        assert_eq!(ChoiceLetter::from_index(5), None);
    }

    #[test]
    fn test_parse_categories_case_insensitive() {
        let parsed = parse_categories("inversion, WORDPLAY").unwrap();
        let expected: BTreeSet<_> = [Category::Inversion, Category::Wordplay].into_iter().collect();
        assert_eq!(parsed, expected);
        assert_eq!(join_categories(&parsed), "inversion, wordplay");
    }

    #[test]
    fn test_parse_categories_rejects_unknown() {
        assert_eq!(
            parse_categories("invention"),
            Err(LabelError::InvalidCategory("invention".to_string()))
        );
        assert!(parse_categories("paradox, ").is_err());
        assert!(parse_categories("").is_err());
    }

    #[test]
    fn test_categories_lenient_skips_noise() {
        let parsed = categories_lenient("Paradox, nonsense, misdirection");
        assert_eq!(parsed.len(), 2);
        assert!(parsed.contains(&Category::Paradox));
        assert!(parsed.contains(&Category::Misdirection));
    }
}
