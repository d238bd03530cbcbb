//! Benchmark experiments.
//!
//! Each task pairs a prompt template with a record type and knows how to
//! turn one sample into one stored row:
//! - detection: binary Drivelology classification
//! - mcqa: pick the underlying narrative among five options (easy/hard)
//! - tagging: multi-label rhetorical categories
//! - narrative: free-form narrative, judged now and similarity-scored later

pub mod detection;
pub mod mcqa;
pub mod narrative;
pub mod tagging;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use sha2::{Digest, Sha256};

use crate::adapters::Backend;
use crate::core::RetryPolicy;

pub use detection::DetectionTask;
pub use mcqa::{McqaEasyTask, McqaHardTask, McqaTask};
pub use narrative::NarrativeTask;
pub use tagging::TaggingTask;

/// Backend session plus call settings shared by every task
#[derive(Clone)]
pub struct CallContext {
    pub backend: Arc<dyn Backend>,
    pub policy: RetryPolicy,
    /// When false, prompts get the no-think prefix
    pub think: bool,
}

impl CallContext {
    pub fn new(backend: Arc<dyn Backend>, policy: RetryPolicy, think: bool) -> Self {
        Self {
            backend,
            policy,
            think,
        }
    }
}

/// Model name as used in output file names: last path segment, ':' as '-'
pub fn model_file_stem(model: &str) -> String {
    model
        .rsplit('/')
        .next()
        .unwrap_or(model)
        .replace(':', "-")
}

/// `<dir>/<model>_<version><suffix>.tsv`
pub fn store_path(dir: &Path, model: &str, version: &str, suffix: &str) -> PathBuf {
    dir.join(format!("{}_{}{}.tsv", model_file_stem(model), version, suffix))
}

/// Language tag embedded in a version name (`v2_zh_tw` -> `zh_tw`)
pub fn language_from_version(version: &str) -> Option<&str> {
    version.split_once('_').map(|(_, lang)| lang).filter(|l| !l.is_empty())
}

/// Dataset columns holding the positive and negative narratives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NarrativeFields {
    pub positive: &'static str,
    pub negatives: [&'static str; 4],
}

impl NarrativeFields {
    /// Columns for a language tag; `None` when the tag is unknown
    pub fn for_language(language: &str) -> Option<Self> {
        match language {
            "en" => Some(Self::default()),
            "zh_tw" => Some(Self {
                positive: "pos_tc",
                negatives: ["neg_tc_1", "neg_tc_2", "neg_tc_3", "neg_tc_4"],
            }),
            "zh" => Some(Self {
                positive: "pos_sc",
                negatives: ["neg_sc_1", "neg_sc_2", "neg_sc_3", "neg_sc_4"],
            }),
            _ => None,
        }
    }
}

impl Default for NarrativeFields {
    fn default() -> Self {
        Self {
            positive: "pos_en",
            negatives: ["neg_en_1", "neg_en_2", "neg_en_3", "neg_en_4"],
        }
    }
}

/// Deterministic RNG for a sample, so reruns shuffle identically
pub fn sample_rng(id: &str) -> ChaCha8Rng {
    let digest = Sha256::digest(id.as_bytes());
    let mut seed = [0u8; 8];
    seed.copy_from_slice(&digest[..8]);
    ChaCha8Rng::seed_from_u64(u64::from_le_bytes(seed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_model_file_stem() {
        assert_eq!(model_file_stem("gpt-4o-mini"), "gpt-4o-mini");
        assert_eq!(model_file_stem("meta-llama/llama-3:70b"), "llama-3-70b");
        assert_eq!(model_file_stem("qwen3:8b"), "qwen3-8b");
    }

    #[test]
    fn test_store_path() {
        let path = store_path(Path::new("outputs/tagging"), "openai/gpt-4o", "v1_en", "_multilabel");
        assert_eq!(path, PathBuf::from("outputs/tagging/gpt-4o_v1_en_multilabel.tsv"));
    }

    #[test]
    fn test_language_from_version() {
        assert_eq!(language_from_version("v1_en"), Some("en"));
        assert_eq!(language_from_version("v2_zh_tw"), Some("zh_tw"));
        assert_eq!(language_from_version("v1"), None);
    }

    #[test]
    fn test_narrative_fields() {
        assert_eq!(NarrativeFields::for_language("zh_tw").unwrap().positive, "pos_tc");
        assert_eq!(NarrativeFields::for_language("zh").unwrap().negatives[3], "neg_sc_4");
        assert!(NarrativeFields::for_language("fr").is_none());
    }

    #[test]
    fn test_sample_rng_is_deterministic() {
        let a: u64 = sample_rng("42").gen();
        let b: u64 = sample_rng("42").gen();
        let c: u64 = sample_rng("43").gen();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
