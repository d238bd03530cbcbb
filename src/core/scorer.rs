//! Deferred similarity scoring for generated narratives.
//!
//! Stage one (the judge score) is written with the row. Stage two runs later
//! in batches: every record missing a similarity field is scored and its row
//! patched in place. A record whose batch fails stays eligible for the next
//! pass, so the backfill is idempotent without being transactional.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::record_store::{PatchOutcome, RecordStore};
use crate::adapters::Embedder;
use crate::domain::{NarrativeRecord, SIMILARITY_COLUMNS};

/// Precision, recall and F1 of a candidate against its reference
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimilarityScore {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

impl SimilarityScore {
    pub fn from_precision_recall(precision: f64, recall: f64) -> Self {
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };
        Self {
            precision,
            recall,
            f1,
        }
    }
}

/// Tokenization family for scoring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreLanguage {
    En,
    Zh,
}

impl ScoreLanguage {
    /// `en*` tags score as English, everything else as Chinese
    pub fn from_tag(tag: &str) -> Self {
        if tag.starts_with("en") {
            Self::En
        } else {
            Self::Zh
        }
    }
}

/// Scores (candidate, reference) pairs in one batch call
#[async_trait]
pub trait SimilarityScorer: Send + Sync {
    fn name(&self) -> &str;

    /// One score per pair, in input order
    async fn score_batch(
        &self,
        pairs: &[(String, String)],
        language: ScoreLanguage,
    ) -> Result<Vec<SimilarityScore>>;
}

fn tokenize(text: &str, language: ScoreLanguage) -> Vec<String> {
    match language {
        ScoreLanguage::En => text
            .split(|c: char| !c.is_alphanumeric() && c != '\'')
            .map(|w| w.trim_matches('\'').to_lowercase())
            .filter(|w| !w.is_empty())
            .collect(),
        ScoreLanguage::Zh => text
            .chars()
            .filter(|c| c.is_alphanumeric())
            .flat_map(char::to_lowercase)
            .map(String::from)
            .collect(),
    }
}

/// Greedy token matching with exact-match similarity
#[derive(Debug, Clone, Default)]
pub struct LexicalScorer;

impl LexicalScorer {
    pub fn score_pair(candidate: &str, reference: &str, language: ScoreLanguage) -> SimilarityScore {
        let cand = tokenize(candidate, language);
        let refs = tokenize(reference, language);
        if cand.is_empty() || refs.is_empty() {
            return SimilarityScore::from_precision_recall(0.0, 0.0);
        }

        let cand_set: HashSet<&str> = cand.iter().map(String::as_str).collect();
        let ref_set: HashSet<&str> = refs.iter().map(String::as_str).collect();

        let precision =
            cand.iter().filter(|t| ref_set.contains(t.as_str())).count() as f64 / cand.len() as f64;
        let recall =
            refs.iter().filter(|t| cand_set.contains(t.as_str())).count() as f64 / refs.len() as f64;

        SimilarityScore::from_precision_recall(precision, recall)
    }
}

#[async_trait]
impl SimilarityScorer for LexicalScorer {
    fn name(&self) -> &str {
        "lexical"
    }

    async fn score_batch(
        &self,
        pairs: &[(String, String)],
        language: ScoreLanguage,
    ) -> Result<Vec<SimilarityScore>> {
        Ok(pairs
            .iter()
            .map(|(candidate, reference)| Self::score_pair(candidate, reference, language))
            .collect())
    }
}

/// Split text into sentence-like segments
fn segments(text: &str) -> Vec<String> {
    let parts: Vec<String> = text
        .split(['.', '!', '?', '。', '！', '？', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();

    if parts.is_empty() && !text.trim().is_empty() {
        vec![text.trim().to_string()]
    } else {
        parts
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f64 {
    let mut dot = 0.0f64;
    let mut na = 0.0f64;
    let mut nb = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        dot += f64::from(*x) * f64::from(*y);
        na += f64::from(*x) * f64::from(*x);
        nb += f64::from(*y) * f64::from(*y);
    }
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na.sqrt() * nb.sqrt())
    }
}

/// Mean over `from` of the best cosine match in `to`
fn greedy_match(from: &[Vec<f32>], to: &[Vec<f32>]) -> f64 {
    if from.is_empty() || to.is_empty() {
        return 0.0;
    }
    let total: f64 = from
        .iter()
        .map(|a| to.iter().map(|b| cosine(a, b)).fold(f64::MIN, f64::max))
        .sum();
    total / from.len() as f64
}

/// Greedy cosine matching over sentence embeddings
pub struct EmbeddingScorer {
    embedder: Arc<dyn Embedder>,
}

impl EmbeddingScorer {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self { embedder }
    }
}

#[async_trait]
impl SimilarityScorer for EmbeddingScorer {
    fn name(&self) -> &str {
        "embedding"
    }

    #[instrument(skip(self, pairs), fields(embedder = %self.embedder.name(), pairs = pairs.len()))]
    async fn score_batch(
        &self,
        pairs: &[(String, String)],
        _language: ScoreLanguage,
    ) -> Result<Vec<SimilarityScore>> {
        // Flatten every segment of the batch into one embedding call
        let mut inputs = Vec::new();
        let mut spans = Vec::with_capacity(pairs.len());
        for (candidate, reference) in pairs {
            let cand = segments(candidate);
            let refs = segments(reference);
            let start = inputs.len();
            let (nc, nr) = (cand.len(), refs.len());
            inputs.extend(cand);
            inputs.extend(refs);
            spans.push((start, nc, nr));
        }

        let vectors = self.embedder.embed(&inputs).await?;
        if vectors.len() != inputs.len() {
            anyhow::bail!(
                "Embedder returned {} vectors for {} segments",
                vectors.len(),
                inputs.len()
            );
        }

        Ok(spans
            .into_iter()
            .map(|(start, nc, nr)| {
                let cand = &vectors[start..start + nc];
                let refs = &vectors[start + nc..start + nc + nr];
                SimilarityScore::from_precision_recall(
                    greedy_match(cand, refs),
                    greedy_match(refs, cand),
                )
            })
            .collect())
    }
}

/// Counts from one backfill pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackfillStats {
    pub scored: usize,
    pub failed: usize,
    pub appended: usize,
}

/// Score `pending` in batches and patch each row's similarity columns
#[instrument(skip_all, fields(scorer = scorer.name(), pending = pending.len(), batch_size = batch_size))]
pub async fn backfill_similarity(
    store: &RecordStore<NarrativeRecord>,
    scorer: &dyn SimilarityScorer,
    pending: Vec<NarrativeRecord>,
    batch_size: usize,
    language: ScoreLanguage,
) -> Result<BackfillStats> {
    let mut stats = BackfillStats::default();
    if pending.is_empty() {
        return Ok(stats);
    }

    for batch in pending.chunks(batch_size.max(1)) {
        let pairs: Vec<(String, String)> = batch
            .iter()
            .map(|r| (r.candidate.clone(), r.reference.clone()))
            .collect();

        let scores = match scorer.score_batch(&pairs, language).await {
            Ok(scores) if scores.len() == batch.len() => scores,
            Ok(scores) => {
                warn!(
                    expected = batch.len(),
                    got = scores.len(),
                    "Similarity batch size mismatch, leaving rows for a later pass"
                );
                stats.failed += batch.len();
                continue;
            }
            Err(e) => {
                warn!(error = %e, size = batch.len(), "Similarity batch failed, leaving rows for a later pass");
                stats.failed += batch.len();
                continue;
            }
        };

        for (record, score) in batch.iter().zip(scores) {
            let mut updated = record.clone();
            updated.bert_precision = Some(score.precision);
            updated.bert_recall = Some(score.recall);
            updated.bert_f1 = Some(score.f1);

            if store.patch(&updated, &SIMILARITY_COLUMNS)? == PatchOutcome::Appended {
                stats.appended += 1;
            }
            stats.scored += 1;
            debug!(
                id = %record.id,
                precision = score.precision,
                recall = score.recall,
                f1 = score.f1,
                "Patched similarity"
            );
        }
    }

    info!(scored = stats.scored, failed = stats.failed, "Similarity backfill finished");
    Ok(stats)
}
