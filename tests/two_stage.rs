//! Two-Stage Scoring Integration Tests
//!
//! Tests for the narrative flow: rows are written with the judge score and
//! the similarity columns are patched in afterwards.

use anyhow::{bail, Result};
use async_trait::async_trait;
use drivel_bench::adapters::{Backend, BackendError, Completion, CompletionRequest};
use drivel_bench::core::{
    run, LexicalScorer, PromptCatalog, RecordStore, RetryPolicy, RunOptions, ScoreLanguage,
    SimilarityScore, SimilarityScorer, TaskKind,
};
use drivel_bench::domain::{NarrativeRecord, Sample};
use drivel_bench::tasks::narrative::{evaluate, score_pending};
use drivel_bench::tasks::{CallContext, NarrativeTask};
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

struct Fixed(&'static str);

#[async_trait]
impl Backend for Fixed {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn complete(&self, _request: &CompletionRequest<'_>) -> Result<Completion, BackendError> {
        Ok(Completion::new(self.0))
    }
}

/// Fails every batch
struct BrokenScorer;

#[async_trait]
impl SimilarityScorer for BrokenScorer {
    fn name(&self) -> &str {
        "broken"
    }

    async fn score_batch(
        &self,
        _pairs: &[(String, String)],
        _language: ScoreLanguage,
    ) -> Result<Vec<SimilarityScore>> {
        bail!("scorer offline")
    }
}

/// Constant scores, counting batches
struct CountingScorer {
    batches: Arc<AtomicUsize>,
}

#[async_trait]
impl SimilarityScorer for CountingScorer {
    fn name(&self) -> &str {
        "counting"
    }

    async fn score_batch(
        &self,
        pairs: &[(String, String)],
        _language: ScoreLanguage,
    ) -> Result<Vec<SimilarityScore>> {
        self.batches.fetch_add(1, Ordering::SeqCst);
        Ok(pairs
            .iter()
            .map(|_| SimilarityScore::from_precision_recall(0.5, 0.5))
            .collect())
    }
}

/// Generator that notes how many similarity batches had run at each call
struct Observing {
    batches: Arc<AtomicUsize>,
    seen: Mutex<Vec<usize>>,
}

#[async_trait]
impl Backend for Observing {
    fn name(&self) -> &str {
        "observing"
    }

    async fn complete(&self, _request: &CompletionRequest<'_>) -> Result<Completion, BackendError> {
        self.seen
            .lock()
            .unwrap()
            .push(self.batches.load(Ordering::SeqCst));
        Ok(Completion::new(r#"{"narrative": "Effort is mocked."}"#))
    }
}

fn narrative_task(judge_reply: &'static str) -> NarrativeTask {
    narrative_task_with(Arc::new(Fixed(r#"{"narrative": "Effort is mocked."}"#)), judge_reply)
}

fn narrative_task_with(generator: Arc<dyn Backend>, judge_reply: &'static str) -> NarrativeTask {
    let catalog = PromptCatalog::builtin().unwrap();
    NarrativeTask::new(
        CallContext::new(generator, RetryPolicy::immediate(2), false),
        CallContext::new(Arc::new(Fixed(judge_reply)), RetryPolicy::immediate(2), false),
        catalog.get(TaskKind::NarrativeGeneration, "v1_en").unwrap().clone(),
        catalog.get(TaskKind::NarrativeEvaluation, "v1_en").unwrap().clone(),
    )
    .unwrap()
}

fn samples(n: usize) -> Vec<Sample> {
    (0..n)
        .map(|i| {
            Sample::new(format!("s{}", i), format!("text {}", i))
                .with_field("pos_en", "Effort is mocked here.")
        })
        .collect()
}

#[tokio::test]
async fn test_rows_written_with_judge_score_then_backfilled() {
    let temp_dir = TempDir::new().unwrap();
    let store = RecordStore::<NarrativeRecord>::open(
        temp_dir.path().join("gen_gpt-4o-mini_prompt_v1_en_eval_v1_en.tsv"),
    );
    let task = narrative_task(r#"{"score": 4}"#);

    let summary = run(&task, &store, &samples(3), &RunOptions::default()).await.unwrap();
    assert_eq!(summary.processed(), 3);

    let before = store.load().unwrap();
    assert!(before.iter().all(|r| r.geval_score == Some(4) && r.needs_similarity()));

    let stats = score_pending(&store, &LexicalScorer, 2, ScoreLanguage::En)
        .await
        .unwrap();
    assert_eq!(stats.scored, 3);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.appended, 0);

    let after = store.load().unwrap();
    assert_eq!(after.len(), 3);
    for (old, new) in before.iter().zip(&after) {
        assert!(!new.needs_similarity());
        assert_eq!(new.id, old.id);
        assert_eq!(new.candidate, old.candidate);
        assert_eq!(new.geval_score, old.geval_score);
    }

    let report = evaluate(&store).unwrap().unwrap();
    assert_eq!(report.total, 3);
    assert_eq!(report.judge.as_ref().unwrap().mean, 4.0);
    assert_eq!(report.similarity_f1.as_ref().unwrap().count, 3);
}

#[tokio::test]
async fn test_judge_failure_still_writes_row() {
    let temp_dir = TempDir::new().unwrap();
    let store = RecordStore::<NarrativeRecord>::open(temp_dir.path().join("n.tsv"));
    let task = narrative_task("no score today");

    let summary = run(&task, &store, &samples(1), &RunOptions::default()).await.unwrap();
    assert_eq!(summary.processed(), 1);
    assert_eq!(summary.failed, 0);

    let rows = store.load().unwrap();
    assert_eq!(rows[0].geval_score, None);
    assert!(evaluate(&store).unwrap().unwrap().judge.is_none());
}

#[tokio::test]
async fn test_failed_batch_leaves_rows_eligible() {
    let temp_dir = TempDir::new().unwrap();
    let store = RecordStore::<NarrativeRecord>::open(temp_dir.path().join("n.tsv"));
    let task = narrative_task(r#"{"score": 2}"#);
    run(&task, &store, &samples(2), &RunOptions::default()).await.unwrap();

    let stats = score_pending(&store, &BrokenScorer, 10, ScoreLanguage::En)
        .await
        .unwrap();
    assert_eq!(stats.scored, 0);
    assert_eq!(stats.failed, 2);
    assert!(store.load().unwrap().iter().all(NarrativeRecord::needs_similarity));

    let stats = score_pending(&store, &LexicalScorer, 10, ScoreLanguage::En)
        .await
        .unwrap();
    assert_eq!(stats.scored, 2);
}

#[tokio::test]
async fn test_rows_from_earlier_runs_join_the_next_batch() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("n.tsv");

    // A short row from an interrupted earlier run: no score columns at all
    fs::write(
        &path,
        "id\ttext\treference\tcandidate\tgeval_score\tbert_precision\tbert_recall\tbert_f1\n\
         old\tolder text\tref\tcand\n",
    )
    .unwrap();

    let store = RecordStore::<NarrativeRecord>::open(&path);
    let task = narrative_task(r#"{"score": 5}"#);
    let summary = run(&task, &store, &samples(3), &RunOptions::default()).await.unwrap();
    assert_eq!(summary.processed(), 3);

    let scorer = CountingScorer {
        batches: Arc::new(AtomicUsize::new(0)),
    };
    let stats = score_pending(&store, &scorer, 2, ScoreLanguage::En).await.unwrap();
    assert_eq!(stats.scored, 4);
    assert_eq!(scorer.batches.load(Ordering::SeqCst), 2);

    let content = fs::read_to_string(&path).unwrap();
    let old_row: Vec<&str> = content.lines().nth(1).unwrap().split('\t').collect();
    assert_eq!(old_row.len(), 8);
    assert_eq!(old_row[..5], ["old", "older text", "ref", "cand", ""]);
    for value in &old_row[5..] {
        assert_eq!(value.parse::<f64>().unwrap(), 0.5);
    }

    // Nothing left to score
    let stats = score_pending(&store, &scorer, 2, ScoreLanguage::En).await.unwrap();
    assert_eq!(stats.scored, 0);
    assert_eq!(scorer.batches.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_similarity_batches_fire_during_generation() {
    let temp_dir = TempDir::new().unwrap();
    let store = RecordStore::<NarrativeRecord>::open(temp_dir.path().join("n.tsv"));

    let batches = Arc::new(AtomicUsize::new(0));
    let generator = Arc::new(Observing {
        batches: batches.clone(),
        seen: Mutex::new(Vec::new()),
    });
    let scorer = Arc::new(CountingScorer {
        batches: batches.clone(),
    });
    let task = narrative_task_with(generator.clone(), r#"{"score": 3}"#).with_similarity(scorer, 2);

    let summary = run(&task, &store, &samples(3), &RunOptions::default()).await.unwrap();
    assert_eq!(summary.processed(), 3);

    // Rows 1-2 were scored before sample 3 was generated
    assert_eq!(*generator.seen.lock().unwrap(), vec![0, 0, 1]);

    // The leftover row is flushed when the run ends
    assert_eq!(batches.load(Ordering::SeqCst), 2);
    let rows = store.load().unwrap();
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|r| !r.needs_similarity() && r.geval_score == Some(3)));

    let stats = score_pending(&store, &LexicalScorer, 2, ScoreLanguage::En)
        .await
        .unwrap();
    assert_eq!(stats.scored, 0);
}
