//! Narrative generation with two-stage scoring.
//!
//! A row is written once the generator produced a narrative; the judge score
//! rides along when the judge answers in time. With a scorer attached, new
//! rows are queued and their similarity columns patched each time a full
//! batch is waiting, with the remainder flushed when the run ends.
//! [`score_pending`] sweeps up rows left unscored by earlier runs.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{language_from_version, model_file_stem, CallContext, NarrativeFields};
use crate::adapters::SplitPreference;
use crate::core::{
    apply_think, backfill_similarity, invoke, BackfillStats, JudgeScore, NarrativeAnswer,
    NarrativeReport, PromptError, RecordStore, SampleError, ScoreLanguage, SimilarityScorer,
    SummaryStats, Task, Template,
};
use crate::domain::{content_id, NarrativeRecord, Sample};

/// Similarity scoring interleaved with generation
struct InlineScoring {
    scorer: Arc<dyn SimilarityScorer>,
    batch_size: usize,
    pending: Mutex<Vec<NarrativeRecord>>,
}

impl InlineScoring {
    async fn score(
        &self,
        store: &RecordStore<NarrativeRecord>,
        batch: Vec<NarrativeRecord>,
        language: ScoreLanguage,
    ) -> Result<()> {
        backfill_similarity(store, self.scorer.as_ref(), batch, self.batch_size, language).await?;
        Ok(())
    }
}

pub struct NarrativeTask {
    generator: CallContext,
    judge: CallContext,
    generation: Template,
    evaluation: Template,
    language: String,
    fields: NarrativeFields,
    similarity: Option<InlineScoring>,
}

impl NarrativeTask {
    /// The judge never gets the no-think prefix, whatever `judge.think` says.
    pub fn new(
        generator: CallContext,
        judge: CallContext,
        generation: Template,
        evaluation: Template,
    ) -> Result<Self, PromptError> {
        generation.validate_fields(&["text"])?;
        evaluation.validate_fields(&["candidate", "reference"])?;

        if generation.language != evaluation.language {
            warn!(
                generation = %generation.name,
                evaluation = %evaluation.name,
                "Generation and evaluation templates use different languages"
            );
        }

        let language = reference_language(&generation).to_string();
        let fields = NarrativeFields::for_language(&language).unwrap_or_else(|| {
            warn!(%language, "Unknown narrative language, using English references");
            NarrativeFields::default()
        });

        Ok(Self {
            generator,
            judge,
            generation,
            evaluation,
            language,
            fields,
            similarity: None,
        })
    }

    /// Score new rows in batches of `batch_size` while the run is going
    pub fn with_similarity(mut self, scorer: Arc<dyn SimilarityScorer>, batch_size: usize) -> Self {
        self.similarity = Some(InlineScoring {
            scorer,
            batch_size: batch_size.max(1),
            pending: Mutex::new(Vec::new()),
        });
        self
    }

    /// Language tag the references are drawn in
    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn score_language(&self) -> ScoreLanguage {
        ScoreLanguage::from_tag(&self.language)
    }

    pub fn split() -> SplitPreference {
        SplitPreference::named("test")
    }

    pub fn store_file(dir: &Path, model: &str, generation: &str, evaluation: &str) -> PathBuf {
        dir.join(format!(
            "gen_{}_prompt_{}_eval_{}.tsv",
            model_file_stem(model),
            generation,
            evaluation
        ))
    }

    /// Stage one of scoring; `None` when the judge never gave a usable score
    async fn judge_score(&self, id: &str, candidate: &str, reference: &str) -> Option<i64> {
        let fields = BTreeMap::from([
            ("candidate", candidate.to_string()),
            ("reference", reference.to_string()),
        ]);
        let prompt = match self.evaluation.render(&fields) {
            Ok(prompt) => prompt,
            Err(e) => {
                warn!(%id, error = %e, "Failed to render judge prompt");
                return None;
            }
        };

        match invoke(
            self.judge.backend.as_ref(),
            &prompt,
            &self.judge.policy,
            id,
            |answer: JudgeScore| Ok(answer.score),
        )
        .await
        {
            Ok(score) => Some(score),
            Err(failure) => {
                warn!(%id, error = %failure, "Judge failed, storing row without a judge score");
                None
            }
        }
    }
}

/// Language of the references: the version suffix, else the template's tag
pub fn reference_language(generation: &Template) -> &str {
    language_from_version(&generation.name).unwrap_or(generation.language.as_str())
}

/// Collapse runs of whitespace to single spaces
fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[async_trait]
impl Task for NarrativeTask {
    type Record = NarrativeRecord;

    fn name(&self) -> &str {
        "narrative"
    }

    fn sample_id(&self, sample: &Sample) -> String {
        if sample.source_id.is_empty() {
            content_id(&sample.text)
        } else {
            sample.source_id.clone()
        }
    }

    async fn process(&self, id: &str, sample: &Sample) -> Result<NarrativeRecord, SampleError> {
        let reference = sample.field(self.fields.positive).ok_or_else(|| {
            SampleError::Data(format!(
                "Missing reference narrative '{}'",
                self.fields.positive
            ))
        })?;

        let fields = BTreeMap::from([("text", sample.text.replace('\n', " "))]);
        let prompt = self
            .generation
            .render(&fields)
            .map_err(|e| SampleError::Data(e.to_string()))?;
        let prompt = apply_think(&prompt, self.generator.think);

        let candidate = invoke(
            self.generator.backend.as_ref(),
            &prompt,
            &self.generator.policy,
            id,
            |answer: NarrativeAnswer| {
                let narrative = collapse_whitespace(&answer.narrative);
                if narrative.is_empty() {
                    Err("Empty narrative".to_string())
                } else {
                    Ok(narrative)
                }
            },
        )
        .await?;

        let mut record = NarrativeRecord::new(id, sample.text.as_str(), reference, candidate.as_str());
        record.geval_score = self.judge_score(id, &candidate, reference).await;
        Ok(record)
    }

    async fn after_append(
        &self,
        store: &RecordStore<NarrativeRecord>,
        record: &NarrativeRecord,
    ) -> Result<()> {
        let Some(inline) = &self.similarity else {
            return Ok(());
        };

        let batch = {
            let mut pending = inline.pending.lock().await;
            pending.push(record.clone());
            if pending.len() < inline.batch_size {
                return Ok(());
            }
            std::mem::take(&mut *pending)
        };

        debug!(size = batch.len(), "Similarity batch full");
        inline.score(store, batch, self.score_language()).await
    }

    async fn finish(&self, store: &RecordStore<NarrativeRecord>) -> Result<()> {
        let Some(inline) = &self.similarity else {
            return Ok(());
        };

        let batch = std::mem::take(&mut *inline.pending.lock().await);
        if batch.is_empty() {
            return Ok(());
        }
        inline.score(store, batch, self.score_language()).await
    }
}

/// Score every row of `store` still missing similarity columns
pub async fn score_pending(
    store: &RecordStore<NarrativeRecord>,
    scorer: &dyn SimilarityScorer,
    batch_size: usize,
    language: ScoreLanguage,
) -> Result<BackfillStats> {
    let _lock = store.lock()?;

    let pending: Vec<NarrativeRecord> = store
        .load()?
        .into_iter()
        .filter(NarrativeRecord::needs_similarity)
        .collect();
    info!(pending = pending.len(), "Rows awaiting similarity scores");

    backfill_similarity(store, scorer, pending, batch_size, language).await
}

/// Judge and similarity statistics over a narrative store
pub fn evaluate(store: &RecordStore<NarrativeRecord>) -> Result<Option<NarrativeReport>> {
    let records = store.load()?;
    if records.is_empty() {
        return Ok(None);
    }

    let judge: Vec<f64> = records
        .iter()
        .filter_map(|r| r.geval_score)
        .map(|s| s as f64)
        .collect();
    let f1: Vec<f64> = records.iter().filter_map(|r| r.bert_f1).collect();
    let recall: Vec<f64> = records.iter().filter_map(|r| r.bert_recall).collect();

    Ok(Some(NarrativeReport {
        total: records.len(),
        judge: SummaryStats::from_values(&judge),
        similarity_f1: SummaryStats::from_values(&f1),
        similarity_recall: SummaryStats::from_values(&recall),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{Backend, BackendError, Completion, CompletionRequest};
    use crate::core::{PromptCatalog, RetryPolicy, TaskKind};
    use std::sync::{Arc, Mutex};

    struct Recorder {
        reply: String,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Backend for Recorder {
        fn name(&self) -> &str {
            "stub"
        }

        async fn complete(&self, request: &CompletionRequest<'_>) -> Result<Completion, BackendError> {
            self.prompts.lock().unwrap().push(request.prompt.to_string());
            Ok(Completion::new(self.reply.clone()))
        }
    }

    fn recorder(reply: &str) -> Arc<Recorder> {
        Arc::new(Recorder {
            reply: reply.to_string(),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn task(generator: Arc<Recorder>, judge: Arc<Recorder>, version: &str) -> NarrativeTask {
        let catalog = PromptCatalog::builtin().unwrap();
        let generation = catalog.get(TaskKind::NarrativeGeneration, version).unwrap().clone();
        let evaluation = catalog.get(TaskKind::NarrativeEvaluation, "v1_en").unwrap().clone();
        NarrativeTask::new(
            CallContext::new(generator, RetryPolicy::immediate(2), false),
            CallContext::new(judge, RetryPolicy::immediate(2), false),
            generation,
            evaluation,
        )
        .unwrap()
    }

    fn sample() -> Sample {
        Sample::new("n-1", "Line one\nline two")
            .with_field("pos_en", "A joke about effort.")
            .with_field("pos_tc", "關於努力的笑話。")
    }

    #[tokio::test]
    async fn test_process_writes_judge_score() {
        let generator = recorder(r#"{"narrative": "  It mocks\n effort. "}"#);
        let judge = recorder(r#"{"score": 4}"#);
        let task = task(generator.clone(), judge.clone(), "v1_en");

        let record = task.process("n-1", &sample()).await.unwrap();
        assert_eq!(record.candidate, "It mocks effort.");
        assert_eq!(record.reference, "A joke about effort.");
        assert_eq!(record.geval_score, Some(4));
        assert!(record.needs_similarity());

        let gen_prompt = generator.prompts.lock().unwrap()[0].clone();
        assert!(gen_prompt.starts_with("/set nothink "));
        assert!(gen_prompt.contains("Line one line two"));

        let judge_prompt = judge.prompts.lock().unwrap()[0].clone();
        assert!(!judge_prompt.starts_with("/set nothink "));
        assert!(judge_prompt.contains("It mocks effort."));
        assert!(judge_prompt.contains("A joke about effort."));
    }

    #[tokio::test]
    async fn test_judge_failure_keeps_row() {
        let generator = recorder(r#"{"narrative": "It mocks effort."}"#);
        let judge = recorder("not json");
        let task = task(generator, judge.clone(), "v1_en");

        let record = task.process("n-1", &sample()).await.unwrap();
        assert_eq!(record.geval_score, None);
        assert_eq!(judge.prompts.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_blank_narrative_is_rejected() {
        let generator = recorder(r#"{"narrative": " \n\t "}"#);
        let judge = recorder(r#"{"score": 4}"#);
        let task = task(generator, judge.clone(), "v1_en");

        assert!(matches!(
            task.process("n-1", &sample()).await,
            Err(SampleError::Invoke(_))
        ));
        assert!(judge.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reference_follows_version_language() {
        let generator = recorder(r#"{"narrative": "諷刺努力。"}"#);
        let judge = recorder(r#"{"score": 3}"#);
        let task = task(generator, judge, "v2_zh_tw");
        assert_eq!(task.language(), "zh_tw");
        assert_eq!(task.score_language(), ScoreLanguage::Zh);

        let record = task.process("n-1", &sample()).await.unwrap();
        assert_eq!(record.reference, "關於努力的笑話。");
    }

    #[tokio::test]
    async fn test_missing_reference_skips() {
        let task = task(recorder("{}"), recorder("{}"), "v1_en");
        let sample = Sample::new("n-2", "text");
        assert!(matches!(
            task.process("n-2", &sample).await,
            Err(SampleError::Data(_))
        ));
    }

    #[test]
    fn test_store_file() {
        assert_eq!(
            NarrativeTask::store_file(Path::new("out"), "openai/gpt-4o", "v1_en", "v1_en"),
            PathBuf::from("out/gen_gpt-4o_prompt_v1_en_eval_v1_en.tsv")
        );
    }
}
