//! Multiple-choice narrative selection.
//!
//! The easy variant shuffles the true narrative among four distractors and
//! asks for its letter. The hard variant drops the true narrative, shuffles
//! the four distractors into A-D and expects "None of the above" (E).
//! Option order comes from an RNG seeded with the sample id, so a rerun
//! presents every sample exactly as before.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;
use rand::seq::SliceRandom;
use tracing::warn;

use super::{sample_rng, store_path, CallContext, NarrativeFields};
use crate::adapters::SplitPreference;
use crate::core::{
    apply_think, invoke, ChoiceAnswer, ClassificationReport, PromptError, RecordStore,
    SampleError, Task, TaskKind, Template,
};
use crate::domain::{content_id, ChoiceLetter, McqaRecord, Record, Sample};

/// Multiple-choice task presenting `N` narratives (5 = easy, 4 = hard)
pub struct McqaTask<const N: usize> {
    ctx: CallContext,
    template: Template,
    fields: NarrativeFields,
}

pub type McqaEasyTask = McqaTask<5>;
pub type McqaHardTask = McqaTask<4>;

impl<const N: usize> McqaTask<N> {
    /// The true narrative is among the options only in the easy variant
    const INCLUDES_POSITIVE: bool = N == 5;

    pub fn new(ctx: CallContext, template: Template) -> Result<Self, PromptError> {
        let placeholders: Vec<String> = (1..=N).map(|i| format!("narrative_{}", i)).collect();
        let mut available: Vec<&str> = placeholders.iter().map(String::as_str).collect();
        available.push("text");
        template.validate_fields(&available)?;

        let fields = NarrativeFields::for_language(&template.language).unwrap_or_else(|| {
            warn!(
                language = %template.language,
                "Unknown template language, using English narratives"
            );
            NarrativeFields::default()
        });

        Ok(Self {
            ctx,
            template,
            fields,
        })
    }

    pub fn kind() -> TaskKind {
        if Self::INCLUDES_POSITIVE {
            TaskKind::McqaEasy
        } else {
            TaskKind::McqaHard
        }
    }

    pub fn split() -> SplitPreference {
        SplitPreference::TrainOrFirst
    }

    pub fn store_file(dir: &Path, model: &str, version: &str) -> PathBuf {
        store_path(dir, model, version, "_results")
    }

    /// Shuffled options and the letter of the correct one
    fn arrange(&self, id: &str, sample: &Sample) -> Result<(Vec<String>, ChoiceLetter), SampleError> {
        let lookup = |name: &str| {
            sample
                .field(name)
                .map(str::to_string)
                .ok_or_else(|| SampleError::Data(format!("Missing narrative field '{}'", name)))
        };

        // (is_positive, narrative)
        let mut options: Vec<(bool, String)> = Vec::with_capacity(5);
        if Self::INCLUDES_POSITIVE {
            options.push((true, lookup(self.fields.positive)?));
        }
        for name in self.fields.negatives {
            options.push((false, lookup(name)?));
        }

        options.shuffle(&mut sample_rng(id));

        let answer = if Self::INCLUDES_POSITIVE {
            options
                .iter()
                .position(|(positive, _)| *positive)
                .and_then(ChoiceLetter::from_index)
        } else {
            Some(ChoiceLetter::E)
        };
        let answer = answer
            .ok_or_else(|| SampleError::Data("Could not place the true narrative".to_string()))?;

        Ok((options.into_iter().map(|(_, text)| text).collect(), answer))
    }
}

#[async_trait]
impl<const N: usize> Task for McqaTask<N>
where
    McqaRecord<N>: Record + Send + Sync,
{
    type Record = McqaRecord<N>;

    fn name(&self) -> &str {
        Self::kind().as_str()
    }

    fn sample_id(&self, sample: &Sample) -> String {
        if sample.source_id.is_empty() {
            content_id(&sample.text)
        } else {
            sample.source_id.clone()
        }
    }

    async fn process(&self, id: &str, sample: &Sample) -> Result<McqaRecord<N>, SampleError> {
        let (options, truth) = self.arrange(id, sample)?;

        let mut fields = BTreeMap::new();
        fields.insert("text", sample.text.clone());
        let names: Vec<String> = (1..=N).map(|i| format!("narrative_{}", i)).collect();
        for (name, option) in names.iter().zip(&options) {
            fields.insert(name.as_str(), option.clone());
        }

        let prompt = self
            .template
            .render(&fields)
            .map_err(|e| SampleError::Data(e.to_string()))?;
        let prompt = apply_think(&prompt, self.ctx.think);

        let prediction = invoke(
            self.ctx.backend.as_ref(),
            &prompt,
            &self.ctx.policy,
            id,
            |answer: ChoiceAnswer| {
                answer
                    .answer
                    .parse::<ChoiceLetter>()
                    .map_err(|e| e.to_string())
            },
        )
        .await?;

        Ok(McqaRecord {
            id: id.to_string(),
            text: sample.text.clone(),
            options,
            ground_truth: truth.to_string(),
            prediction: prediction.to_string(),
        })
    }
}

/// Accuracy, macro metrics and the A-E confusion matrix over a store
pub fn evaluate<const N: usize>(
    store: &RecordStore<McqaRecord<N>>,
) -> Result<Option<ClassificationReport>>
where
    McqaRecord<N>: Record,
{
    let pairs: Vec<(String, String)> = store
        .load()?
        .into_iter()
        .map(|r| (r.ground_truth, r.prediction))
        .collect();
    Ok(ClassificationReport::from_pairs(&pairs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{Backend, BackendError, Completion, CompletionRequest};
    use crate::core::{PromptCatalog, RetryPolicy};
    use std::sync::{Arc, Mutex};

    struct Fixed {
        reply: String,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Backend for Fixed {
        fn name(&self) -> &str {
            "stub"
        }

        async fn complete(&self, request: &CompletionRequest<'_>) -> Result<Completion, BackendError> {
            self.prompts.lock().unwrap().push(request.prompt.to_string());
            Ok(Completion::new(self.reply.clone()))
        }
    }

    fn backend(reply: &str) -> Arc<Fixed> {
        Arc::new(Fixed {
            reply: reply.to_string(),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn template(kind: TaskKind, version: &str) -> Template {
        PromptCatalog::builtin().unwrap().get(kind, version).unwrap().clone()
    }

    fn sample() -> Sample {
        Sample::new("s-1", "He saved money by not buying a piggy bank.")
            .with_field("pos_en", "TRUE")
            .with_field("neg_en_1", "N1")
            .with_field("neg_en_2", "N2")
            .with_field("neg_en_3", "N3")
            .with_field("neg_en_4", "N4")
            .with_field("pos_tc", "真")
            .with_field("neg_tc_1", "假1")
            .with_field("neg_tc_2", "假2")
            .with_field("neg_tc_3", "假3")
            .with_field("neg_tc_4", "假4")
    }

    #[tokio::test]
    async fn test_easy_answer_points_at_positive() {
        let stub = backend(r#"{"answer": " b "}"#);
        let ctx = CallContext::new(stub.clone(), RetryPolicy::immediate(1), true);
        let task = McqaEasyTask::new(ctx, template(TaskKind::McqaEasy, "v1_en")).unwrap();

        let record = task.process("s-1", &sample()).await.unwrap();
        assert_eq!(record.options.len(), 5);
        let truth: ChoiceLetter = record.ground_truth.parse().unwrap();
        let index = ChoiceLetter::ALL.iter().position(|l| *l == truth).unwrap();
        assert_eq!(record.options[index], "TRUE");
        assert_eq!(record.prediction, "B");

        let prompt = stub.prompts.lock().unwrap()[0].clone();
        for option in &record.options {
            assert!(prompt.contains(option.as_str()));
        }
    }

    #[tokio::test]
    async fn test_shuffle_is_stable_per_id() {
        let stub = backend(r#"{"answer": "A"}"#);
        let ctx = CallContext::new(stub, RetryPolicy::immediate(1), true);
        let task = McqaEasyTask::new(ctx, template(TaskKind::McqaEasy, "v1_en")).unwrap();

        let first = task.process("s-1", &sample()).await.unwrap();
        let second = task.process("s-1", &sample()).await.unwrap();
        assert_eq!(first.options, second.options);
        assert_eq!(first.ground_truth, second.ground_truth);
    }

    #[tokio::test]
    async fn test_hard_excludes_positive() {
        let stub = backend(r#"{"answer": "E"}"#);
        let ctx = CallContext::new(stub, RetryPolicy::immediate(1), true);
        let task = McqaHardTask::new(ctx, template(TaskKind::McqaHard, "v1_zh_tw")).unwrap();

        let record = task.process("s-1", &sample()).await.unwrap();
        assert_eq!(record.options.len(), 4);
        assert!(!record.options.contains(&"真".to_string()));
        assert!(record.options.iter().all(|o| o.starts_with("假")));
        assert_eq!(record.ground_truth, "E");
        assert_eq!(record.prediction, "E");
    }

    #[tokio::test]
    async fn test_missing_distractor_is_data_error() {
        let stub = backend(r#"{"answer": "E"}"#);
        let ctx = CallContext::new(stub.clone(), RetryPolicy::immediate(1), true);
        let task = McqaHardTask::new(ctx, template(TaskKind::McqaHard, "v1_en")).unwrap();

        let sample = Sample::new("s-2", "text").with_field("neg_en_1", "N1");
        assert!(matches!(
            task.process("s-2", &sample).await,
            Err(SampleError::Data(_))
        ));
        assert!(stub.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_letter_fails() {
        let stub = backend(r#"{"answer": "F"}"#);
        let ctx = CallContext::new(stub, RetryPolicy::immediate(2), true);
        let task = McqaEasyTask::new(ctx, template(TaskKind::McqaEasy, "v1_en")).unwrap();

        match task.process("s-1", &sample()).await {
            Err(SampleError::Invoke(failure)) => assert_eq!(failure.attempts, 2),
            _ => panic!("expected invoke failure"),
        }
    }

    #[test]
    fn test_hard_template_rejected_for_easy_task() {
        let stub = backend("{}");
        let ctx = CallContext::new(stub, RetryPolicy::immediate(1), true);
        // Easy templates use narrative_5, which the hard task cannot fill
        assert!(matches!(
            McqaHardTask::new(ctx, template(TaskKind::McqaEasy, "v1_en")),
            Err(PromptError::MissingField { .. })
        ));
    }

    #[test]
    fn test_sample_id_falls_back_to_hash() {
        let stub = backend("{}");
        let ctx = CallContext::new(stub, RetryPolicy::immediate(1), true);
        let task = McqaEasyTask::new(ctx, template(TaskKind::McqaEasy, "v1_en")).unwrap();
        assert_eq!(task.sample_id(&sample()), "s-1");
        assert_eq!(task.sample_id(&Sample::new("", "abc")), content_id("abc"));
    }
}
