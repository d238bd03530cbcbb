//! Multi-label rhetorical category tagging.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;

use super::{store_path, CallContext};
use crate::adapters::SplitPreference;
use crate::core::{
    apply_think, invoke, MultiLabelReport, PromptError, ReasonedAnswer, RecordStore, SampleError,
    Task, Template,
};
use crate::domain::{
    categories_lenient, content_id, join_categories, parse_categories, Category, Sample,
    TaggingRecord,
};

/// Length of a content-derived id; dataset ids of this length are kept
const ID_LEN: usize = 16;

pub struct TaggingTask {
    ctx: CallContext,
    template: Template,
}

impl TaggingTask {
    pub fn new(ctx: CallContext, template: Template) -> Result<Self, PromptError> {
        template.validate_fields(&["text"])?;
        Ok(Self { ctx, template })
    }

    pub fn split() -> SplitPreference {
        SplitPreference::TrainOrFirst
    }

    pub fn store_file(dir: &Path, model: &str, version: &str) -> PathBuf {
        store_path(dir, model, version, "_multilabel")
    }
}

#[async_trait]
impl Task for TaggingTask {
    type Record = TaggingRecord;

    fn name(&self) -> &str {
        "tagging"
    }

    fn sample_id(&self, sample: &Sample) -> String {
        if sample.source_id.chars().count() == ID_LEN {
            sample.source_id.clone()
        } else {
            content_id(&sample.text)
        }
    }

    async fn process(&self, id: &str, sample: &Sample) -> Result<TaggingRecord, SampleError> {
        if sample.taggings.is_empty() {
            return Err(SampleError::Data("Sample has no taggings".to_string()));
        }
        let ground_truth = sample.taggings.join(", ");

        let fields = BTreeMap::from([("text", sample.text.clone())]);
        let prompt = self
            .template
            .render(&fields)
            .map_err(|e| SampleError::Data(e.to_string()))?;
        let prompt = apply_think(&prompt, self.ctx.think);

        let (categories, reason) = invoke(
            self.ctx.backend.as_ref(),
            &prompt,
            &self.ctx.policy,
            id,
            |answer: ReasonedAnswer| {
                let categories = parse_categories(&answer.answer).map_err(|e| e.to_string())?;
                Ok((categories, answer.reason))
            },
        )
        .await?;

        Ok(TaggingRecord {
            id: id.to_string(),
            text: sample.text.clone(),
            reason,
            ground_truth,
            prediction: join_categories(&categories),
        })
    }
}

/// Multi-label metrics over a tagging store.
///
/// Stored values are parsed leniently: case is ignored and unknown names are
/// dropped, so hand-edited or older stores still evaluate.
pub fn evaluate(store: &RecordStore<TaggingRecord>) -> Result<Option<MultiLabelReport>> {
    let rows: Vec<(BTreeSet<Category>, BTreeSet<Category>)> = store
        .load()?
        .iter()
        .map(|r| (categories_lenient(&r.ground_truth), categories_lenient(&r.prediction)))
        .collect();
    Ok(MultiLabelReport::from_sets(&rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{Backend, BackendError, Completion, CompletionRequest};
    use crate::core::{InvokeError, PromptCatalog, RetryPolicy, TaskKind};
    use std::sync::{Arc, Mutex};

    struct Scripted(Mutex<Vec<&'static str>>);

    #[async_trait]
    impl Backend for Scripted {
        fn name(&self) -> &str {
            "stub"
        }

        async fn complete(&self, _request: &CompletionRequest<'_>) -> Result<Completion, BackendError> {
            Ok(Completion::new(self.0.lock().unwrap().remove(0)))
        }
    }

    fn task(replies: Vec<&'static str>, attempts: u32) -> TaggingTask {
        let template = PromptCatalog::builtin()
            .unwrap()
            .get(TaskKind::Tagging, "v1_en")
            .unwrap()
            .clone();
        let ctx = CallContext::new(
            Arc::new(Scripted(Mutex::new(replies))),
            RetryPolicy::immediate(attempts),
            false,
        );
        TaggingTask::new(ctx, template).unwrap()
    }

    fn sample() -> Sample {
        Sample::new("0123456789abcdef", "Cats are dogs that gave up.").with_taggings(["inversion", "wordplay"])
    }

    #[tokio::test]
    async fn test_accepts_mixed_case_categories() {
        let task = task(vec![r#"{"answer": "inversion, WORDPLAY", "reason": "r"}"#], 1);
        let record = task.process("0123456789abcdef", &sample()).await.unwrap();

        assert_eq!(record.ground_truth, "inversion, wordplay");
        assert_eq!(record.prediction, "inversion, wordplay");
        assert_eq!(record.reason, "r");
    }

    #[tokio::test]
    async fn test_rejects_unknown_category() {
        let task = task(
            vec![
                r#"{"answer": "invention", "reason": "r"}"#,
                r#"{"answer": "paradox", "reason": "r2"}"#,
            ],
            2,
        );
        let record = task.process("x", &sample()).await.unwrap();
        assert_eq!(record.prediction, "paradox");
        assert_eq!(record.reason, "r2");
    }

    #[tokio::test]
    async fn test_unknown_category_exhausts_retries() {
        let task = task(vec![r#"{"answer": "invention", "reason": "r"}"#], 1);
        match task.process("x", &sample()).await {
            Err(SampleError::Invoke(failure)) => {
                assert_eq!(failure.attempts, 1);
                assert!(matches!(failure.last_error, InvokeError::Invalid(_)));
            }
            _ => panic!("expected invoke failure"),
        }
    }

    #[tokio::test]
    async fn test_missing_taggings_skips() {
        let task = task(vec![], 1);
        let sample = Sample::new("0123456789abcdef", "text");
        assert!(matches!(
            task.process("x", &sample).await,
            Err(SampleError::Data(_))
        ));
    }

    #[test]
    fn test_sample_id_policy() {
        let task = task(vec![], 1);
        assert_eq!(task.sample_id(&sample()), "0123456789abcdef");

        let short = Sample::new("42", "Cats are dogs that gave up.");
        assert_eq!(task.sample_id(&short), content_id("Cats are dogs that gave up."));
    }

    #[test]
    fn test_store_file() {
        assert_eq!(
            TaggingTask::store_file(Path::new("out"), "qwen/qwen3:8b", "v1_en"),
            PathBuf::from("out/qwen3-8b_v1_en_multilabel.tsv")
        );
    }
}
