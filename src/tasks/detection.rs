//! Binary Drivelology detection.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;

use super::{store_path, CallContext};
use crate::adapters::SplitPreference;
use crate::core::{
    apply_think, invoke, ClassificationReport, PromptError, ReasonedAnswer, RecordStore,
    SampleError, Task, Template,
};
use crate::domain::{content_id, DetectionLabel, DetectionRecord, Sample};

pub struct DetectionTask {
    ctx: CallContext,
    template: Template,
}

impl DetectionTask {
    /// Fails when the template needs anything beyond `{text}`
    pub fn new(ctx: CallContext, template: Template) -> Result<Self, PromptError> {
        template.validate_fields(&["text"])?;
        Ok(Self { ctx, template })
    }

    pub fn split() -> SplitPreference {
        SplitPreference::named("test")
    }

    pub fn store_file(dir: &Path, model: &str, version: &str) -> PathBuf {
        store_path(dir, model, version, "")
    }
}

#[async_trait]
impl Task for DetectionTask {
    type Record = DetectionRecord;

    fn name(&self) -> &str {
        "detection"
    }

    fn sample_id(&self, sample: &Sample) -> String {
        content_id(&sample.text)
    }

    async fn process(&self, id: &str, sample: &Sample) -> Result<DetectionRecord, SampleError> {
        let label = sample
            .label
            .ok_or_else(|| SampleError::Data("Sample has no label".to_string()))?;
        let truth = DetectionLabel::from_dataset(label).map_err(|e| SampleError::Data(e.to_string()))?;

        let fields = BTreeMap::from([("text", sample.text.clone())]);
        let prompt = self
            .template
            .render(&fields)
            .map_err(|e| SampleError::Data(e.to_string()))?;
        let prompt = apply_think(&prompt, self.ctx.think);

        let (prediction, reason) = invoke(
            self.ctx.backend.as_ref(),
            &prompt,
            &self.ctx.policy,
            id,
            |answer: ReasonedAnswer| {
                let label: DetectionLabel = answer.answer.parse().map_err(|e| format!("{}", e))?;
                Ok((label, answer.reason))
            },
        )
        .await?;

        Ok(DetectionRecord {
            id: id.to_string(),
            text: sample.text.clone(),
            reason,
            ground_truth: truth.to_string(),
            prediction: prediction.to_string(),
        })
    }
}

/// Accuracy, per-class and averaged metrics over a detection store
pub fn evaluate(store: &RecordStore<DetectionRecord>) -> Result<Option<ClassificationReport>> {
    let pairs: Vec<(String, String)> = store
        .load()?
        .into_iter()
        .map(|r| (r.ground_truth, r.prediction))
        .collect();
    Ok(ClassificationReport::from_pairs(&pairs))
}
