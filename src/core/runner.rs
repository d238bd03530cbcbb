//! Resumable evaluation run.
//!
//! Walks a dataset one sample at a time: derive the id, skip it if the store
//! already has a row, otherwise ask the task to produce a record and append
//! it. Samples whose call fails are logged to the sidecar error log and left
//! out of the store, so re-running the same command retries exactly those.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::dedup::DedupIndex;
use super::error_log::ErrorLog;
use super::invoke::InvokeFailure;
use super::record_store::{sanitize, RecordStore};
use crate::domain::{Record, Sample};

/// Why a single sample produced no record
#[derive(Debug, Error)]
pub enum SampleError {
    /// The sample lacks something the task needs
    #[error("{0}")]
    Data(String),

    /// The model never produced an acceptable answer
    #[error(transparent)]
    Invoke(#[from] InvokeFailure),
}

/// One benchmark experiment
#[async_trait]
pub trait Task: Send + Sync {
    type Record: Record + Send + Sync;

    /// Short task name for logs
    fn name(&self) -> &str;

    /// Deterministic id of a sample
    fn sample_id(&self, sample: &Sample) -> String;

    /// Produce the record for a sample not yet in the store
    async fn process(&self, id: &str, sample: &Sample) -> Result<Self::Record, SampleError>;

    /// Called after each record is appended, with the store lock held
    async fn after_append(
        &self,
        _store: &RecordStore<Self::Record>,
        _record: &Self::Record,
    ) -> Result<()> {
        Ok(())
    }

    /// Called once after the last sample, with the store lock held
    async fn finish(&self, _store: &RecordStore<Self::Record>) -> Result<()> {
        Ok(())
    }
}

/// Knobs for a run
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Only consider the first N samples of the dataset
    pub max_samples: Option<usize>,

    /// Log progress after this many newly processed samples
    pub progress_every: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_samples: None,
            progress_every: 10,
        }
    }
}

/// Outcome of a run
#[derive(Debug, Clone)]
pub struct RunSummary<R> {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Samples considered (after `max_samples`)
    pub total: usize,
    /// Samples skipped because the store already had them
    pub skipped: usize,
    /// Samples that exhausted retries or lacked data
    pub failed: usize,
    /// Records appended by this run, in order
    pub written: Vec<R>,
}

impl<R> RunSummary<R> {
    pub fn processed(&self) -> usize {
        self.written.len()
    }

    /// Wall-clock duration, once the run has finished
    pub fn elapsed(&self) -> Option<chrono::Duration> {
        self.finished_at.map(|end| end - self.started_at)
    }
}

/// Process every sample not yet in `store`
#[instrument(skip_all, fields(run_id, task = task.name(), store = %store.path().display()))]
pub async fn run<T: Task>(
    task: &T,
    store: &RecordStore<T::Record>,
    samples: &[Sample],
    options: &RunOptions,
) -> Result<RunSummary<T::Record>> {
    let run_id = Uuid::new_v4();
    tracing::Span::current().record("run_id", tracing::field::display(run_id));

    let _lock = store.lock()?;
    let error_log = ErrorLog::for_store(store.path());
    let mut index = DedupIndex::from_store(store)?;

    let limit = options.max_samples.unwrap_or(samples.len()).min(samples.len());
    let samples = &samples[..limit];
    info!(
        samples = samples.len(),
        existing = index.len(),
        "Starting run"
    );

    let mut summary = RunSummary {
        run_id,
        started_at: Utc::now(),
        finished_at: None,
        total: samples.len(),
        skipped: 0,
        failed: 0,
        written: Vec::new(),
    };

    for sample in samples {
        // Ids are stored sanitized; dedup on the stored form
        let id = sanitize(&task.sample_id(sample));

        if index.is_processed(&id) {
            summary.skipped += 1;
            continue;
        }

        match task.process(&id, sample).await {
            Ok(record) => {
                store.append(&record)?;
                task.after_append(store, &record).await?;
                index.mark_processed(id);
                summary.written.push(record);

                let processed = summary.processed();
                if options.progress_every > 0 && processed % options.progress_every == 0 {
                    info!(processed, skipped = summary.skipped, "Progress");
                }
            }
            Err(e) => {
                match &e {
                    SampleError::Data(reason) => warn!(%id, %reason, "Skipping sample"),
                    SampleError::Invoke(failure) => error!(
                        %id,
                        attempts = failure.attempts,
                        error = %failure.last_error,
                        "Sample failed"
                    ),
                }
                if let Err(log_err) = error_log.record(&id, &e.to_string()) {
                    warn!(%id, error = %log_err, "Failed to write error log");
                }
                summary.failed += 1;
            }
        }
    }

    task.finish(store).await?;
    summary.finished_at = Some(Utc::now());
    info!(
        processed = summary.processed(),
        skipped = summary.skipped,
        failed = summary.failed,
        elapsed_ms = summary.elapsed().map(|d| d.num_milliseconds()).unwrap_or_default(),
        "Run finished"
    );

    Ok(summary)
}
