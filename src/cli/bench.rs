//! Benchmark commands.
//!
//! Every command follows the same shape: resolve the template (fatal when
//! unknown or unfillable), open the task's record store, then either
//! evaluate the store as-is (`--eval-only`) or load the dataset, run the
//! resumable loop and evaluate what is on disk afterwards. A dataset that
//! cannot be loaded is logged and the command ends without processing.

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};

use super::{load_catalog, NarrativeArgs, RunArgs, SimilarityKind};
use crate::adapters::{build_backend, build_embedder, DatasetSource, HubClient, SplitPreference};
use crate::config::{config, ResolvedConfig};
use crate::core::{
    run, EmbeddingScorer, LexicalScorer, RecordStore, RetryPolicy, RunOptions, RunSummary,
    ScoreLanguage, SimilarityScorer, Task, TaskKind,
};
use crate::domain::{Record, Sample};
use crate::tasks::{
    detection, mcqa, narrative, tagging, CallContext, DetectionTask, NarrativeTask, TaggingTask,
};

/// Per-command defaults for flags left unset
struct Defaults {
    provider: &'static str,
    model: &'static str,
    dataset: &'static str,
    dataset_config: Option<&'static str>,
    max_attempts: u32,
}

const DETECTION: Defaults = Defaults {
    provider: "deepseek",
    model: "deepseek-chat",
    dataset: "extraordinarylab/drivel-binary",
    dataset_config: None,
    max_attempts: 5,
};

const MCQA: Defaults = Defaults {
    provider: "deepseek",
    model: "deepseek-chat",
    dataset: "extraordinarylab/drivel-hub",
    dataset_config: Some("v0618"),
    max_attempts: 3,
};

const TAGGING: Defaults = Defaults {
    provider: "openai",
    model: "gpt-4o-mini",
    dataset: "extraordinarylab/drivel-hub",
    dataset_config: Some("v0618"),
    max_attempts: 3,
};

const NARRATIVE: Defaults = Defaults {
    provider: "openai",
    model: "gpt-4o-mini",
    dataset: "extraordinarylab/drivel-hub",
    dataset_config: Some("v0618"),
    max_attempts: 5,
};

/// `RunArgs` with per-command defaults applied
struct Resolved<'a> {
    args: &'a RunArgs,
    cfg: &'static ResolvedConfig,
    defaults: &'a Defaults,
}

impl<'a> Resolved<'a> {
    fn new(args: &'a RunArgs, defaults: &'a Defaults) -> Result<Self> {
        Ok(Self {
            args,
            cfg: config()?,
            defaults,
        })
    }

    fn provider(&self) -> &str {
        self.args.llm_provider.as_deref().unwrap_or(self.defaults.provider)
    }

    fn model(&self) -> &str {
        self.args.llm_model.as_deref().unwrap_or(self.defaults.model)
    }

    fn output_dir(&self, subdir: &str) -> PathBuf {
        self.args
            .output_dir
            .clone()
            .unwrap_or_else(|| self.cfg.task_output_dir(subdir))
    }

    fn policy(&self, max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay_ms: self.cfg.run.retry_initial_delay_ms,
            max_delay_ms: self.cfg.run.retry_max_delay_ms,
            backoff_multiplier: self.cfg.run.retry_backoff_multiplier,
        }
    }

    fn call_context(&self) -> Result<CallContext> {
        let backend = build_backend(self.cfg, self.provider(), self.model())
            .with_context(|| format!("Failed to set up {}/{}", self.provider(), self.model()))?;
        let attempts = self.args.max_retries.unwrap_or(self.defaults.max_attempts);
        Ok(CallContext::new(backend, self.policy(attempts), self.args.think))
    }

    fn source(&self) -> DatasetSource {
        match &self.args.dataset_file {
            Some(path) => DatasetSource::File(path.clone()),
            None => DatasetSource::Hub {
                name: self
                    .args
                    .dataset_name
                    .clone()
                    .unwrap_or_else(|| self.defaults.dataset.to_string()),
                config: self
                    .args
                    .dataset_config
                    .clone()
                    .or_else(|| self.defaults.dataset_config.map(str::to_string)),
            },
        }
    }

    async fn samples(&self, split: &SplitPreference) -> Result<Vec<Sample>> {
        let client = HubClient::new(&self.cfg.hub).with_cache_dir(&self.cfg.cache_dir);
        let source = self.source();
        client
            .load(&source, split)
            .await
            .with_context(|| format!("Failed to load dataset {:?}", source))
    }

    fn run_options(&self) -> RunOptions {
        RunOptions {
            max_samples: self.args.max_samples,
            ..RunOptions::default()
        }
    }
}

/// Samples of a successful load; a failed load is reported and yields `None`
fn loaded_samples(result: Result<Vec<Sample>>) -> Option<Vec<Sample>> {
    match result {
        Ok(samples) => Some(samples),
        Err(e) => {
            error!(error = %format!("{:#}", e), "Dataset could not be loaded, nothing processed");
            None
        }
    }
}

/// Load samples and run `task` over them; `None` when the dataset is unavailable
async fn run_task<T: Task>(
    resolved: &Resolved<'_>,
    task: &T,
    store: &RecordStore<T::Record>,
    split: &SplitPreference,
) -> Result<Option<RunSummary<T::Record>>> {
    let Some(samples) = loaded_samples(resolved.samples(split).await) else {
        return Ok(None);
    };
    let summary = run(task, store, &samples, &resolved.run_options()).await?;

    println!(
        "Processed {} new samples, skipped {} existing, {} failed (run {}, {}s)",
        summary.processed(),
        summary.skipped,
        summary.failed,
        summary.run_id,
        summary.elapsed().map(|d| d.num_seconds()).unwrap_or_default()
    );
    Ok(Some(summary))
}

/// Whether an eval-only command has anything to evaluate
fn store_present<R: Record>(store: &RecordStore<R>) -> bool {
    if store.exists() {
        true
    } else {
        error!(path = %store.path().display(), "Results file not found");
        false
    }
}

fn print_report<T: Display>(path: &Path, report: Option<T>) {
    println!();
    println!("Results: {}", path.display());
    match report {
        Some(report) => println!("{}", report),
        None => println!("No results to evaluate"),
    }
}

/// `drivel-bench detect`
pub async fn detect(args: &RunArgs) -> Result<()> {
    let resolved = Resolved::new(args, &DETECTION)?;
    let template = load_catalog()?
        .get(TaskKind::Detection, &args.prompt_version)?
        .clone();

    let dir = resolved.output_dir("detection");
    let store = RecordStore::open(DetectionTask::store_file(
        &dir,
        resolved.model(),
        &args.prompt_version,
    ));

    if args.eval_only {
        if store_present(&store) {
            print_report(store.path(), detection::evaluate(&store)?);
        }
        return Ok(());
    }

    let task = DetectionTask::new(resolved.call_context()?, template)?;
    if run_task(&resolved, &task, &store, &DetectionTask::split()).await?.is_none() {
        return Ok(());
    }
    print_report(store.path(), detection::evaluate(&store)?);
    Ok(())
}

/// `drivel-bench mcqa [--hard]`
pub async fn mcqa(args: &RunArgs, hard: bool) -> Result<()> {
    if hard {
        mcqa_variant::<4>(args).await
    } else {
        mcqa_variant::<5>(args).await
    }
}

async fn mcqa_variant<const N: usize>(args: &RunArgs) -> Result<()>
where
    mcqa::McqaTask<N>: Task<Record = crate::domain::McqaRecord<N>>,
    crate::domain::McqaRecord<N>: Record,
{
    let resolved = Resolved::new(args, &MCQA)?;
    let kind = mcqa::McqaTask::<N>::kind();
    let template = load_catalog()?.get(kind, &args.prompt_version)?.clone();

    let dir = resolved.output_dir(kind.as_str());
    let store = RecordStore::open(mcqa::McqaTask::<N>::store_file(
        &dir,
        resolved.model(),
        &args.prompt_version,
    ));

    if args.eval_only {
        if store_present(&store) {
            print_report(store.path(), mcqa::evaluate(&store)?);
        }
        return Ok(());
    }

    let task = mcqa::McqaTask::<N>::new(resolved.call_context()?, template)?;
    if run_task(&resolved, &task, &store, &mcqa::McqaTask::<N>::split())
        .await?
        .is_none()
    {
        return Ok(());
    }
    print_report(store.path(), mcqa::evaluate(&store)?);
    Ok(())
}

/// `drivel-bench tag`
pub async fn tag(args: &RunArgs) -> Result<()> {
    let resolved = Resolved::new(args, &TAGGING)?;
    let template = load_catalog()?
        .get(TaskKind::Tagging, &args.prompt_version)?
        .clone();

    let dir = resolved.output_dir("tagging");
    let store = RecordStore::open(TaggingTask::store_file(
        &dir,
        resolved.model(),
        &args.prompt_version,
    ));

    if args.eval_only {
        if store_present(&store) {
            print_report(store.path(), tagging::evaluate(&store)?);
        }
        return Ok(());
    }

    let task = TaggingTask::new(resolved.call_context()?, template)?;
    if run_task(&resolved, &task, &store, &TaggingTask::split()).await?.is_none() {
        return Ok(());
    }
    print_report(store.path(), tagging::evaluate(&store)?);
    Ok(())
}

/// `drivel-bench narrative`
pub async fn narrative(args: &RunArgs, extra: &NarrativeArgs) -> Result<()> {
    let resolved = Resolved::new(args, &NARRATIVE)?;
    let catalog = load_catalog()?;
    let generation = catalog
        .get(TaskKind::NarrativeGeneration, &args.prompt_version)?
        .clone();
    let evaluation = catalog
        .get(TaskKind::NarrativeEvaluation, &extra.evaluation_version)?
        .clone();

    let dir = resolved.output_dir("narrative");
    let store = RecordStore::open(NarrativeTask::store_file(
        &dir,
        resolved.model(),
        &args.prompt_version,
        &extra.evaluation_version,
    ));

    let language = ScoreLanguage::from_tag(narrative::reference_language(&generation));
    let scorer = similarity_scorer(resolved.cfg, extra)?;
    let batch_size = extra
        .similarity_batch_size
        .unwrap_or(resolved.cfg.run.similarity_batch_size);

    if args.eval_only {
        if store_present(&store) {
            narrative::score_pending(&store, scorer.as_ref(), batch_size, language).await?;
            print_report(store.path(), narrative::evaluate(&store)?);
        }
        return Ok(());
    }

    let judge_backend = build_backend(resolved.cfg, &extra.eval_llm_provider, &extra.eval_llm_model)
        .with_context(|| {
            format!(
                "Failed to set up judge {}/{}",
                extra.eval_llm_provider, extra.eval_llm_model
            )
        })?;
    let judge_attempts = args.max_retries.unwrap_or(NARRATIVE.max_attempts);
    let judge = CallContext::new(judge_backend, resolved.policy(judge_attempts), true);

    let task = NarrativeTask::new(resolved.call_context()?, judge, generation, evaluation)?
        .with_similarity(scorer.clone(), batch_size);
    let Some(summary) = run_task(&resolved, &task, &store, &NarrativeTask::split()).await? else {
        return Ok(());
    };

    // Rows from earlier runs that never got their similarity scores
    let stats = narrative::score_pending(&store, scorer.as_ref(), batch_size, language).await?;
    info!(
        written = summary.processed(),
        backfilled = stats.scored,
        failed = stats.failed,
        "Narrative scoring finished"
    );

    print_report(store.path(), narrative::evaluate(&store)?);
    Ok(())
}

fn similarity_scorer(cfg: &ResolvedConfig, extra: &NarrativeArgs) -> Result<Arc<dyn SimilarityScorer>> {
    Ok(match extra.similarity {
        SimilarityKind::Lexical => Arc::new(LexicalScorer),
        SimilarityKind::Embedding => {
            let embedder = build_embedder(cfg, &extra.eval_llm_provider, &extra.embedding_model)
                .with_context(|| {
                    format!(
                        "Failed to set up embeddings {}/{}",
                        extra.eval_llm_provider, extra.embedding_model
                    )
                })?;
            Arc::new(EmbeddingScorer::new(embedder))
        }
    })
}
