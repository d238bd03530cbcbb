//! Command-line interface for drivel-bench.
//!
//! Provides one command per benchmark task plus commands for listing
//! prompt templates and showing the resolved configuration.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::core::{PromptCatalog, TaskKind};

pub mod bench;

/// drivel-bench - Drivelology benchmark runner
#[derive(Parser, Debug)]
#[command(name = "drivel-bench")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Classify texts as Drivelology or non-Drivelology
    Detect {
        #[command(flatten)]
        run: RunArgs,
    },

    /// Pick the underlying narrative among multiple choices
    Mcqa {
        /// Replace the true narrative with "None of the above"
        #[arg(long)]
        hard: bool,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Tag texts with rhetorical categories
    Tag {
        #[command(flatten)]
        run: RunArgs,
    },

    /// Generate narratives and score them against references
    Narrative {
        #[command(flatten)]
        run: RunArgs,

        #[command(flatten)]
        narrative: NarrativeArgs,
    },

    /// List registered prompt templates
    Prompts {
        /// Only show templates of this kind
        #[arg(short, long, value_enum)]
        task: Option<PromptKind>,
    },

    /// Show resolved configuration (debug)
    Config,
}

/// Flags shared by every benchmark command
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Prompt template version (e.g. v1_en, v2_zh_tw)
    #[arg(long, default_value = "v1_en")]
    pub prompt_version: String,

    /// Model provider (openai, deepseek, openrouter, ...)
    #[arg(long, env = "DRIVEL_LLM_PROVIDER")]
    pub llm_provider: Option<String>,

    /// Model name as the provider knows it
    #[arg(long, env = "DRIVEL_LLM_MODEL")]
    pub llm_model: Option<String>,

    /// Dataset on the hub
    #[arg(long)]
    pub dataset_name: Option<String>,

    /// Dataset config name
    #[arg(long)]
    pub dataset_config: Option<String>,

    /// Read samples from a local JSONL file instead of the hub
    #[arg(long, conflicts_with_all = ["dataset_name", "dataset_config"])]
    pub dataset_file: Option<PathBuf>,

    /// Directory for the result store
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Let reasoning models think (otherwise prompts get "/set nothink")
    #[arg(long)]
    pub think: bool,

    /// Only compute metrics from the existing result store
    #[arg(long)]
    pub eval_only: bool,

    /// Only consider the first N samples
    #[arg(long)]
    pub max_samples: Option<usize>,

    /// Attempts per sample before it is logged as failed
    #[arg(long)]
    pub max_retries: Option<u32>,
}

/// Extra flags for the narrative command
#[derive(Args, Debug, Clone)]
pub struct NarrativeArgs {
    /// Judge prompt version
    #[arg(long, default_value = "v1_en")]
    pub evaluation_version: String,

    /// Judge provider
    #[arg(long, default_value = "openai")]
    pub eval_llm_provider: String,

    /// Judge model
    #[arg(long, default_value = "gpt-4o-mini")]
    pub eval_llm_model: String,

    /// Rows per similarity scoring batch (defaults to the config value)
    #[arg(long)]
    pub similarity_batch_size: Option<usize>,

    /// Similarity metric for the deferred scoring pass
    #[arg(long, value_enum, default_value = "lexical")]
    pub similarity: SimilarityKind,

    /// Embedding model for `--similarity embedding` (served by the judge provider)
    #[arg(long, default_value = "text-embedding-3-small")]
    pub embedding_model: String,
}

/// Deferred similarity metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SimilarityKind {
    /// Greedy token matching, offline
    Lexical,

    /// Greedy cosine matching over sentence embeddings
    Embedding,
}

/// Template kind for CLI (maps to TaskKind)
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum PromptKind {
    Detection,
    McqaEasy,
    McqaHard,
    Tagging,
    NarrativeGeneration,
    NarrativeEvaluation,
}

impl From<PromptKind> for TaskKind {
    fn from(k: PromptKind) -> Self {
        match k {
            PromptKind::Detection => TaskKind::Detection,
            PromptKind::McqaEasy => TaskKind::McqaEasy,
            PromptKind::McqaHard => TaskKind::McqaHard,
            PromptKind::Tagging => TaskKind::Tagging,
            PromptKind::NarrativeGeneration => TaskKind::NarrativeGeneration,
            PromptKind::NarrativeEvaluation => TaskKind::NarrativeEvaluation,
        }
    }
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Detect { run } => bench::detect(&run).await,
            Commands::Mcqa { hard, run } => bench::mcqa(&run, hard).await,
            Commands::Tag { run } => bench::tag(&run).await,
            Commands::Narrative { run, narrative } => bench::narrative(&run, &narrative).await,
            Commands::Prompts { task } => list_prompts(task.map(TaskKind::from)),
            Commands::Config => show_config(),
        }
    }
}

/// Prompt catalog with any configured extra templates
pub(crate) fn load_catalog() -> Result<PromptCatalog> {
    let cfg = crate::config::config()?;
    match &cfg.prompts_dir {
        Some(dir) => PromptCatalog::with_dir(dir),
        None => Ok(PromptCatalog::builtin()?),
    }
}

/// List registered templates
fn list_prompts(kind: Option<TaskKind>) -> Result<()> {
    let catalog = load_catalog()?;
    let templates = catalog.list(kind);

    if templates.is_empty() {
        println!("No templates found");
        return Ok(());
    }

    println!("{:<22} {:<10} {:<7} {}", "KIND", "VERSION", "LANG", "DESCRIPTION");
    println!("{}", "-".repeat(75));

    for t in templates {
        println!(
            "{:<22} {:<10} {:<7} {}",
            t.kind.as_str(),
            t.name,
            t.language,
            t.description
        );
    }

    Ok(())
}

/// Show resolved configuration
fn show_config() -> Result<()> {
    let cfg = crate::config::config()?;

    println!("drivel-bench configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Output root:   {}", cfg.output_root.display());
    println!("  Dataset cache: {}", cfg.cache_dir.display());
    println!(
        "  Extra prompts: {}",
        cfg.prompts_dir
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none)".to_string())
    );
    println!();
    println!("Provider overrides:");
    if cfg.providers.is_empty() {
        println!("  (using defaults)");
    } else {
        let mut names: Vec<_> = cfg.providers.keys().collect();
        names.sort();
        for name in names {
            let p = &cfg.providers[name];
            println!(
                "  {}: base_url={} api_key_env={} structured_output={}",
                name,
                p.base_url.as_deref().unwrap_or("(default)"),
                p.api_key_env.as_deref().unwrap_or("(default)"),
                p.structured_output
                    .map(|m| format!("{:?}", m))
                    .unwrap_or_else(|| "(default)".to_string())
            );
        }
    }
    println!();
    println!("Run settings:");
    println!("  Similarity batch size: {}", cfg.run.similarity_batch_size);
    println!("  Retry initial delay:   {}ms", cfg.run.retry_initial_delay_ms);
    println!("  Retry max delay:       {}ms", cfg.run.retry_max_delay_ms);
    println!("  Backoff multiplier:    {}", cfg.run.retry_backoff_multiplier);
    println!("  Request timeout:       {}s", cfg.run.request_timeout_seconds);
    println!();
    println!("Dataset hub:");
    println!("  Endpoint:  {}", cfg.hub.endpoint);
    println!("  Token env: {}", cfg.hub.token_env);

    Ok(())
}
