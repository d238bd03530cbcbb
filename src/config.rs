//! Configuration for drivel-bench.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (DRIVEL_OUTPUT_ROOT, DRIVEL_CACHE_DIR)
//! 2. Config file (.drivel/config.yaml)
//! 3. Defaults (./outputs, the user cache directory)
//!
//! Config file discovery:
//! - Searches current directory and parents for .drivel/config.yaml
//! - Paths in config file are relative to the project root (parent of .drivel/)

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::adapters::StructuredOutput;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    /// Root for per-task output directories
    pub output_root: Option<String>,
    /// Directory with extra prompt template YAML files
    pub prompts_dir: Option<String>,
    /// Where downloaded dataset rows are cached
    pub cache_dir: Option<String>,
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    #[serde(default)]
    pub run: Option<RunConfig>,
    #[serde(default)]
    pub hub: Option<HubConfig>,
}

/// Per-provider overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub base_url: Option<String>,
    /// Name of the environment variable holding the API key
    pub api_key_env: Option<String>,
    pub structured_output: Option<StructuredOutput>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    pub similarity_batch_size: Option<usize>,
    pub retry_initial_delay_ms: Option<u64>,
    pub retry_max_delay_ms: Option<u64>,
    pub retry_backoff_multiplier: Option<f64>,
    pub request_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HubConfig {
    pub endpoint: Option<String>,
    pub token_env: Option<String>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedConfig {
    /// Root directory for task outputs
    pub output_root: PathBuf,
    /// Extra prompt templates (if configured)
    pub prompts_dir: Option<PathBuf>,
    /// Dataset row cache
    pub cache_dir: PathBuf,
    /// Provider overrides by name
    pub providers: HashMap<String, ProviderConfig>,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    /// Run loop settings
    pub run: RunSettings,
    /// Dataset hub settings
    pub hub: HubSettings,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSettings {
    pub similarity_batch_size: usize,
    pub retry_initial_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub retry_backoff_multiplier: f64,
    pub request_timeout_seconds: u64,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            similarity_batch_size: 10,
            retry_initial_delay_ms: 1000,
            retry_max_delay_ms: 30_000,
            retry_backoff_multiplier: 2.0,
            request_timeout_seconds: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HubSettings {
    pub endpoint: String,
    pub token_env: String,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            endpoint: "https://datasets-server.huggingface.co".to_string(),
            token_env: "HF_TOKEN".to_string(),
        }
    }
}

impl ResolvedConfig {
    /// Output directory for one task (`<output_root>/<task>`)
    pub fn task_output_dir(&self, task: &str) -> PathBuf {
        self.output_root.join(task)
    }

    pub fn provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.get(name)
    }
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from("outputs"),
            prompts_dir: None,
            cache_dir: default_cache_dir(),
            providers: HashMap::new(),
            config_file: None,
            run: RunSettings::default(),
            hub: HubSettings::default(),
        }
    }
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("drivel-bench")
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".drivel").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's project root
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Merge a parsed config file over the defaults
fn apply_config_file(resolved: &mut ResolvedConfig, config: ConfigFile, base_dir: &Path) {
    if let Some(ref root) = config.output_root {
        resolved.output_root = resolve_path(base_dir, root);
    }
    if let Some(ref dir) = config.prompts_dir {
        resolved.prompts_dir = Some(resolve_path(base_dir, dir));
    }
    if let Some(ref dir) = config.cache_dir {
        resolved.cache_dir = resolve_path(base_dir, dir);
    }
    resolved.providers = config.providers;

    if let Some(run) = config.run {
        let defaults = RunSettings::default();
        resolved.run = RunSettings {
            similarity_batch_size: run
                .similarity_batch_size
                .unwrap_or(defaults.similarity_batch_size),
            retry_initial_delay_ms: run
                .retry_initial_delay_ms
                .unwrap_or(defaults.retry_initial_delay_ms),
            retry_max_delay_ms: run.retry_max_delay_ms.unwrap_or(defaults.retry_max_delay_ms),
            retry_backoff_multiplier: run
                .retry_backoff_multiplier
                .unwrap_or(defaults.retry_backoff_multiplier),
            request_timeout_seconds: run
                .request_timeout_seconds
                .unwrap_or(defaults.request_timeout_seconds),
        };
    }

    if let Some(hub) = config.hub {
        if let Some(endpoint) = hub.endpoint {
            resolved.hub.endpoint = endpoint;
        }
        if let Some(token_env) = hub.token_env {
            resolved.hub.token_env = token_env;
        }
    }
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let mut resolved = ResolvedConfig::default();

    let config_file = find_config_file();
    if let Some(ref config_path) = config_file {
        let config = load_config_file(config_path)?;

        // Base directory is the parent of .drivel/ (i.e., grandparent of config.yaml)
        let base_dir = config_path
            .parent()
            .and_then(|p| p.parent())
            .unwrap_or(Path::new("."));

        apply_config_file(&mut resolved, config, base_dir);
    }
    resolved.config_file = config_file;

    if let Ok(root) = std::env::var("DRIVEL_OUTPUT_ROOT") {
        resolved.output_root = PathBuf::from(root);
    }
    if let Ok(dir) = std::env::var("DRIVEL_CACHE_DIR") {
        resolved.cache_dir = PathBuf::from(dir);
    }

    Ok(resolved)
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}
