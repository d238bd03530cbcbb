//! Dataset loading from the Hugging Face datasets server or a local file.
//!
//! Rows are fetched page by page through the `/splits` and `/rows` endpoints.
//! The split listing is cached as JSON and the rows as JSONL, so a repeated
//! run over the same split makes no requests at all.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::HubSettings;
use crate::domain::Sample;

const PAGE_SIZE: usize = 100;

/// Where samples come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatasetSource {
    /// A dataset on the hub, with an optional config name
    Hub { name: String, config: Option<String> },
    /// A local JSONL file, one row object per line
    File(PathBuf),
}

/// Which split of a hub dataset to read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SplitPreference {
    /// Exactly this split
    Named(String),
    /// `train` when present, otherwise the first listed split
    TrainOrFirst,
}

impl SplitPreference {
    pub fn named(split: impl Into<String>) -> Self {
        Self::Named(split.into())
    }

    /// Pick a split from the ones the dataset offers
    pub fn choose(&self, available: &[String]) -> Option<String> {
        match self {
            Self::Named(name) => available.iter().find(|s| *s == name).cloned(),
            Self::TrainOrFirst => available
                .iter()
                .find(|s| *s == "train")
                .or_else(|| available.first())
                .cloned(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SplitsResponse {
    splits: Vec<SplitEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SplitEntry {
    config: String,
    split: String,
}

#[derive(Debug, Deserialize)]
struct RowsResponse {
    rows: Vec<RowEntry>,
    #[serde(default)]
    num_rows_total: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RowEntry {
    row: Value,
}

/// Client for the datasets server
pub struct HubClient {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
    cache_dir: Option<PathBuf>,
}

impl HubClient {
    pub fn new(settings: &HubSettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: settings.endpoint.trim_end_matches('/').to_string(),
            token: std::env::var(&settings.token_env).ok(),
            cache_dir: None,
        }
    }

    /// Cache fetched rows under this directory
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    async fn get<T: for<'de> Deserialize<'de>>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let url = format!("{}/{}", self.endpoint, path);
        let mut request = self.client.get(&url).query(query);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to reach dataset server: {}", url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Dataset server returned {} for {}: {}", status, url, body);
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse dataset server response: {}", url))
    }

    /// Split listing of a dataset, from the cache when present
    async fn split_listing(&self, dataset: &str) -> Result<SplitsResponse> {
        let cache = self.splits_cache_path(dataset);

        if let Some(path) = cache.as_ref().filter(|p| p.exists()) {
            match read_json::<SplitsResponse>(path) {
                Ok(listing) => {
                    debug!(path = %path.display(), "Using cached split listing");
                    return Ok(listing);
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Ignoring unreadable split cache"),
            }
        }

        let listing: SplitsResponse = self
            .get("splits", &[("dataset", dataset.to_string())])
            .await?;

        if let Some(path) = cache {
            if let Err(e) = write_json(&path, &listing) {
                warn!(path = %path.display(), error = %e, "Failed to cache split listing");
            }
        }

        Ok(listing)
    }

    /// Resolve the config to use and the splits it offers
    async fn splits(&self, dataset: &str, config: Option<&str>) -> Result<(String, Vec<String>)> {
        let listing = self.split_listing(dataset).await?;
        select_config(dataset, listing, config)
    }

    async fn fetch_rows(&self, dataset: &str, config: &str, split: &str) -> Result<Vec<Value>> {
        let mut rows = Vec::new();
        let mut offset = 0;

        loop {
            let page: RowsResponse = self
                .get(
                    "rows",
                    &[
                        ("dataset", dataset.to_string()),
                        ("config", config.to_string()),
                        ("split", split.to_string()),
                        ("offset", offset.to_string()),
                        ("length", PAGE_SIZE.to_string()),
                    ],
                )
                .await?;

            let fetched = page.rows.len();
            rows.extend(page.rows.into_iter().map(|r| r.row));
            offset += fetched;
            debug!(dataset, split, offset, "Fetched rows page");

            let done = match page.num_rows_total {
                Some(total) => offset >= total,
                None => fetched < PAGE_SIZE,
            };
            if done || fetched == 0 {
                break;
            }
        }

        Ok(rows)
    }

    fn splits_cache_path(&self, dataset: &str) -> Option<PathBuf> {
        self.cache_dir
            .as_ref()
            .map(|dir| dir.join(dataset.replace('/', "__")).join("splits.json"))
    }

    fn cache_path(&self, dataset: &str, config: &str, split: &str) -> Option<PathBuf> {
        self.cache_dir.as_ref().map(|dir| {
            dir.join(dataset.replace('/', "__"))
                .join(config)
                .join(format!("{}.jsonl", split))
        })
    }

    /// Load all samples of the selected split
    pub async fn load(&self, source: &DatasetSource, split: &SplitPreference) -> Result<Vec<Sample>> {
        let (name, config) = match source {
            DatasetSource::File(path) => return load_jsonl(path),
            DatasetSource::Hub { name, config } => (name, config),
        };

        let (config, splits) = self.splits(name, config.as_deref()).await?;
        let chosen = split.choose(&splits).with_context(|| {
            format!("Split {:?} not available in {} (have: {})", split, name, splits.join(", "))
        })?;
        info!(dataset = %name, config = %config, split = %chosen, available = ?splits, "Loading dataset");

        if let Some(path) = self.cache_path(name, &config, &chosen) {
            if path.exists() {
                debug!(path = %path.display(), "Using cached dataset rows");
                return load_jsonl(&path);
            }
        }

        let rows = self.fetch_rows(name, &config, &chosen).await?;

        if let Some(path) = self.cache_path(name, &config, &chosen) {
            if let Err(e) = write_jsonl(&path, &rows) {
                warn!(path = %path.display(), error = %e, "Failed to cache dataset rows");
            }
        }

        Ok(samples_from_rows(&rows))
    }
}

/// Pick the config (the first listed when unset) and its splits
fn select_config(
    dataset: &str,
    listing: SplitsResponse,
    config: Option<&str>,
) -> Result<(String, Vec<String>)> {
    let config = match config {
        Some(c) => c.to_string(),
        None => listing
            .splits
            .first()
            .map(|s| s.config.clone())
            .with_context(|| format!("Dataset {} has no splits", dataset))?,
    };

    let splits: Vec<String> = listing
        .splits
        .into_iter()
        .filter(|s| s.config == config)
        .map(|s| s.split)
        .collect();

    if splits.is_empty() {
        bail!("Dataset {} has no config named {}", dataset, config);
    }

    Ok((config, splits))
}

fn samples_from_rows(rows: &[Value]) -> Vec<Sample> {
    rows.iter()
        .enumerate()
        .filter_map(|(index, row)| {
            let sample = Sample::from_row(row);
            if sample.is_none() {
                warn!(row = index, "Skipping dataset row without text");
            }
            sample
        })
        .collect()
}

/// Read samples from a JSONL file
pub fn load_jsonl(path: &Path) -> Result<Vec<Sample>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read dataset file: {}", path.display()))?;

    let mut rows = Vec::new();
    for (index, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let row: Value = serde_json::from_str(line).with_context(|| {
            format!("Failed to parse {} line {}", path.display(), index + 1)
        })?;
        rows.push(row);
    }

    Ok(samples_from_rows(&rows))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read cache file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse cache file: {}", path.display()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create cache directory: {}", parent.display()))?;
    }
    fs::write(path, serde_json::to_string(value)?)
        .with_context(|| format!("Failed to write cache file: {}", path.display()))
}

fn write_jsonl(path: &Path, rows: &[Value]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create cache directory: {}", parent.display()))?;
    }

    let mut buffer = String::new();
    for row in rows {
        buffer.push_str(&serde_json::to_string(row)?);
        buffer.push('\n');
    }

    let mut file = fs::File::create(path)
        .with_context(|| format!("Failed to create cache file: {}", path.display()))?;
    file.write_all(buffer.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_split_preference() {
        let splits = vec!["validation".to_string(), "train".to_string()];
        assert_eq!(SplitPreference::TrainOrFirst.choose(&splits), Some("train".to_string()));
        assert_eq!(SplitPreference::named("test").choose(&splits), None);

        let only = vec!["test".to_string()];
        assert_eq!(SplitPreference::TrainOrFirst.choose(&only), Some("test".to_string()));
    }

    #[test]
    fn test_load_jsonl() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("rows.jsonl");
        write_jsonl(
            &path,
            &[
                json!({"id": "1", "text": "first", "label": 0}),
                json!({"id": "2"}),
                json!({"id": "3", "text": "third", "label": 1}),
            ],
        )
        .unwrap();

        let samples = load_jsonl(&path).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[1].text, "third");
        assert_eq!(samples[1].label, Some(1));
    }

    #[test]
    fn test_load_jsonl_bad_line() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bad.jsonl");
        fs::write(&path, "{\"text\": \"ok\"}\nnot json\n").unwrap();

        assert!(load_jsonl(&path).is_err());
    }

    #[test]
    fn test_select_config() {
        let listing = || SplitsResponse {
            splits: vec![
                SplitEntry {
                    config: "v0618".to_string(),
                    split: "test".to_string(),
                },
                SplitEntry {
                    config: "v0701".to_string(),
                    split: "train".to_string(),
                },
            ],
        };

        let (config, splits) = select_config("d", listing(), None).unwrap();
        assert_eq!(config, "v0618");
        assert_eq!(splits, vec!["test".to_string()]);

        let (_, splits) = select_config("d", listing(), Some("v0701")).unwrap();
        assert_eq!(splits, vec!["train".to_string()]);

        assert!(select_config("d", listing(), Some("v9")).is_err());
    }

    #[tokio::test]
    async fn test_cached_split_loads_offline() {
        let temp_dir = TempDir::new().unwrap();
        let settings = HubSettings {
            endpoint: "http://127.0.0.1:9".to_string(),
            ..HubSettings::default()
        };
        let client = HubClient::new(&settings).with_cache_dir(temp_dir.path());

        let listing = SplitsResponse {
            splits: vec![SplitEntry {
                config: "v0618".to_string(),
                split: "test".to_string(),
            }],
        };
        write_json(&client.splits_cache_path("org/data").unwrap(), &listing).unwrap();
        write_jsonl(
            &client.cache_path("org/data", "v0618", "test").unwrap(),
            &[json!({"id": "a", "text": "cached row"})],
        )
        .unwrap();

        let source = DatasetSource::Hub {
            name: "org/data".to_string(),
            config: None,
        };
        let samples = client.load(&source, &SplitPreference::TrainOrFirst).await.unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].text, "cached row");

        // Nothing cached for this dataset, so the unreachable server is hit
        let missing = DatasetSource::Hub {
            name: "org/other".to_string(),
            config: None,
        };
        assert!(client.load(&missing, &SplitPreference::TrainOrFirst).await.is_err());
    }

    #[test]
    fn test_cache_path_layout() {
        let client = HubClient::new(&HubSettings::default()).with_cache_dir("/cache");
        assert_eq!(
            client.cache_path("extraordinarylab/drivel-hub", "v0618", "test"),
            Some(PathBuf::from("/cache/extraordinarylab__drivel-hub/v0618/test.jsonl"))
        );
    }
}
