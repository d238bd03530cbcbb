//! Sidecar log of samples that exhausted their retries.
//!
//! Lives next to the record store as `<store>.errors.log`, one
//! `id<TAB>error` line per failure. Failed samples have no row in the store,
//! so a later run picks them up again.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use super::record_store::sanitize;

#[derive(Debug, Clone)]
pub struct ErrorLog {
    path: PathBuf,
}

impl ErrorLog {
    /// Error log for the store at `store_path`
    pub fn for_store(store_path: &Path) -> Self {
        let mut name = store_path.as_os_str().to_os_string();
        name.push(".errors.log");
        Self {
            path: PathBuf::from(name),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one failure line
    pub fn record(&self, id: &str, error: &str) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open error log: {}", self.path.display()))?;

        let line = format!("{}\t{}\n", sanitize(id), sanitize(error));
        file.write_all(line.as_bytes())
            .context("Failed to write error log")?;

        Ok(())
    }
}
