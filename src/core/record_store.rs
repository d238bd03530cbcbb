//! Tab-delimited record store with append and patch-by-id.
//!
//! One line per processed sample, fields in the record type's column order.
//! Rows are never deleted; the only in-place mutation is `patch`, which
//! rewrites the whole file through a temp file and an atomic rename.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fs2::FileExt;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::Record;

/// Replace tab, newline and carriage return with a single space each
pub fn sanitize(value: &str) -> String {
    value
        .chars()
        .map(|c| match c {
            '\t' | '\n' | '\r' => ' ',
            other => other,
        })
        .collect()
}

/// Result of a patch call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    /// An existing row was rewritten in place
    Updated,
    /// No row carried the id; the full record was appended instead
    Appended,
}

/// Raised when another run already holds the store's writer lock
#[derive(Debug, Error)]
pub enum StoreLockError {
    #[error("Record store is locked by another run: {0}")]
    Held(PathBuf),
}

/// Exclusive advisory lock on `<store>.lock`, released on drop
#[derive(Debug)]
pub struct StoreLock {
    file: File,
    path: PathBuf,
}

impl StoreLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            warn!(path = %self.path.display(), error = %e, "Failed to release store lock");
        }
    }
}

/// File-backed store for one record type
#[derive(Debug, Clone)]
pub struct RecordStore<R: Record> {
    path: PathBuf,
    _record: PhantomData<R>,
}

impl<R: Record> RecordStore<R> {
    /// Point a store at a file; nothing is created until the first append
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _record: PhantomData,
        }
    }

    /// Path to the store file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path to the sidecar lock file
    pub fn lock_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(".lock");
        PathBuf::from(name)
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Take the single-writer lock, failing fast if it is already held
    pub fn lock(&self) -> Result<StoreLock> {
        let path = self.lock_path();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .with_context(|| format!("Failed to open lock file: {}", path.display()))?;

        if file.try_lock_exclusive().is_err() {
            return Err(StoreLockError::Held(path).into());
        }

        debug!(path = %path.display(), "Acquired store lock");
        Ok(StoreLock { file, path })
    }

    /// Read every non-empty line split on tabs, with its line number
    fn read_rows(&self) -> Result<Vec<(usize, Vec<String>)>> {
        if !self.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.path)
            .with_context(|| format!("Failed to open record store: {}", self.path.display()))?;
        let reader = BufReader::new(file);
        let mut rows = Vec::new();

        for (index, line) in reader.lines().enumerate() {
            let line = line
                .with_context(|| format!("Failed to read record store: {}", self.path.display()))?;
            if line.trim().is_empty() {
                continue;
            }
            if index == 0 && R::HAS_HEADER && line.split('\t').next() == Some(R::COLUMNS[0]) {
                continue;
            }
            rows.push((index + 1, line.split('\t').map(str::to_string).collect()));
        }

        Ok(rows)
    }

    /// Ids already present in the store.
    ///
    /// Lines that do not parse as a record are logged and skipped.
    pub fn load_ids(&self) -> Result<HashSet<String>> {
        let mut ids = HashSet::new();

        for (line_no, fields) in self.read_rows()? {
            if fields.len() < R::MIN_FIELDS || fields[0].trim().is_empty() {
                warn!(
                    path = %self.path.display(),
                    line = line_no,
                    fields = fields.len(),
                    "Skipping malformed record"
                );
                continue;
            }
            ids.insert(fields[0].clone());
        }

        Ok(ids)
    }

    /// Load every well-formed record, in file order
    pub fn load(&self) -> Result<Vec<R>> {
        let mut records = Vec::new();

        for (line_no, fields) in self.read_rows()? {
            let refs: Vec<&str> = fields.iter().map(String::as_str).collect();
            match R::from_fields(&refs) {
                Some(record) => records.push(record),
                None => warn!(
                    path = %self.path.display(),
                    line = line_no,
                    fields = fields.len(),
                    "Skipping malformed record"
                ),
            }
        }

        Ok(records)
    }

    fn format_line(fields: &[String]) -> String {
        let cells: Vec<String> = fields.iter().map(|f| sanitize(f)).collect();
        format!("{}\n", cells.join("\t"))
    }

    /// Append one record as a single newline-terminated line.
    ///
    /// The header (for stores that have one) is written first when the file
    /// is new or empty. The whole buffer goes out in one write call.
    pub fn append(&self, record: &R) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open record store: {}", self.path.display()))?;

        let is_empty = file
            .metadata()
            .with_context(|| format!("Failed to stat record store: {}", self.path.display()))?
            .len()
            == 0;

        let mut buffer = String::new();
        if R::HAS_HEADER && is_empty {
            buffer.push_str(&R::COLUMNS.join("\t"));
            buffer.push('\n');
        }
        buffer.push_str(&Self::format_line(&record.to_fields()));

        file.write_all(buffer.as_bytes())
            .with_context(|| format!("Failed to append record {}", record.id()))?;
        file.flush().context("Failed to flush record store")?;

        Ok(())
    }

    /// Replace the named columns of the row whose id matches `record`.
    ///
    /// Short rows are padded with empty fields first; columns not named keep
    /// their stored text. Without a matching row the full record is appended.
    pub fn patch(&self, record: &R, columns: &[&str]) -> Result<PatchOutcome> {
        let values = record.to_fields();
        let mut updates = Vec::with_capacity(columns.len());
        for name in columns {
            let index = R::column_index(name)
                .with_context(|| format!("Unknown column in patch: {}", name))?;
            updates.push((index, sanitize(&values[index])));
        }

        let content = if self.exists() {
            fs::read_to_string(&self.path)
                .with_context(|| format!("Failed to read record store: {}", self.path.display()))?
        } else {
            String::new()
        };

        let mut lines: Vec<String> = content.lines().map(str::to_string).collect();
        let target = lines
            .iter()
            .enumerate()
            .skip(usize::from(R::HAS_HEADER))
            .find(|(_, line)| line.split('\t').next() == Some(record.id()))
            .map(|(index, _)| index);

        let Some(index) = target else {
            warn!(id = %record.id(), path = %self.path.display(), "No row to patch, appending instead");
            self.append(record)?;
            return Ok(PatchOutcome::Appended);
        };

        let mut fields: Vec<String> = lines[index].split('\t').map(str::to_string).collect();
        if fields.len() < R::COLUMNS.len() {
            fields.resize(R::COLUMNS.len(), String::new());
        }
        for (column, value) in updates {
            fields[column] = value;
        }
        lines[index] = fields.join("\t");

        self.rewrite(&lines)?;
        debug!(id = %record.id(), columns = ?columns, "Patched record");

        Ok(PatchOutcome::Updated)
    }

    /// Atomically replace the file with the given lines
    fn rewrite(&self, lines: &[String]) -> Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let mut temp = NamedTempFile::new_in(&dir)
            .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;

        let mut buffer = String::with_capacity(lines.iter().map(|l| l.len() + 1).sum());
        for line in lines {
            buffer.push_str(line);
            buffer.push('\n');
        }

        temp.write_all(buffer.as_bytes())
            .context("Failed to write temp record store")?;
        temp.flush().context("Failed to flush temp record store")?;
        temp.persist(&self.path)
            .with_context(|| format!("Failed to replace record store: {}", self.path.display()))?;

        Ok(())
    }
}
