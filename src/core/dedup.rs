//! In-memory index of sample ids already present in a record store.

use std::collections::HashSet;

use anyhow::Result;

use super::record_store::RecordStore;
use crate::domain::Record;

/// Tracks which ids have a row in the store for the current run
#[derive(Debug, Default, Clone)]
pub struct DedupIndex {
    ids: HashSet<String>,
}

impl DedupIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from the store's first column
    pub fn from_store<R: Record>(store: &RecordStore<R>) -> Result<Self> {
        Ok(Self {
            ids: store.load_ids()?,
        })
    }

    pub fn is_processed(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Record an id after its row has been appended
    pub fn mark_processed(&mut self, id: impl Into<String>) {
        self.ids.insert(id.into());
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl FromIterator<String> for DedupIndex {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self {
            ids: iter.into_iter().collect(),
        }
    }
}
