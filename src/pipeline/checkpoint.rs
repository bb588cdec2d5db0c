use std::path::{Path, PathBuf};

use anyhow::Result;
use indexmap::IndexMap;
use tracing::{debug, warn};

use super::table::{row_id, Row, Table};

/// Periodic, de-duplicated full rewrite of a stage's output table.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
    every: usize,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>, every: usize) -> Self {
        Self {
            path: path.into(),
            every: every.max(1),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn every(&self) -> usize {
        self.every
    }

    /// Whether a checkpoint is due after `processed` items.
    pub fn is_due(&self, processed: usize) -> bool {
        processed > 0 && processed % self.every == 0
    }

    /// Persist `dest ∪ fresh`, one row per id with the latest version winning,
    /// and return the snapshot that was written.
    pub fn checkpoint(&self, dest: &Table, fresh: &[Row]) -> Result<Table> {
        let snapshot = dedupe_merge(dest, fresh);
        snapshot.write_csv(&self.path)?;
        debug!(
            path = %self.path.display(),
            rows = snapshot.len(),
            fresh = fresh.len(),
            "checkpoint written"
        );
        Ok(snapshot)
    }
}

/// Combine `dest` and `fresh` keyed by id. A later row replaces an earlier one
/// with the same id but keeps the earlier row's position.
pub fn dedupe_merge(dest: &Table, fresh: &[Row]) -> Table {
    let mut by_id: IndexMap<String, Row> = IndexMap::with_capacity(dest.len() + fresh.len());
    for row in dest.rows().iter().chain(fresh.iter()) {
        match row_id(row) {
            Some(id) => {
                by_id.insert(id, row.clone());
            }
            None => warn!("dropping row without an id during checkpoint"),
        }
    }

    let mut snapshot = Table::with_columns(dest.columns().iter().cloned());
    for row in by_id.into_values() {
        snapshot.push(row);
    }
    snapshot
}
