use anyhow::{bail, Result};

use super::{merge::AbsentPolicy, progress::Completion, table::Table};

/// Columns every stage expects from its input, watchlist included.
pub const CORE_COLUMNS: &[&str] = &["const", "title", "title_type"];

/// Stage 2 reads stage 1 output, which always carries the TMDb marker.
const OMDB_INPUT: &[&str] = &["const", "title", "title_type", "tmdb_id"];

/// Stage 3 reads stage 2 output: both earlier markers are present.
const DDD_INPUT: &[&str] = &["const", "title", "title_type", "tmdb_id", "omdb_title"];

/// How a stage's destination is initialized when there is no prior output
/// (or `--force` is given).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Seed {
    /// Start empty; only attempted rows are written.
    Empty,
    /// Start from a copy of the input so prior stages' columns carry through.
    CopyOfSource,
}

/// Column contract for one stage. Bump `version` when the provider columns change.
#[derive(Debug, Clone, Copy)]
pub struct StageSchema {
    pub name: &'static str,
    pub version: u32,
    pub prefix: &'static str,
    /// Column written for every attempted row, found or not.
    pub marker: &'static str,
    /// Stage whose output feeds this one, for error messages.
    pub upstream: Option<&'static str>,
    pub required_columns: &'static [&'static str],
    pub completion: Completion,
    pub seed: Seed,
    pub absent: AbsentPolicy,
}

impl StageSchema {
    /// Fail fast when the input lacks a column this stage relies on.
    pub fn validate_input(&self, input: &Table) -> Result<()> {
        let missing: Vec<&str> = self
            .required_columns
            .iter()
            .copied()
            .filter(|c| !input.has_column(c))
            .collect();
        if !missing.is_empty() {
            bail!(
                "{} stage (schema v{}) input is missing required columns: {:?}",
                self.name,
                self.version,
                missing
            );
        }
        Ok(())
    }
}

pub const TMDB: StageSchema = StageSchema {
    name: "tmdb",
    version: 1,
    prefix: "tmdb",
    marker: "tmdb_id",
    upstream: None,
    required_columns: CORE_COLUMNS,
    completion: Completion::Presence,
    seed: Seed::Empty,
    absent: AbsentPolicy::PassThrough,
};

pub const OMDB: StageSchema = StageSchema {
    name: "omdb",
    version: 2,
    prefix: "omdb",
    marker: "omdb_title",
    upstream: Some("tmdb"),
    required_columns: OMDB_INPUT,
    completion: Completion::Marker {
        column: "omdb_title",
    },
    seed: Seed::CopyOfSource,
    absent: AbsentPolicy::PassThrough,
};

pub const DDD_NOT_FOUND: &str = "NOT_FOUND";

pub const DDD: StageSchema = StageSchema {
    name: "ddd",
    version: 2,
    prefix: "ddd",
    marker: "ddd_id",
    upstream: Some("omdb"),
    required_columns: DDD_INPUT,
    completion: Completion::Marker { column: "ddd_id" },
    seed: Seed::CopyOfSource,
    absent: AbsentPolicy::Sentinel {
        column: "ddd_id",
        value: DDD_NOT_FOUND,
    },
};
