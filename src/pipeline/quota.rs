//! Per-day call budget for quota-bound providers.
//!
//! State lives in a small JSON file next to the stage output:
//! `{"calls_today": 312, "last_run_date": "2024-01-02", "enriched_ids": [...]}`.
//! The counter is written after every call; ids join `enriched_ids` only once
//! the rows they belong to have been checkpointed.

use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::table::temp_path_for;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaLimits {
    threshold: u32,
    hard_cap: u32,
}

impl QuotaLimits {
    /// `threshold` is where we stop; it must stay below the provider's `hard_cap`.
    pub fn new(threshold: u32, hard_cap: u32) -> Result<Self> {
        if threshold == 0 || threshold >= hard_cap {
            bail!(
                "quota threshold ({threshold}) must be between 1 and the hard cap ({hard_cap}) exclusive"
            );
        }
        Ok(Self {
            threshold,
            hard_cap,
        })
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn hard_cap(&self) -> u32 {
        self.hard_cap
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaState {
    pub calls_today: u32,
    pub last_run_date: NaiveDate,
    #[serde(default)]
    pub enriched_ids: Vec<String>,
}

impl QuotaState {
    fn fresh(today: NaiveDate) -> Self {
        Self {
            calls_today: 0,
            last_run_date: today,
            enriched_ids: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaStatus {
    Fresh,
    Active,
    Exhausted,
}

#[derive(Debug)]
pub struct QuotaTracker {
    path: PathBuf,
    limits: QuotaLimits,
    state: QuotaState,
    ledger: HashSet<String>,
}

impl QuotaTracker {
    /// Load state from `path` (or start fresh), resetting the counter when the
    /// stored date is not `today`.
    pub fn load(path: impl Into<PathBuf>, limits: QuotaLimits, today: NaiveDate) -> Result<Self> {
        let path = path.into();
        let mut state = if path.exists() {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("reading quota state {}", path.display()))?;
            serde_json::from_str::<QuotaState>(&raw)
                .with_context(|| format!("parsing quota state {}", path.display()))?
        } else {
            QuotaState::fresh(today)
        };

        if state.last_run_date != today {
            info!(
                previous_date = %state.last_run_date,
                previous_calls = state.calls_today,
                %today,
                "new day; resetting quota counter"
            );
            state.calls_today = 0;
            state.last_run_date = today;
        }

        let ledger = state.enriched_ids.iter().cloned().collect();
        Ok(Self {
            path,
            limits,
            state,
            ledger,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn limits(&self) -> QuotaLimits {
        self.limits
    }

    pub fn state(&self) -> &QuotaState {
        &self.state
    }

    pub fn calls_today(&self) -> u32 {
        self.state.calls_today
    }

    pub fn status(&self) -> QuotaStatus {
        match self.state.calls_today {
            0 => QuotaStatus::Fresh,
            n if n >= self.limits.threshold => QuotaStatus::Exhausted,
            _ => QuotaStatus::Active,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.status() == QuotaStatus::Exhausted
    }

    /// Calls left before the threshold.
    pub fn remaining(&self) -> u32 {
        self.limits.threshold.saturating_sub(self.state.calls_today)
    }

    /// Ids already attempted and persisted by this stage.
    pub fn ledger(&self) -> &HashSet<String> {
        &self.ledger
    }

    /// Count one external call and persist the counter.
    pub fn record_call(&mut self) -> Result<()> {
        self.state.calls_today = self.state.calls_today.saturating_add(1);
        self.save()
    }

    /// Add ids whose rows are now on disk to the ledger and persist.
    pub fn commit_ids<I>(&mut self, ids: I) -> Result<()>
    where
        I: IntoIterator<Item = String>,
    {
        for id in ids {
            if self.ledger.insert(id.clone()) {
                self.state.enriched_ids.push(id);
            }
        }
        self.save()
    }

    /// Forget every attempted id (used by `--force`).
    pub fn clear_ledger(&mut self) -> Result<()> {
        self.ledger.clear();
        self.state.enriched_ids.clear();
        self.save()
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
        }
        let payload = serde_json::to_string_pretty(&self.state)?;
        let temp_path = temp_path_for(&self.path);
        fs::write(&temp_path, payload)
            .with_context(|| format!("writing {}", temp_path.display()))?;
        fs::rename(&temp_path, &self.path)
            .with_context(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }
}
