//! Stage selection and chaining for the CLI.

use anyhow::Result;
use chrono::NaiveDate;
use tracing::{info, warn};

use crate::config::Settings;
use crate::pipeline::{QuotaStatus, QuotaTracker, RunOptions, Shutdown, StageSummary, StopReason};
use crate::providers::{ddd, omdb, tmdb};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Tmdb,
    Omdb,
    Ddd,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Tmdb, Stage::Omdb, Stage::Ddd];

    pub fn name(self) -> &'static str {
        match self {
            Stage::Tmdb => "tmdb",
            Stage::Omdb => "omdb",
            Stage::Ddd => "ddd",
        }
    }
}

pub async fn run_stage(
    stage: Stage,
    settings: &Settings,
    opts: RunOptions,
    shutdown: Shutdown,
    today: NaiveDate,
) -> Result<StageSummary> {
    let summary = match stage {
        Stage::Tmdb => tmdb::enrich(settings, opts, shutdown).await?,
        Stage::Omdb => omdb::enrich(settings, opts, shutdown, today).await?,
        Stage::Ddd => ddd::enrich(settings, opts, shutdown).await?,
    };
    summary.report();
    Ok(summary)
}

/// Run the stages in order, stopping the chain after an interrupt or when the
/// OMDb quota runs out (later stages would only see a partial upstream).
pub async fn run_all(
    settings: &Settings,
    opts: RunOptions,
    shutdown: Shutdown,
    today: NaiveDate,
) -> Result<Vec<StageSummary>> {
    let mut summaries = Vec::with_capacity(Stage::ALL.len());
    for stage in Stage::ALL {
        let summary = run_stage(stage, settings, opts, shutdown.clone(), today).await?;
        let stop = summary.stop;
        summaries.push(summary);
        match stop {
            StopReason::Interrupted => {
                info!(stage = stage.name(), "stopping pipeline after interrupt");
                break;
            }
            StopReason::QuotaExhausted => {
                warn!(stage = stage.name(), "quota reached; later stages will run next time");
                break;
            }
            StopReason::Completed | StopReason::NothingToDo => {}
        }
    }
    Ok(summaries)
}

/// Log the OMDb quota state as it would be seen by a run started `today`.
pub fn report_quota(settings: &Settings, today: NaiveDate) -> Result<QuotaTracker> {
    let tracker = QuotaTracker::load(settings.omdb_status_file(), settings.quota_limits()?, today)?;
    let status = match tracker.status() {
        QuotaStatus::Fresh => "fresh",
        QuotaStatus::Active => "active",
        QuotaStatus::Exhausted => "exhausted",
    };
    info!(
        path = %tracker.path().display(),
        date = %tracker.state().last_run_date,
        calls_today = tracker.calls_today(),
        threshold = tracker.limits().threshold(),
        hard_cap = tracker.limits().hard_cap(),
        remaining = tracker.remaining(),
        enriched_ids = tracker.ledger().len(),
        status,
        "OMDb quota"
    );
    Ok(tracker)
}
