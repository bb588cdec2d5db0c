pub mod provider;

pub use provider::DddProvider;

use anyhow::Result;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::Settings;
use crate::normalization::numeric::value_as_f64;
use crate::pipeline::{
    schema, CheckpointStore, ProviderColumns, RunOptions, Shutdown, StageDriver, StageInput,
    StageSummary,
};

/// Crowd verdict for one content-warning topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Yes,
    No,
    Controversial,
    NoVotes,
}

impl Verdict {
    pub fn from_votes(yes: u64, no: u64) -> Self {
        match (yes, no) {
            (0, 0) => Verdict::NoVotes,
            (y, n) if y > n => Verdict::Yes,
            (y, n) if n > y => Verdict::No,
            _ => Verdict::Controversial,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Yes => "Yes",
            Verdict::No => "No",
            Verdict::Controversial => "Controversial",
            Verdict::NoVotes => "No Votes",
        }
    }
}

/// Stage 3: OMDb table → DDD-enriched table.
pub async fn enrich(settings: &Settings, opts: RunOptions, shutdown: Shutdown) -> Result<StageSummary> {
    let api_key = settings.require_ddd_key()?;
    let provider = DddProvider::new(Some(settings.ddd.base_url.as_str()), api_key, &settings.http)?
        .with_shutdown(shutdown.clone());
    info!(
        stage = "ddd",
        checkpoint_every = settings.ddd.checkpoint_every,
        "starting DDD enrichment"
    );

    let mut driver = StageDriver::new(
        schema::DDD,
        StageInput::Upstream(settings.omdb_output()),
        CheckpointStore::new(settings.ddd_output(), settings.ddd.checkpoint_every),
        provider,
    )
    .with_pacing(settings.ddd.delay)
    .with_shutdown(shutdown);
    driver.run(opts).await
}

/// Topic name → column suffix: lowercase, runs of anything but ASCII
/// letters and digits collapse to one `_`.
pub fn topic_slug(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_sep = false;
    for ch in name.chars() {
        let c = ch.to_ascii_lowercase();
        if c.is_ascii_alphanumeric() {
            out.push(c);
            last_sep = false;
        } else if !last_sep {
            out.push('_');
            last_sep = true;
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        "unknown".to_string()
    } else {
        trimmed.to_string()
    }
}

fn votes(stat: &Value, key: &str) -> u64 {
    stat.get(key)
        .and_then(value_as_f64)
        .filter(|n| *n > 0.0)
        .map_or(0, |n| n as u64)
}

/// Pivot a `/media/{id}` payload into `ddd_id` plus one `ddd_<topic>` verdict
/// column per topic. `None` when the payload has no item or no topic stats.
pub fn flatten_media(media: &Value) -> Option<ProviderColumns> {
    let item_id = media.get("item")?.get("id")?.clone();
    let stats = media.get("topicItemStats")?.as_array()?;

    let mut cols = ProviderColumns::new(schema::DDD.prefix);
    cols.set("id", item_id);
    for stat in stats {
        let Some(topic) = stat.get("topic") else {
            continue;
        };
        let name = topic.get("name").and_then(Value::as_str).unwrap_or("unknown");
        let verdict = Verdict::from_votes(votes(stat, "yesSum"), votes(stat, "noSum"));
        let slug = topic_slug(name);
        if let Some(previous) = cols.get(&slug) {
            debug!(
                topic = name,
                column = %format!("{}_{}", cols.prefix(), slug),
                previous = %previous,
                "topic name collides with an earlier one; keeping the later verdict"
            );
        }
        cols.set(&slug, verdict.as_str());
    }
    Some(cols)
}
