pub mod provider;

pub use provider::{OmdbPayload, OmdbProvider};

use anyhow::Result;
use chrono::NaiveDate;
use serde_json::Value;
use tracing::info;

use crate::config::Settings;
use crate::normalization::{
    numeric::{number_cell, parse_number, text_cell},
    rating::RatingDemux,
};
use crate::pipeline::{
    schema, CheckpointStore, ProviderColumns, QuotaTracker, RunOptions, Shutdown, StageDriver,
    StageInput, StageSummary,
};

/// Stage 2: TMDb table → OMDb-enriched table, bounded by the daily quota.
pub async fn enrich(
    settings: &Settings,
    opts: RunOptions,
    shutdown: Shutdown,
    today: NaiveDate,
) -> Result<StageSummary> {
    let api_key = settings.require_omdb_key()?;
    let quota = QuotaTracker::load(settings.omdb_status_file(), settings.quota_limits()?, today)?;
    info!(
        stage = "omdb",
        calls_today = quota.calls_today(),
        threshold = quota.limits().threshold(),
        hard_cap = quota.limits().hard_cap(),
        "starting OMDb enrichment"
    );

    let provider = OmdbProvider::new(Some(settings.omdb.base_url.as_str()), api_key, &settings.http)?
        .with_shutdown(shutdown.clone());
    let mut driver = StageDriver::new(
        schema::OMDB,
        StageInput::Upstream(settings.tmdb_output()),
        CheckpointStore::new(settings.omdb_output(), settings.omdb.checkpoint_every),
        provider,
    )
    .with_pacing(settings.omdb.delay)
    .with_quota(quota)
    .with_shutdown(shutdown);
    driver.run(opts).await
}

/// Flatten a found OMDb payload into `omdb_*` columns. `"N/A"` becomes null;
/// numeric fields are parsed, unparsable ones become null.
pub fn flatten_payload(payload: &OmdbPayload) -> ProviderColumns {
    let mut cols = ProviderColumns::new(schema::OMDB.prefix);
    cols.set("title", text_cell(payload.title.as_deref()))
        .set("rated", text_cell(payload.rated.as_deref()))
        .set("released", text_cell(payload.released.as_deref()))
        .set("plot", text_cell(payload.plot.as_deref()))
        .set("language", text_cell(payload.language.as_deref()))
        .set("country", text_cell(payload.country.as_deref()))
        .set("awards", text_cell(payload.awards.as_deref()))
        .set("metascore", number_cell(parse_number(payload.metascore.as_deref())))
        .set("imdb_rating", number_cell(parse_number(payload.imdb_rating.as_deref())))
        .set("imdb_votes", number_cell(parse_number(payload.imdb_votes.as_deref())))
        .set("box_office", text_cell(payload.box_office.as_deref()))
        .set("dvd_release", text_cell(payload.dvd.as_deref()))
        .set("production_co", text_cell(payload.production.as_deref()));

    let demux = RatingDemux::with_defaults();
    for column in ["rating_imdb", "rating_rotten_tomatoes", "rating_metacritic"] {
        cols.set(column, Value::Null);
    }
    for (column, value) in demux.demux(&payload.ratings) {
        cols.set(column, text_cell(Some(value.as_str())));
    }
    cols
}
