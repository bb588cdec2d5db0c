pub mod provider;

pub use provider::{MediaType, TmdbProvider};

use anyhow::Result;
use serde_json::Value;
use tracing::info;

use crate::config::Settings;
use crate::normalization::numeric::number_cell;
use crate::pipeline::{
    schema, CheckpointStore, ProviderColumns, RunOptions, Shutdown, StageDriver, StageInput,
    StageSummary,
};

const CAST_LIMIT: usize = 10;

/// Stage 1: watchlist → TMDb-enriched table.
pub async fn enrich(settings: &Settings, opts: RunOptions, shutdown: Shutdown) -> Result<StageSummary> {
    let auth = settings.require_tmdb_auth()?.clone();
    let provider = TmdbProvider::new(Some(settings.tmdb.base_url.as_str()), auth, &settings.http)?
        .with_shutdown(shutdown.clone());
    info!(
        stage = "tmdb",
        rate_limit = settings.tmdb.rate_limit,
        checkpoint_every = settings.tmdb.checkpoint_every,
        "starting TMDb enrichment"
    );

    let mut driver = StageDriver::new(
        schema::TMDB,
        StageInput::Watchlist(settings.watchlist_file()),
        CheckpointStore::new(settings.tmdb_output(), settings.tmdb.checkpoint_every),
        provider,
    )
    .with_pacing(settings.tmdb.pacing())
    .with_shutdown(shutdown);
    driver.run(opts).await
}

fn names(details: &Value, pointer: &str, field: &str) -> Vec<String> {
    details
        .pointer(pointer)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get(field).and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn text(details: &Value, key: &str) -> Value {
    match details.get(key).and_then(Value::as_str) {
        Some(s) if !s.trim().is_empty() => Value::String(s.to_string()),
        _ => Value::Null,
    }
}

fn number(details: &Value, key: &str) -> Value {
    number_cell(details.get(key).and_then(Value::as_f64))
}

/// Flatten a `/movie/{id}` or `/tv/{id}` payload into `tmdb_*` columns.
pub fn flatten_details(media_type: MediaType, tmdb_id: i64, details: &Value) -> ProviderColumns {
    let mut cols = ProviderColumns::new(schema::TMDB.prefix);
    cols.set("id", tmdb_id).set("media_type", media_type.as_str());

    let (title_key, original_key) = match media_type {
        MediaType::Movie => ("title", "original_title"),
        MediaType::Tv => ("name", "original_name"),
    };
    cols.set("title", text(details, title_key))
        .set("original_title", text(details, original_key))
        .set("tagline", text(details, "tagline"))
        .set("overview", text(details, "overview"))
        .set("popularity", number(details, "popularity"))
        .set("poster_path", text(details, "poster_path"))
        .set("backdrop_path", text(details, "backdrop_path"))
        .set("budget", number(details, "budget"))
        .set("revenue", number(details, "revenue"))
        .set("status", text(details, "status"))
        .set("vote_average", number(details, "vote_average"))
        .set("vote_count", number(details, "vote_count"));

    let runtime = match media_type {
        MediaType::Movie => number(details, "runtime"),
        MediaType::Tv => number_cell(
            details
                .pointer("/episode_run_time/0")
                .and_then(Value::as_f64),
        ),
    };
    cols.set("runtime", runtime);

    let keywords_pointer = match media_type {
        MediaType::Movie => "/keywords/keywords",
        MediaType::Tv => "/keywords/results",
    };
    let mut cast = names(details, "/credits/cast", "name");
    cast.truncate(CAST_LIMIT);

    cols.set_list("genres", names(details, "/genres", "name"))
        .set_list(
            "production_companies",
            names(details, "/production_companies", "name"),
        )
        .set_list(
            "production_countries",
            names(details, "/production_countries", "name"),
        )
        .set_list(
            "spoken_languages",
            names(details, "/spoken_languages", "english_name"),
        )
        .set_list("keywords", names(details, keywords_pointer, "name"))
        .set_list("cast", cast);
    cols
}
