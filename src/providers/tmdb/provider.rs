use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use super::flatten_details;
use crate::config::{HttpSettings, TmdbAuth, TMDB_BASE_URL};
use crate::pipeline::{ProviderColumns, Shutdown, SourceAdapter};
use crate::providers::http::JsonHttp;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    Movie,
    Tv,
}

impl MediaType {
    pub fn as_str(self) -> &'static str {
        match self {
            MediaType::Movie => "movie",
            MediaType::Tv => "tv",
        }
    }
}

/// The Movie Database v3 client.
///
/// Endpoints used:
/// - GET /find/{imdb_id}?external_source=imdb_id (movie results first, then tv)
/// - GET /movie/{id} and /tv/{id} with append_to_response=credits,keywords
#[derive(Debug, Clone)]
pub struct TmdbProvider {
    base_url: String,
    http: JsonHttp,
    auth: TmdbAuth,
}

impl TmdbProvider {
    pub fn new(base_url: Option<&str>, auth: TmdbAuth, http: &HttpSettings) -> Result<Self> {
        let base_url = base_url
            .unwrap_or(TMDB_BASE_URL)
            .trim_end_matches('/')
            .to_string();
        Ok(Self {
            base_url,
            http: JsonHttp::new("tmdb", http)?,
            auth,
        })
    }

    /// Let a Ctrl+C interrupt a rate-limit backoff.
    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.http = self.http.with_shutdown(shutdown);
        self
    }

    async fn get(&self, path: &str, params: &[(&str, &str)]) -> Result<Option<Value>> {
        let url = format!("{}{}", self.base_url, path);
        match &self.auth {
            TmdbAuth::ReadToken(token) => {
                let bearer = format!("Bearer {token}");
                self.http
                    .get_json(&url, params, &[("Authorization", bearer.as_str())])
                    .await
            }
            TmdbAuth::ApiKey(key) => {
                let mut query = params.to_vec();
                query.push(("api_key", key.as_str()));
                self.http.get_json(&url, &query, &[]).await
            }
        }
    }

    /// Resolve an IMDb id to a TMDb id and media type.
    pub async fn find_by_imdb_id(&self, imdb_id: &str) -> Result<Option<(MediaType, i64)>> {
        let Some(body) = self
            .get(
                &format!("/find/{imdb_id}"),
                &[("external_source", "imdb_id")],
            )
            .await?
        else {
            return Ok(None);
        };
        Ok(pick_find_result(&body))
    }

    pub async fn details(&self, media_type: MediaType, tmdb_id: i64) -> Result<Option<Value>> {
        self.get(
            &format!("/{}/{}", media_type.as_str(), tmdb_id),
            &[("append_to_response", "credits,keywords")],
        )
        .await
    }
}

/// First movie result, else first tv result, as long as it carries an id.
pub fn pick_find_result(body: &Value) -> Option<(MediaType, i64)> {
    for (key, media_type) in [("movie_results", MediaType::Movie), ("tv_results", MediaType::Tv)] {
        if let Some(first) = body.get(key).and_then(Value::as_array).and_then(|a| a.first()) {
            return first
                .get("id")
                .and_then(Value::as_i64)
                .map(|id| (media_type, id));
        }
    }
    None
}

#[async_trait]
impl SourceAdapter for TmdbProvider {
    async fn lookup(&self, imdb_id: &str) -> Result<Option<ProviderColumns>> {
        let Some((media_type, tmdb_id)) = self.find_by_imdb_id(imdb_id).await? else {
            debug!(imdb_id, "not on TMDb");
            return Ok(None);
        };
        let Some(details) = self.details(media_type, tmdb_id).await? else {
            warn!(imdb_id, tmdb_id, "could not fetch TMDb details");
            return Ok(None);
        };
        Ok(Some(flatten_details(media_type, tmdb_id, &details)))
    }
}
