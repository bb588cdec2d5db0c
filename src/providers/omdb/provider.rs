use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use super::flatten_payload;
use crate::config::{HttpSettings, OMDB_BASE_URL};
use crate::pipeline::{ProviderColumns, Shutdown, SourceAdapter};
use crate::providers::http::JsonHttp;

/// Raw `/?i=<id>` response. OMDb answers 200 for misses too, with
/// `Response: "False"` and an `Error` message.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OmdbPayload {
    pub response: Option<String>,
    pub error: Option<String>,
    pub title: Option<String>,
    pub rated: Option<String>,
    pub released: Option<String>,
    pub plot: Option<String>,
    pub language: Option<String>,
    pub country: Option<String>,
    pub awards: Option<String>,
    pub metascore: Option<String>,
    #[serde(rename = "imdbRating")]
    pub imdb_rating: Option<String>,
    #[serde(rename = "imdbVotes")]
    pub imdb_votes: Option<String>,
    pub box_office: Option<String>,
    #[serde(rename = "DVD")]
    pub dvd: Option<String>,
    pub production: Option<String>,
    #[serde(default)]
    pub ratings: Value,
}

impl OmdbPayload {
    pub fn is_found(&self) -> bool {
        self.response
            .as_deref()
            .is_some_and(|r| r.eq_ignore_ascii_case("true"))
    }
}

/// Errors OMDb reports as `Response: "False"` that are not about the title.
fn is_service_error(message: &str) -> bool {
    let m = message.to_ascii_lowercase();
    m.contains("api key") || m.contains("limit reached")
}

#[derive(Debug, Clone)]
pub struct OmdbProvider {
    base_url: String,
    http: JsonHttp,
    api_key: String,
}

impl OmdbProvider {
    pub fn new(base_url: Option<&str>, api_key: impl Into<String>, http: &HttpSettings) -> Result<Self> {
        let base_url = base_url
            .unwrap_or(OMDB_BASE_URL)
            .trim_end_matches('/')
            .to_string();
        Ok(Self {
            base_url,
            http: JsonHttp::new("omdb", http)?,
            api_key: api_key.into(),
        })
    }

    /// Let a Ctrl+C interrupt a rate-limit backoff.
    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.http = self.http.with_shutdown(shutdown);
        self
    }

    pub async fn fetch(&self, imdb_id: &str) -> Result<Option<OmdbPayload>> {
        let url = format!("{}/", self.base_url);
        let query = [
            ("i", imdb_id),
            ("apikey", self.api_key.as_str()),
            ("plot", "full"),
            ("r", "json"),
        ];
        let Some(body) = self.http.get_json(&url, &query, &[]).await? else {
            return Ok(None);
        };
        let payload: OmdbPayload = serde_json::from_value(body)?;
        if payload.is_found() {
            return Ok(Some(payload));
        }
        let reason = payload.error.as_deref().unwrap_or("unknown");
        if is_service_error(reason) {
            bail!("OMDb refused the request: {reason}");
        }
        warn!(imdb_id, reason, "OMDb did not find a match");
        Ok(None)
    }
}

#[async_trait]
impl SourceAdapter for OmdbProvider {
    async fn lookup(&self, imdb_id: &str) -> Result<Option<ProviderColumns>> {
        Ok(self.fetch(imdb_id).await?.map(|p| flatten_payload(&p)))
    }
}
