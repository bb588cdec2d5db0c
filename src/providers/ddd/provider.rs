use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use super::flatten_media;
use crate::config::{HttpSettings, DDD_BASE_URL};
use crate::pipeline::{ProviderColumns, Shutdown, SourceAdapter};
use crate::providers::http::JsonHttp;

/// "Does the Dog Die?" client.
///
/// Two calls per title: `GET /dddsearch?imdb=<digits>` for the internal id,
/// then `GET /media/{id}` for the topic vote tallies.
#[derive(Debug, Clone)]
pub struct DddProvider {
    base_url: String,
    http: JsonHttp,
    api_key: String,
}

impl DddProvider {
    pub fn new(base_url: Option<&str>, api_key: impl Into<String>, http: &HttpSettings) -> Result<Self> {
        let base_url = base_url
            .unwrap_or(DDD_BASE_URL)
            .trim_end_matches('/')
            .to_string();
        Ok(Self {
            base_url,
            http: JsonHttp::new("ddd", http)?,
            api_key: api_key.into(),
        })
    }

    /// Let a Ctrl+C interrupt a rate-limit backoff.
    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.http = self.http.with_shutdown(shutdown);
        self
    }

    async fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<Option<Value>> {
        let url = format!("{}{}", self.base_url, path);
        self.http
            .get_json(&url, query, &[("X-API-KEY", self.api_key.as_str())])
            .await
    }

    /// Internal DDD id of the first search hit.
    pub async fn search(&self, imdb_id: &str) -> Result<Option<i64>> {
        let digits = imdb_id.trim_start_matches("tt");
        let Some(body) = self.get("/dddsearch", &[("imdb", digits)]).await? else {
            return Ok(None);
        };
        let Some(first) = body
            .get("items")
            .and_then(Value::as_array)
            .and_then(|items| items.first())
        else {
            debug!(imdb_id, "no DDD item");
            return Ok(None);
        };
        let id = first.get("id").and_then(Value::as_i64);
        if id.is_none() {
            warn!(imdb_id, "DDD item has no internal id");
        }
        Ok(id)
    }

    pub async fn media(&self, ddd_id: i64) -> Result<Option<Value>> {
        self.get(&format!("/media/{ddd_id}"), &[]).await
    }
}

#[async_trait]
impl SourceAdapter for DddProvider {
    async fn lookup(&self, imdb_id: &str) -> Result<Option<ProviderColumns>> {
        let Some(ddd_id) = self.search(imdb_id).await? else {
            return Ok(None);
        };
        let Some(media) = self.media(ddd_id).await? else {
            return Ok(None);
        };
        Ok(flatten_media(&media))
    }
}
