use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::{header::HeaderMap, Client, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::HttpSettings;
use crate::pipeline::Shutdown;

fn truncate_for_log(mut s: String, max_len: usize) -> String {
    if s.len() > max_len {
        let mut cut = max_len;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
        s.push('…');
    }
    s
}

/// Wait before retrying a 429: the configured backoff, or `Retry-After` when longer.
/// `None` when that wait would exceed `max_wait`.
pub fn retry_delay(headers: &HeaderMap, backoff: Duration, max_wait: Duration) -> Option<Duration> {
    let retry_after = headers
        .get("Retry-After")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
    let wait = match retry_after {
        Some(d) if d > backoff => d,
        _ => backoff,
    };
    (wait <= max_wait).then_some(wait)
}

/// Shared JSON GET client for the metadata providers.
///
/// 404 maps to `Ok(None)`. HTTP 429 is retried at most `max_retries` times;
/// after that, and for any other non-success status, the call fails. So does a
/// 429 whose `Retry-After` is beyond `max_retry_wait`, or a backoff cut short
/// by a shutdown request.
#[derive(Debug, Clone)]
pub struct JsonHttp {
    provider: &'static str,
    http: Client,
    max_retries: u32,
    backoff: Duration,
    max_wait: Duration,
    shutdown: Shutdown,
}

impl JsonHttp {
    pub fn new(provider: &'static str, settings: &HttpSettings) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("cinescope/", env!("CARGO_PKG_VERSION")))
            .timeout(settings.timeout)
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            provider,
            http,
            max_retries: settings.max_retries,
            backoff: settings.retry_backoff,
            max_wait: settings.max_retry_wait,
            shutdown: Shutdown::new(),
        })
    }

    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub async fn get_json(
        &self,
        url: &str,
        query: &[(&str, &str)],
        headers: &[(&str, &str)],
    ) -> Result<Option<Value>> {
        let mut attempt: u32 = 0;
        loop {
            let mut req = self.http.get(url).header("Accept", "application/json");
            for (name, value) in headers {
                req = req.header(*name, *value);
            }
            if !query.is_empty() {
                req = req.query(query);
            }

            let resp = req
                .send()
                .await
                .with_context(|| format!("{} request failed: {}", self.provider, url))?;
            let status = resp.status();
            debug!(provider = self.provider, %status, url, "response");

            if status == StatusCode::NOT_FOUND {
                return Ok(None);
            }
            if status == StatusCode::TOO_MANY_REQUESTS {
                if attempt >= self.max_retries {
                    bail!(
                        "{} rate limited (HTTP 429) after {} retries",
                        self.provider,
                        attempt
                    );
                }
                let Some(wait) = retry_delay(resp.headers(), self.backoff, self.max_wait) else {
                    bail!(
                        "{} rate limited (HTTP 429) and asked to wait longer than {}s",
                        self.provider,
                        self.max_wait.as_secs()
                    );
                };
                attempt += 1;
                warn!(
                    provider = self.provider,
                    attempt,
                    wait_secs = wait.as_secs(),
                    "rate limited; backing off"
                );
                self.shutdown.sleep(wait).await;
                if self.shutdown.is_requested() {
                    bail!("{} retry abandoned: shutdown requested", self.provider);
                }
                continue;
            }
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                bail!(
                    "{} HTTP {}: {}",
                    self.provider,
                    status,
                    truncate_for_log(body, 300)
                );
            }

            let body = resp
                .json::<Value>()
                .await
                .with_context(|| format!("{} returned a non-JSON body", self.provider))?;
            return Ok(Some(body));
        }
    }
}
