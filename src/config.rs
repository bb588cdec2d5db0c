//! Runtime settings, built once from the environment and passed by reference.

use std::{fs, path::PathBuf, time::Duration};

use anyhow::{bail, Context, Result};
use tracing::info;

use crate::pipeline::quota::QuotaLimits;
use crate::util::env::{env_opt, env_parse, preflight_check};

pub const TMDB_BASE_URL: &str = "https://api.themoviedb.org/3";
pub const OMDB_BASE_URL: &str = "https://www.omdbapi.com";
pub const DDD_BASE_URL: &str = "https://www.doesthedogdie.com";

const WATCHLIST_FILE: &str = "Watchlist_IMDB.csv";
const TMDB_OUTPUT: &str = "01_tmdb_enriched_media.csv";
const OMDB_OUTPUT: &str = "02_omdb_enriched_media.csv";
const DDD_OUTPUT: &str = "03_ddd_enriched_media.csv";
const OMDB_STATUS: &str = "omdb_enrichment_status.json";
const LOG_FILE: &str = "cinescope.log";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TmdbAuth {
    /// v4 read access token, sent as `Authorization: Bearer`.
    ReadToken(String),
    /// v3 key, sent as the `api_key` query parameter.
    ApiKey(String),
}

#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub timeout: Duration,
    /// Retries after an HTTP 429 before the item is given up for this run.
    pub max_retries: u32,
    pub retry_backoff: Duration,
    /// Longest `Retry-After` we are willing to honour; a longer one fails the item.
    pub max_retry_wait: Duration,
}

#[derive(Debug, Clone)]
pub struct TmdbSettings {
    pub auth: Option<TmdbAuth>,
    pub base_url: String,
    /// Requests per second.
    pub rate_limit: u32,
    pub checkpoint_every: usize,
}

impl TmdbSettings {
    pub fn pacing(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / u64::from(self.rate_limit.max(1)))
    }
}

#[derive(Debug, Clone)]
pub struct OmdbSettings {
    pub api_key: Option<String>,
    pub base_url: String,
    pub daily_cap: u32,
    pub daily_threshold: u32,
    pub delay: Duration,
    pub checkpoint_every: usize,
}

#[derive(Debug, Clone)]
pub struct DddSettings {
    pub api_key: Option<String>,
    pub base_url: String,
    pub delay: Duration,
    pub checkpoint_every: usize,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub log_level: String,
    pub http: HttpSettings,
    pub tmdb: TmdbSettings,
    pub omdb: OmdbSettings,
    pub ddd: DddSettings,
}

impl Settings {
    /// Defaults rooted at `data_dir`, no credentials.
    pub fn defaults(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            log_level: "info".to_string(),
            http: HttpSettings {
                timeout: Duration::from_secs(15),
                max_retries: 1,
                retry_backoff: Duration::from_secs(10),
                max_retry_wait: Duration::from_secs(120),
            },
            tmdb: TmdbSettings {
                auth: None,
                base_url: TMDB_BASE_URL.to_string(),
                rate_limit: 40,
                checkpoint_every: 1,
            },
            omdb: OmdbSettings {
                api_key: None,
                base_url: OMDB_BASE_URL.to_string(),
                daily_cap: 1000,
                daily_threshold: 980,
                delay: Duration::from_millis(100),
                checkpoint_every: 10,
            },
            ddd: DddSettings {
                api_key: None,
                base_url: DDD_BASE_URL.to_string(),
                delay: Duration::from_millis(100),
                checkpoint_every: 20,
            },
        }
    }

    pub fn from_env() -> Result<Self> {
        let data_dir = env_opt("CINESCOPE_DATA_DIR").unwrap_or_else(|| "data".to_string());
        let d = Self::defaults(data_dir);

        let tmdb_auth = match (env_opt("TMDB_READ_TOKEN"), env_opt("TMDB_API_KEY")) {
            (Some(token), _) => Some(TmdbAuth::ReadToken(token)),
            (None, Some(key)) => Some(TmdbAuth::ApiKey(key)),
            (None, None) => None,
        };

        let settings = Self {
            log_level: env_opt("LOG_LEVEL")
                .map(|l| l.to_ascii_lowercase())
                .unwrap_or(d.log_level),
            http: HttpSettings {
                timeout: Duration::from_secs(env_parse("HTTP_TIMEOUT_SECS", 15u64)),
                max_retries: env_parse("HTTP_MAX_RETRIES", d.http.max_retries),
                retry_backoff: Duration::from_secs(env_parse("HTTP_RETRY_BACKOFF_SECS", 10u64)),
                max_retry_wait: Duration::from_secs(env_parse("HTTP_MAX_RETRY_WAIT_SECS", 120u64)),
            },
            tmdb: TmdbSettings {
                auth: tmdb_auth,
                base_url: env_opt("TMDB_BASE_URL").unwrap_or(d.tmdb.base_url),
                rate_limit: env_parse("TMDB_RATE_LIMIT", d.tmdb.rate_limit),
                checkpoint_every: env_parse("TMDB_CHECKPOINT_EVERY", d.tmdb.checkpoint_every),
            },
            omdb: OmdbSettings {
                api_key: env_opt("OMDB_API_KEY"),
                base_url: env_opt("OMDB_BASE_URL").unwrap_or(d.omdb.base_url),
                daily_cap: env_parse("OMDB_DAILY_CAP", d.omdb.daily_cap),
                daily_threshold: env_parse("OMDB_DAILY_THRESHOLD", d.omdb.daily_threshold),
                delay: Duration::from_millis(env_parse("OMDB_DELAY_MS", 100u64)),
                checkpoint_every: env_parse("OMDB_CHECKPOINT_EVERY", d.omdb.checkpoint_every),
            },
            ddd: DddSettings {
                api_key: env_opt("DDD_API_KEY"),
                base_url: env_opt("DDD_BASE_URL").unwrap_or(d.ddd.base_url),
                delay: Duration::from_millis(env_parse("DDD_DELAY_MS", 100u64)),
                checkpoint_every: env_parse("DDD_CHECKPOINT_EVERY", d.ddd.checkpoint_every),
            },
            data_dir: d.data_dir,
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings that would make a run misbehave rather than fail later.
    pub fn validate(&self) -> Result<()> {
        self.quota_limits()?;
        if self.tmdb.rate_limit == 0 {
            bail!("TMDB_RATE_LIMIT must be at least 1 request per second");
        }
        if self.http.timeout.is_zero() {
            bail!("HTTP_TIMEOUT_SECS must be greater than zero");
        }
        if self.http.max_retry_wait < self.http.retry_backoff {
            bail!("HTTP_MAX_RETRY_WAIT_SECS must not be shorter than HTTP_RETRY_BACKOFF_SECS");
        }
        Ok(())
    }

    pub fn quota_limits(&self) -> Result<QuotaLimits> {
        QuotaLimits::new(self.omdb.daily_threshold, self.omdb.daily_cap)
            .context("invalid OMDB_DAILY_THRESHOLD / OMDB_DAILY_CAP")
    }

    pub fn raw_dir(&self) -> PathBuf {
        self.data_dir.join("raw")
    }

    pub fn processed_dir(&self) -> PathBuf {
        self.data_dir.join("processed")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    pub fn watchlist_file(&self) -> PathBuf {
        self.raw_dir().join(WATCHLIST_FILE)
    }

    pub fn tmdb_output(&self) -> PathBuf {
        self.processed_dir().join(TMDB_OUTPUT)
    }

    pub fn omdb_output(&self) -> PathBuf {
        self.processed_dir().join(OMDB_OUTPUT)
    }

    pub fn ddd_output(&self) -> PathBuf {
        self.processed_dir().join(DDD_OUTPUT)
    }

    pub fn omdb_status_file(&self) -> PathBuf {
        self.processed_dir().join(OMDB_STATUS)
    }

    pub fn log_file(&self) -> PathBuf {
        self.logs_dir().join(LOG_FILE)
    }

    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [self.raw_dir(), self.processed_dir(), self.logs_dir()] {
            fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
        }
        info!(data_dir = %self.data_dir.display(), "core directories ensured");
        Ok(())
    }

    pub fn require_tmdb_auth(&self) -> Result<&TmdbAuth> {
        match self.tmdb.auth.as_ref() {
            Some(auth) => Ok(auth),
            None => {
                preflight_check("tmdb", &[&["TMDB_READ_TOKEN", "TMDB_API_KEY"]], &SNAPSHOT_KEYS)?;
                bail!("TMDb credentials are not configured")
            }
        }
    }

    pub fn require_omdb_key(&self) -> Result<&str> {
        match self.omdb.api_key.as_deref() {
            Some(key) => Ok(key),
            None => {
                preflight_check("omdb", &[&["OMDB_API_KEY"]], &SNAPSHOT_KEYS)?;
                bail!("OMDB_API_KEY is not configured")
            }
        }
    }

    pub fn require_ddd_key(&self) -> Result<&str> {
        match self.ddd.api_key.as_deref() {
            Some(key) => Ok(key),
            None => {
                preflight_check("ddd", &[&["DDD_API_KEY"]], &SNAPSHOT_KEYS)?;
                bail!("DDD_API_KEY is not configured")
            }
        }
    }
}

const SNAPSHOT_KEYS: [&str; 10] = [
    "CINESCOPE_DATA_DIR",
    "TMDB_READ_TOKEN",
    "TMDB_API_KEY",
    "OMDB_API_KEY",
    "DDD_API_KEY",
    "TMDB_RATE_LIMIT",
    "OMDB_DAILY_CAP",
    "OMDB_DAILY_THRESHOLD",
    "HTTP_TIMEOUT_SECS",
    "HTTP_MAX_RETRIES",
];
