//! Runtime configuration.
//!
//! Defaults are production-friendly; every knob can be overridden from the environment
//! ([`IngestConfig::from_env`]) or a YAML file ([`IngestConfig::from_yaml_file`]).

use crate::batch::BatcherConfig;
use crate::client::auth::AuthConfig;
use crate::queue::QueueConfig;
use crate::resilience::rate_limiter::RateLimiterConfig;
use crate::resilience::remote_gate::RemoteGateConfig;
use crate::resilience::retry::RetryPolicy;
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub api_base_url: String,
    pub api_version: String,
    pub auth: AuthConfig,
    #[serde(with = "duration_secs")]
    pub http_timeout: Duration,
    pub rate_limit: RateLimiterConfig,
    pub remote: RemoteGateConfig,
    pub retry: RetryPolicy,
    /// Cap on concurrent outbound calls and on per-item ingest fan-out.
    pub max_inflight: usize,
    pub enable_proxy: bool,
    pub proxy_file: PathBuf,
    /// Include failed plays when fetching a user's recent scores.
    pub include_failed: bool,
    pub queue: QueueConfig,
    pub refresh_batch: BatcherConfig,
    /// How often every known user is fed to the bulk refresher.
    #[serde(with = "duration_secs")]
    pub full_refresh_interval: Duration,
    #[serde(with = "duration_secs")]
    pub poll_interval: Duration,
    #[serde(with = "duration_secs")]
    pub score_cache_ttl: Duration,
    pub cursor_file: PathBuf,
    /// Where undecodable payloads are written for inspection.
    pub dump_dir: PathBuf,
    pub stats_webhook: Option<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://osu.ppy.sh/api/v2".to_string(),
            api_version: "20220705".to_string(),
            auth: AuthConfig::default(),
            http_timeout: Duration::from_secs(15),
            rate_limit: RateLimiterConfig::default(),
            remote: RemoteGateConfig::default(),
            retry: RetryPolicy::default(),
            max_inflight: 20,
            enable_proxy: false,
            proxy_file: PathBuf::from("proxy.txt"),
            include_failed: false,
            queue: QueueConfig::default(),
            refresh_batch: BatcherConfig::default(),
            full_refresh_interval: Duration::from_secs(24 * 60 * 60),
            poll_interval: Duration::from_secs(15),
            score_cache_ttl: Duration::from_secs(24 * 60 * 60),
            cursor_file: PathBuf::from("cursor.txt"),
            dump_dir: PathBuf::from("."),
            stats_webhook: None,
        }
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|s| s.trim().parse::<T>().ok())
}

fn env_flag(name: &str) -> bool {
    env::var(name).map(|v| v.trim() == "true").unwrap_or(false)
}

impl IngestConfig {
    /// Defaults overlaid with environment variables.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.apply_env();
        cfg
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        serde_yaml::from_str(raw).map_err(|e| {
            Error::configuration_with_context(
                "invalid configuration file",
                ErrorContext::new()
                    .with_details(e.to_string())
                    .with_source("config"),
            )
        })
    }

    /// Load a YAML file, then apply environment overrides on top.
    pub async fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::configuration_with_context(
                format!("cannot read configuration: {e}"),
                ErrorContext::new().with_field_path(path.display().to_string()),
            )
        })?;
        let mut cfg = Self::from_yaml_str(&raw)?;
        cfg.apply_env();
        Ok(cfg)
    }

    fn apply_env(&mut self) {
        if let Some(rps) = env_parse::<u32>("REQUESTS_PER_SECOND").filter(|r| *r > 0) {
            if let Some(rl) = RateLimiterConfig::from_rps(rps as f64) {
                self.rate_limit = rl;
            }
        }
        if env_flag("INCLUDE_FAILED") {
            self.include_failed = true;
        }
        if env_flag("ENABLE_PROXY") {
            self.enable_proxy = true;
        }
        if let Ok(path) = env::var("PROXY_FILE") {
            self.proxy_file = PathBuf::from(path);
        }
        if let Ok(id) = env::var("CLIENT_ID") {
            self.auth.client_id = id;
        }
        if let Ok(secret) = env::var("CLIENT_SECRET") {
            self.auth.client_secret = Some(secret);
        }
        if let Ok(url) = env::var("API_BASE_URL") {
            self.api_base_url = url;
        }
        if let Ok(url) = env::var("AUTH_TOKEN_URL") {
            self.auth.token_url = url;
        }
        if let Some(secs) = env_parse::<u64>("HTTP_TIMEOUT_SECS") {
            self.http_timeout = Duration::from_secs(secs.max(1));
        }
        if let Some(n) = env_parse::<usize>("MAX_INFLIGHT") {
            self.max_inflight = n.max(1);
        }
        if let Ok(path) = env::var("CURSOR_FILE") {
            self.cursor_file = PathBuf::from(path);
        }
        if let Ok(path) = env::var("DUMP_DIR") {
            self.dump_dir = PathBuf::from(path);
        }
        if env_flag("ENABLE_WEBHOOK") {
            self.stats_webhook = env::var("STATS_WEBHOOK").ok().filter(|s| !s.is_empty());
        }
    }

    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.api_base_url).map_err(|e| {
            Error::configuration_with_context(
                format!("invalid api base url: {e}"),
                ErrorContext::new().with_field_path("api_base_url"),
            )
        })?;
        if self.auth.client_id.is_empty() {
            return Err(Error::configuration_with_context(
                "missing client id",
                ErrorContext::new().with_field_path("auth.client_id"),
            ));
        }
        if self.queue.workers == 0 {
            return Err(Error::configuration_with_context(
                "at least one queue worker is required",
                ErrorContext::new().with_field_path("queue.workers"),
            ));
        }
        Ok(())
    }
}

/// Serde adapter storing a `Duration` as (fractional) seconds.
pub mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(serde::de::Error::custom("duration must be a non-negative number of seconds"));
        }
        Ok(Duration::from_secs_f64(secs))
    }
}
