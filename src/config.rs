//! Configuration types for wiki-fetch

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Cache layout and persistence settings
///
/// Every key below is relative to the storage provider's root.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Root directory used by the filesystem storage provider (default: "./wiki-cache")
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,

    /// Serve and store articles through the cache (default: true)
    #[serde(default = "default_true")]
    pub article_cache_enabled: bool,

    /// Folder holding cached article entries (default: "articles")
    #[serde(default = "default_articles_dir")]
    pub articles_dir: String,

    /// Folder holding content-addressed media files (default: "media")
    #[serde(default = "default_media_dir")]
    pub media_dir: String,

    /// Key of the persisted URL → local path map (default: "media_map.json")
    #[serde(default = "default_media_map_key")]
    pub media_map_key: String,

    /// Key of the persisted download queue (default: "download_queue.json")
    #[serde(default = "default_queue_key")]
    pub queue_key: String,

    /// Key of the persisted wiki registry (default: "wikis.json")
    #[serde(default = "default_registry_key")]
    pub registry_key: String,

    /// Quiet period before the media map is written (default: 2 seconds)
    #[serde(default = "default_flush_debounce", with = "duration_serde")]
    pub flush_debounce: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
            article_cache_enabled: true,
            articles_dir: default_articles_dir(),
            media_dir: default_media_dir(),
            media_map_key: default_media_map_key(),
            queue_key: default_queue_key(),
            registry_key: default_registry_key(),
            flush_debounce: default_flush_debounce(),
        }
    }
}

/// Network backend settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// User agent sent by the direct HTTP backend
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Per-request timeout (default: 30 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,

    /// Upper bound for a challenge-solving navigation (default: 45 seconds)
    ///
    /// A scripted navigation that has not settled by then is reported as a
    /// transient failure.
    #[serde(default = "default_challenge_timeout", with = "duration_serde")]
    pub challenge_timeout: Duration,

    /// Gatekeeper relay endpoint receiving `{url}` / `{url, postData}` JSON
    #[serde(default = "default_gatekeeper_endpoint")]
    pub gatekeeper_endpoint: String,

    /// Maximum concurrent media downloads across the whole client (default: 6)
    #[serde(default = "default_max_concurrent_downloads")]
    pub max_concurrent_downloads: usize,

    /// URL probed by [`crate::connectivity::HttpConnectivity`] (None = assume online)
    #[serde(default)]
    pub connectivity_probe_url: Option<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            request_timeout: default_request_timeout(),
            challenge_timeout: default_challenge_timeout(),
            gatekeeper_endpoint: default_gatekeeper_endpoint(),
            max_concurrent_downloads: default_max_concurrent_downloads(),
            connectivity_probe_url: None,
        }
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 30 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Main configuration for [`crate::WikiClient`]
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Cache layout and persistence
    #[serde(default)]
    pub cache: CacheConfig,

    /// Network backends
    #[serde(default)]
    pub network: NetworkConfig,

    /// Retry policy for transient failures
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Config {
    /// Check settings that would make the client unusable
    pub fn validate(&self) -> Result<()> {
        if self.network.max_concurrent_downloads == 0 {
            return Err(Error::config(
                "must allow at least one concurrent download",
                "max_concurrent_downloads",
            ));
        }
        if url::Url::parse(&self.network.gatekeeper_endpoint).is_err() {
            return Err(Error::config(
                format!(
                    "not an absolute URL: {}",
                    self.network.gatekeeper_endpoint
                ),
                "gatekeeper_endpoint",
            ));
        }
        if let Some(probe) = &self.network.connectivity_probe_url
            && url::Url::parse(probe).is_err()
        {
            return Err(Error::config(
                format!("not an absolute URL: {probe}"),
                "connectivity_probe_url",
            ));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(Error::config(
                "backoff multiplier must be >= 1.0",
                "backoff_multiplier",
            ));
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_root_dir() -> PathBuf {
    PathBuf::from("./wiki-cache")
}

fn default_articles_dir() -> String {
    "articles".to_string()
}

fn default_media_dir() -> String {
    "media".to_string()
}

fn default_media_map_key() -> String {
    "media_map.json".to_string()
}

fn default_queue_key() -> String {
    "download_queue.json".to_string()
}

fn default_registry_key() -> String {
    "wikis.json".to_string()
}

fn default_flush_debounce() -> Duration {
    Duration::from_secs(2)
}

fn default_user_agent() -> String {
    concat!("wiki-fetch/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_challenge_timeout() -> Duration {
    Duration::from_secs(45)
}

fn default_gatekeeper_endpoint() -> String {
    "https://gatekeeper.invalid/v1/request".to_string()
}

fn default_max_concurrent_downloads() -> usize {
    6
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
