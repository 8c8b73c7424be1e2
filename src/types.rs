//! Core types for wiki-fetch

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Stable identifier for a configured wiki
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WikiId(pub String);

impl WikiId {
    /// Create a new WikiId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for WikiId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for WikiId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Network backend variants
///
/// A closed set: callers pick a variant and [`crate::network::PortFactory`]
/// builds the matching port.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Plain request/response HTTP client
    #[default]
    Direct,
    /// Full browser surface able to pass interactive challenges
    Scripted,
    /// Remote relay that performs the request on our behalf
    Gatekeeper,
}

impl BackendKind {
    /// Negotiation order: fastest first, most capable last
    pub const PRIORITY: [BackendKind; 3] = [
        BackendKind::Direct,
        BackendKind::Scripted,
        BackendKind::Gatekeeper,
    ];

    /// Short name used in logs and negotiation reports
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Direct => "direct",
            BackendKind::Scripted => "scripted",
            BackendKind::Gatekeeper => "gatekeeper",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A wiki the client knows how to talk to
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WikiTarget {
    /// Stable identity
    pub id: WikiId,
    /// Absolute base URL of the origin, e.g. `https://example.org/`
    pub base_url: Url,
    /// Directory holding `api.php`, relative to the base URL (e.g. `w/`)
    #[serde(default)]
    pub script_path: String,
    /// Article path prefix relative to the base URL (e.g. `wiki/`)
    #[serde(default)]
    pub article_path: String,
    /// Backend chosen by negotiation or by the user
    #[serde(default)]
    pub preferred_backend: BackendKind,
}

impl WikiTarget {
    /// Create a target with empty paths and the default backend
    pub fn new(id: impl Into<WikiId>, base_url: Url) -> Self {
        Self {
            id: id.into(),
            base_url,
            script_path: String::new(),
            article_path: String::new(),
            preferred_backend: BackendKind::default(),
        }
    }

    /// Absolute URL of the action API endpoint
    pub fn api_url(&self) -> Url {
        let joined = format!("{}api.php", self.script_path);
        self.base_url
            .join(&joined)
            .unwrap_or_else(|_| self.base_url.clone())
    }

    /// Absolute URL for viewing an article in a browser
    pub fn article_url(&self, title: &str) -> Url {
        let segment = urlencoding::encode(&title.replace(' ', "_")).into_owned();
        let joined = format!("{}{}", self.article_path, segment);
        self.base_url
            .join(&joined)
            .unwrap_or_else(|_| self.base_url.clone())
    }
}

impl From<String> for WikiId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Persisted metadata of one cached article (the `.json` half of an entry)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleMetadata {
    /// Normalised article title
    pub title: String,
    /// Remote revision timestamp the body corresponds to (UTC)
    pub last_updated: DateTime<Utc>,
}

/// Where an article body came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArticleSource {
    /// Cache entry at least as fresh as the remote, or network unreachable
    Cache,
    /// Freshly fetched and written through
    Network,
    /// Refresh failed; the last known entry was served instead
    StaleCache,
}

/// An article as returned to callers
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Article {
    /// Resolved, normalised title
    pub title: String,
    /// Rendered HTML body
    pub html: String,
    /// Remote revision timestamp, when known
    pub last_updated: Option<DateTime<Utc>>,
    /// Origin of the body
    pub source: ArticleSource,
}

/// One item of the durable media download queue
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadQueueItem {
    /// Remote media URL
    pub url: String,
    /// Wiki that owns the media
    pub wiki_id: WikiId,
}

impl DownloadQueueItem {
    /// Create a new queue item
    pub fn new(url: impl Into<String>, wiki_id: impl Into<WikiId>) -> Self {
        Self {
            url: url.into(),
            wiki_id: wiki_id.into(),
        }
    }
}

/// Outcome of backend negotiation for a base URL
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionProbeResult {
    /// Whether a usable backend was found
    pub success: bool,
    /// The backend that passed path detection and the API probe
    pub backend: BackendKind,
    /// Detected script directory (e.g. `w/`)
    pub script_path: String,
    /// Detected article path (e.g. `wiki/`)
    pub article_path: String,
}

/// Result of testing an already configured wiki
#[derive(Clone, Debug)]
pub struct ConnectionTestResult {
    /// Whether the API answered
    pub success: bool,
    /// Backend used for the test
    pub backend: BackendKind,
    /// Time spent on the probe
    pub latency: Option<Duration>,
    /// Error message when the probe failed
    pub error: Option<String>,
}

impl ConnectionTestResult {
    pub(crate) fn failed(backend: BackendKind, error: String) -> Self {
        Self {
            success: false,
            backend,
            latency: None,
            error: Some(error),
        }
    }
}

/// Summary of one queue drain
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Items downloaded (or already cached)
    pub processed: usize,
    /// Items that failed and were skipped
    pub failed: usize,
}

/// Disk usage of the two caches, in bytes
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CacheSizes {
    /// Article entries
    pub articles: u64,
    /// Media files
    pub media: u64,
}

/// Events broadcast by [`crate::WikiClient`]
#[derive(Clone, Debug)]
pub enum Event {
    /// Negotiation picked a backend for a wiki
    BackendSelected {
        /// The wiki that was negotiated
        wiki_id: WikiId,
        /// The winning backend
        backend: BackendKind,
    },
    /// A request hit a bot-challenge and needs a human
    VerificationRequired {
        /// The URL to open in an interactive flow
        url: String,
    },
    /// An article was returned to a caller
    ArticleServed {
        /// Article title
        title: String,
        /// Where the body came from
        source: ArticleSource,
    },
    /// A media file was downloaded and recorded
    MediaCached {
        /// Remote URL
        url: String,
        /// Local relative path
        path: String,
    },
    /// A queue drain finished
    QueueDrained {
        /// Items processed successfully
        processed: usize,
        /// Items that failed
        failed: usize,
    },
}
