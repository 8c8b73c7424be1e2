//! Error types for wiki-fetch
//!
//! This module provides the failure taxonomy shared by every component:
//! - Network outcomes (verification required, transient, malformed payload, HTTP status)
//! - Storage failures, which callers degrade to "no cache available"
//! - Pipeline outcomes (no connection and no cache, negotiation failure)
//!
//! [`Error`] is `Clone` so that one in-flight download result can be handed to
//! every caller waiting on it.

use crate::types::WikiId;
use thiserror::Error;

/// Result type alias for wiki-fetch operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for wiki-fetch
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// A bot-challenge intercepted the request
    ///
    /// Must be solved by an interactive flow outside this crate before the
    /// request is repeated. Never retried automatically.
    #[error("interactive verification required for {url}")]
    VerificationRequired {
        /// The URL whose challenge has to be solved
        url: String,
    },

    /// Connectivity problem or timeout; may justify a cache or backend fallback
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    /// Payload failed the JSON/HTML extraction contract
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// Non-2xx HTTP status from the origin or the gatekeeper relay
    #[error("HTTP {status}: {body}")]
    Http {
        /// The HTTP status code
        status: u16,
        /// Response body, kept as diagnostic text
        body: String,
    },

    /// Storage read/write failure
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// The network is unreachable and no cache entry exists
    #[error("no connection and no cached copy of {title}")]
    NoConnection {
        /// The requested article title
        title: String,
    },

    /// Every backend candidate failed during negotiation
    #[error("no usable backend for {base_url}: {}", attempts.join("; "))]
    NegotiationFailed {
        /// The base URL that was negotiated
        base_url: String,
        /// One `backend: reason` line per candidate tried
        attempts: Vec<String>,
    },

    /// A port was used before `initialize` completed
    #[error("network port used before initialization")]
    NotInitialized,

    /// A port was used after `dispose`
    #[error("network port already disposed")]
    Disposed,

    /// No wiki registered under this id
    #[error("unknown wiki: {0}")]
    UnknownWiki(WikiId),

    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error
        key: Option<String>,
    },

    /// Serialization of persisted state failed
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Storage-related errors
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// Backing store could not be reached (treated as transient)
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// Key does not exist
    #[error("key not found: {0}")]
    NotFound(String),

    /// Any other I/O failure
    #[error("I/O failure on {key}: {reason}")]
    Io {
        /// The storage key being accessed
        key: String,
        /// Underlying failure
        reason: String,
    },
}

impl Error {
    /// Returns true when the error demands an interactive challenge flow
    pub fn is_verification_required(&self) -> bool {
        matches!(self, Error::VerificationRequired { .. })
    }

    /// Returns true for failures that say "we could not reach the network"
    ///
    /// Used by the article pipeline to decide between trusting a cached entry
    /// and refetching.
    pub fn is_offline(&self) -> bool {
        matches!(self, Error::TransientNetwork(_))
    }

    pub(crate) fn config(message: impl Into<String>, key: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            return Error::MalformedResponse(e.to_string());
        }
        if let Some(status) = e.status() {
            return Error::Http {
                status: status.as_u16(),
                body: e.to_string(),
            };
        }
        Error::TransientNetwork(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        let storage = match e.kind() {
            std::io::ErrorKind::NotFound => StorageError::NotFound(e.to_string()),
            std::io::ErrorKind::TimedOut
            | std::io::ErrorKind::Interrupted
            | std::io::ErrorKind::WouldBlock => StorageError::Unavailable(e.to_string()),
            _ => StorageError::Io {
                key: String::new(),
                reason: e.to_string(),
            },
        };
        Error::Storage(storage)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        if e.is_io() {
            Error::Serialization(e.to_string())
        } else {
            Error::MalformedResponse(e.to_string())
        }
    }
}
