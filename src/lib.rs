//! # wiki-fetch
//!
//! Fetch, cache and fall back: a library for reading MediaWiki sites from
//! places where plain HTTP is not always enough.
//!
//! ## Design Philosophy
//!
//! wiki-fetch is designed to be:
//! - **Offline-first** - Articles and media are served from the cache whenever it is fresh enough or the network is gone
//! - **Backend-agnostic** - Direct HTTP, a scripted browser surface and a remote relay share one contract
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Event-driven** - Consumers subscribe to events, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use wiki_fetch::{Config, WikiClient, WikiId};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = WikiClient::open(Config::default()).await?;
//!
//!     // Subscribe to events
//!     let mut events = client.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let wiki = client.connect_wiki("example", "https://example.org/").await?;
//!     let article = client.fetch_article(&wiki.id, "Main Page", false).await?;
//!     println!("{} ({:?})", article.title, article.source);
//!
//!     client.shutdown().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Article cache and fetch pipeline
pub mod articles;
/// The client service object
pub mod client;
/// Configuration types
pub mod config;
/// Network reachability
pub mod connectivity;
/// Error types
pub mod error;
/// Deduplicating media cache
pub mod media;
/// Backend negotiation and path detection
pub mod negotiator;
/// Network access backends
pub mod network;
/// Durable media download queue
pub mod queue;
/// Persisted list of configured wikis
pub mod registry;
/// Retry logic with exponential backoff
pub mod retry;
/// Storage providers
pub mod storage;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;
/// MediaWiki action API requests
pub mod wiki_api;

// Re-export commonly used types
pub use client::WikiClient;
pub use config::{CacheConfig, Config, NetworkConfig, RetryConfig};
pub use connectivity::{Connectivity, HttpConnectivity, StaticConnectivity};
pub use error::{Error, Result, StorageError};
pub use network::{BrowserSurface, NetworkAccessPort, PortBuilder, SurfaceFactory};
pub use storage::{FsStorage, MemoryStorage, StorageProvider};
pub use types::{
    Article, ArticleMetadata, ArticleSource, BackendKind, CacheSizes, ConnectionProbeResult,
    ConnectionTestResult, DownloadQueueItem, DrainReport, Event, WikiId, WikiTarget,
};
