//! The service object hosts construct once and share.
//!
//! `WikiClient` wires the registry, port pool, negotiator, article pipeline,
//! media cache and download queue together. Its methods are split by domain:
//! - [`wikis`] - registering wikis, negotiation and connection tests
//! - [`content`] - articles and media
//! - [`lifecycle`] - background draining and shutdown

mod content;
mod lifecycle;
mod wikis;


use std::sync::Arc;

use tokio::sync::{Semaphore, broadcast};
use tokio_util::sync::CancellationToken;

use crate::articles::{ArticleCache, ArticlePipeline};
use crate::config::Config;
use crate::connectivity::{Connectivity, HttpConnectivity};
use crate::error::Result;
use crate::media::{MediaCache, MediaCacheDeps};
use crate::negotiator::ConnectionNegotiator;
use crate::network::{PortBuilder, PortFactory, PortPool, SurfaceFactory};
use crate::queue::{DownloadQueue, DrainWorker};
use crate::registry::WikiRegistry;
use crate::storage::{FsStorage, StorageProvider};
use crate::types::Event;

/// Buffered events per subscriber before the slowest one starts lagging
const EVENT_CAPACITY: usize = 256;

/// Entry point of the crate (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct WikiClient {
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: broadcast::Sender<Event>,
    pub(crate) config: Arc<Config>,
    pub(crate) registry: Arc<WikiRegistry>,
    pub(crate) pool: Arc<PortPool>,
    pub(crate) negotiator: Arc<ConnectionNegotiator>,
    pub(crate) articles: Arc<ArticlePipeline>,
    pub(crate) media: MediaCache,
    pub(crate) queue: DownloadQueue,
    /// Stops the background drain loop on shutdown
    pub(crate) shutdown_token: CancellationToken,
}

impl WikiClient {
    /// Client backed by the filesystem under `config.cache.root_dir`
    ///
    /// Reachability is probed through `network.connectivity_probe_url` when
    /// set. No browser engine is attached, so the scripted backend is skipped
    /// during negotiation.
    pub async fn open(config: Config) -> Result<Self> {
        let storage = Arc::new(FsStorage::new(config.cache.root_dir.clone()));
        let connectivity: Arc<dyn Connectivity> =
            Arc::from(HttpConnectivity::from_config(&config.network)?);
        Self::new(config, storage, connectivity, None).await
    }

    /// Create a client over the given storage and reachability source
    ///
    /// `surfaces` enables the scripted backend. Persisted state (registry,
    /// media map, download queue) is restored before this returns.
    pub async fn new(
        config: Config,
        storage: Arc<dyn StorageProvider>,
        connectivity: Arc<dyn Connectivity>,
        surfaces: Option<Arc<dyn SurfaceFactory>>,
    ) -> Result<Self> {
        let mut factory = PortFactory::new(config.network.clone());
        if let Some(surfaces) = surfaces {
            factory = factory.with_surfaces(surfaces);
        }
        Self::with_builder(config, storage, connectivity, Arc::new(factory)).await
    }

    /// Like [`new`](Self::new) but building ports with a custom [`PortBuilder`]
    pub async fn with_builder(
        config: Config,
        storage: Arc<dyn StorageProvider>,
        connectivity: Arc<dyn Connectivity>,
        builder: Arc<dyn PortBuilder>,
    ) -> Result<Self> {
        config.validate()?;

        let (event_tx, _rx) = broadcast::channel(EVENT_CAPACITY);
        let pool = Arc::new(PortPool::new(Arc::clone(&builder)));
        let negotiator = Arc::new(ConnectionNegotiator::new(builder));
        let registry = Arc::new(
            WikiRegistry::load(Arc::clone(&storage), config.cache.registry_key.clone()).await,
        );

        // One budget for foreground resolves and queue drains alike
        let downloads = Arc::new(Semaphore::new(config.network.max_concurrent_downloads));
        let media = MediaCache::load(
            &config.cache,
            &config.retry,
            MediaCacheDeps {
                storage: Arc::clone(&storage),
                pool: Arc::clone(&pool),
                semaphore: downloads,
                events: event_tx.clone(),
            },
        )
        .await;

        let articles = Arc::new(ArticlePipeline::new(
            ArticleCache::new(Arc::clone(&storage), config.cache.articles_dir.clone()),
            config.cache.article_cache_enabled,
            Arc::clone(&pool),
            connectivity,
            event_tx.clone(),
        ));
        let queue = DownloadQueue::load(storage, config.cache.queue_key.clone()).await;

        tracing::info!(
            wikis = registry.list().await.len(),
            media_entries = media.len(),
            queued = queue.pending().await.len(),
            "wiki client ready"
        );

        Ok(Self {
            event_tx,
            config: Arc::new(config),
            registry,
            pool,
            negotiator,
            articles,
            media,
            queue,
            shutdown_token: CancellationToken::new(),
        })
    }

    /// Subscribe to client events
    ///
    /// Each subscriber receives every event sent after it subscribed. A
    /// subscriber that falls more than the channel capacity behind gets
    /// `RecvError::Lagged` and skips ahead.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// The configuration the client was built with
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn emit(&self, event: Event) {
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }

    pub(crate) fn drain_worker(&self) -> DrainWorker {
        DrainWorker {
            registry: Arc::clone(&self.registry),
            pool: Arc::clone(&self.pool),
            media: self.media.clone(),
            events: self.event_tx.clone(),
        }
    }
}
