//! Deduplicating media cache
//!
//! Media files are stored content-addressed (`sha256(url).ext`) under the
//! media folder, and a URL → path map remembers what has been downloaded.
//! The map is kept in memory and persisted through a [`DebouncedFlush`], and
//! concurrent requests for one URL share a single download through
//! [`SingleFlight`]. Downloads from every caller share one semaphore.

mod debounce;
mod singleflight;

pub use debounce::DebouncedFlush;
pub use singleflight::SingleFlight;

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use futures::FutureExt;
use tokio::sync::{Semaphore, broadcast};
use url::Url;

use crate::config::{CacheConfig, RetryConfig};
use crate::error::{Error, Result};
use crate::network::{NetworkAccessPort, PortPool};
use crate::retry::with_retry;
use crate::storage::{StorageProvider, read_json, write_json};
use crate::types::{Event, WikiTarget};
use crate::utils::{content_address, join_key, media_key};

/// In-memory media map
///
/// Only `entries` is persisted, as a flat JSON object of lookup key → path.
/// An alias whose target is already downloaded is written into `entries`
/// straight away; one still waiting for its target lives in memory only.
#[derive(Debug, Default)]
struct MediaMap {
    /// Lookup key → relative storage path
    entries: HashMap<String, String>,
    /// Superseded URL key (e.g. a thumbnail) → key of its full-size download
    aliases: HashMap<String, String>,
}

struct Inner {
    storage: Arc<dyn StorageProvider>,
    media_dir: String,
    map: Arc<RwLock<MediaMap>>,
    flights: SingleFlight<String, String>,
    semaphore: Arc<Semaphore>,
    pool: Arc<PortPool>,
    retry: RetryConfig,
    flusher: DebouncedFlush,
    events: broadcast::Sender<Event>,
}

/// URL → local file cache with single-flight downloads
#[derive(Clone)]
pub struct MediaCache {
    inner: Arc<Inner>,
}

/// Construction parameters for [`MediaCache::load`]
pub struct MediaCacheDeps {
    /// Where files and the map live
    pub storage: Arc<dyn StorageProvider>,
    /// Ports used for downloads
    pub pool: Arc<PortPool>,
    /// Download slots shared with the download queue
    pub semaphore: Arc<Semaphore>,
    /// Event channel for [`Event::MediaCached`]
    pub events: broadcast::Sender<Event>,
}

impl MediaCache {
    /// Restore the persisted map and build the cache
    ///
    /// A missing map starts empty; an unreadable one is logged and discarded.
    pub async fn load(cache: &CacheConfig, retry: &RetryConfig, deps: MediaCacheDeps) -> Self {
        let map_key = cache.media_map_key.clone();
        let persisted = read_json::<HashMap<String, String>>(deps.storage.as_ref(), &map_key).await;
        let entries = match persisted {
            Ok(entries) => entries.unwrap_or_default(),
            Err(e) => {
                tracing::warn!(key = %map_key, error = %e, "discarding unreadable media map");
                HashMap::new()
            }
        };
        tracing::debug!(entries = entries.len(), "media map loaded");
        let map = MediaMap {
            entries,
            aliases: HashMap::new(),
        };

        let map = Arc::new(RwLock::new(map));
        let flusher = {
            let map = Arc::clone(&map);
            let storage = Arc::clone(&deps.storage);
            DebouncedFlush::new(cache.flush_debounce, move || {
                let map = Arc::clone(&map);
                let storage = Arc::clone(&storage);
                let map_key = map_key.clone();
                async move {
                    let snapshot = map
                        .read()
                        .unwrap_or_else(PoisonError::into_inner)
                        .entries
                        .clone();
                    write_json(storage.as_ref(), &map_key, &snapshot).await?;
                    tracing::debug!(entries = snapshot.len(), "media map persisted");
                    Ok(())
                }
                .boxed()
            })
        };

        Self {
            inner: Arc::new(Inner {
                storage: deps.storage,
                media_dir: cache.media_dir.clone(),
                map,
                flights: SingleFlight::new(),
                semaphore: deps.semaphore,
                pool: deps.pool,
                retry: retry.clone(),
                flusher,
                events: deps.events,
            }),
        }
    }

    /// Local path of `url`, downloading it through the wiki's shared port if needed
    pub async fn resolve(&self, wiki: &WikiTarget, url: &str) -> Result<String> {
        self.resolve_inner(wiki, url, None).await
    }

    /// Like [`resolve`](Self::resolve) but downloading through `port`
    pub async fn resolve_with_port(
        &self,
        port: Arc<dyn NetworkAccessPort>,
        wiki: &WikiTarget,
        url: &str,
    ) -> Result<String> {
        self.resolve_inner(wiki, url, Some(port)).await
    }

    async fn resolve_inner(
        &self,
        wiki: &WikiTarget,
        url: &str,
        port: Option<Arc<dyn NetworkAccessPort>>,
    ) -> Result<String> {
        let absolute = absolute_url(wiki, url)?;
        let key = media_key(absolute.as_str());

        if let Some(path) = self.lookup(absolute.as_str()).await {
            return Ok(path);
        }

        let inner = Arc::clone(&self.inner);
        let wiki = wiki.clone();
        let flight_key = key.clone();
        self.inner
            .flights
            .run(flight_key, move || async move {
                inner.download(&wiki, absolute, key, port).await
            })
            .await
    }

    /// Local path of `url` if it is cached and the file still exists
    ///
    /// A mapping whose file has disappeared is evicted. A hit through an alias
    /// back-fills a direct mapping for the alias key.
    pub async fn lookup(&self, url: &str) -> Option<String> {
        let key = media_key(url);
        if let Some(path) = self.inner.existing_path(&key).await {
            return Some(path);
        }

        let target = self.inner.read_map(|map| map.aliases.get(&key).cloned())?;
        let path = self.inner.existing_path(&target).await?;
        self.inner.write_map(|map| {
            map.entries.insert(key.clone(), path.clone());
        });
        self.inner.flusher.mark_dirty();
        tracing::debug!(url = %url, path = %path, "media hit through alias");
        Some(path)
    }

    /// Remember that `thumbnail_url` has been superseded by `full_url`
    pub fn register_alias(&self, thumbnail_url: &str, full_url: &str) {
        let alias = media_key(thumbnail_url);
        let target = media_key(full_url);
        if alias == target {
            return;
        }
        self.inner.write_map(|map| {
            if let Some(path) = map.entries.get(&target).cloned() {
                map.entries.insert(alias.clone(), path);
            }
            map.aliases.insert(alias, target);
        });
        self.inner.flusher.mark_dirty();
    }

    /// Delete every media file and forget every mapping
    pub async fn clear(&self) -> Result<()> {
        self.inner.storage.recreate_folder(&self.inner.media_dir).await?;
        self.inner.write_map(|map| {
            map.entries.clear();
            map.aliases.clear();
        });
        self.inner.flusher.mark_dirty();
        self.inner.flusher.flush_now().await
    }

    /// Bytes used by media files
    pub async fn size_bytes(&self) -> Result<u64> {
        self.inner.storage.folder_size(&self.inner.media_dir).await
    }

    /// Write pending map changes now
    pub async fn flush(&self) -> Result<()> {
        self.inner.flusher.flush_now().await
    }

    /// Number of mapped URLs
    pub fn len(&self) -> usize {
        self.inner.read_map(|map| map.entries.len())
    }

    /// Whether nothing is mapped
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Resolve protocol-relative and relative media URLs against the wiki
fn absolute_url(wiki: &WikiTarget, url: &str) -> Result<Url> {
    let trimmed = url.trim();
    Url::parse(trimmed)
        .or_else(|_| wiki.base_url.join(trimmed))
        .map_err(|e| Error::MalformedResponse(format!("invalid media URL {trimmed}: {e}")))
}

impl Inner {
    fn read_map<R>(&self, f: impl FnOnce(&MediaMap) -> R) -> R {
        f(&self.map.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn write_map<R>(&self, f: impl FnOnce(&mut MediaMap) -> R) -> R {
        f(&mut self.map.write().unwrap_or_else(PoisonError::into_inner))
    }

    /// Mapped path for `key` if its file exists; evicts dangling mappings
    async fn existing_path(&self, key: &str) -> Option<String> {
        let path = self.read_map(|map| map.entries.get(key).cloned())?;
        match self.storage.exists(&path).await {
            Ok(true) => Some(path),
            Ok(false) => {
                tracing::debug!(key = %key, path = %path, "cached media file missing, evicting");
                self.write_map(|map| {
                    if map.entries.get(key) == Some(&path) {
                        map.entries.remove(key);
                    }
                });
                self.flusher.mark_dirty();
                None
            }
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "could not check cached media file");
                None
            }
        }
    }

    async fn download(
        &self,
        wiki: &WikiTarget,
        url: Url,
        key: String,
        port: Option<Arc<dyn NetworkAccessPort>>,
    ) -> Result<String> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| Error::Disposed)?;

        let port = match port {
            Some(port) => port,
            None => self.pool.port_for(wiki).await?,
        };

        tracing::debug!(wiki_id = %wiki.id, url = %url, "downloading media");
        let bytes = with_retry(&self.retry, || port.fetch_raw_bytes(&url)).await?;

        let path = join_key(&[&self.media_dir, &content_address(&url)]);
        self.storage.write_bytes(&path, &bytes).await?;
        self.write_map(|map| {
            map.entries.insert(key, path.clone());
        });
        self.flusher.mark_dirty();

        tracing::info!(url = %url, path = %path, bytes = bytes.len(), "media cached");
        let _ = self.events.send(Event::MediaCached {
            url: url.to_string(),
            path: path.clone(),
        });
        Ok(path)
    }
}
