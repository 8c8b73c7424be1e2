//! Durable media download queue
//!
//! Enqueued items are persisted immediately so they survive a restart. A drain
//! swaps the whole queue out (take all, clear, persist) before working on it,
//! so items enqueued while it runs are picked up by its next iteration.
//! Delivery is at-least-once; downloads are idempotent through the media cache.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, Notify, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::media::MediaCache;
use crate::network::PortPool;
use crate::registry::WikiRegistry;
use crate::storage::{StorageProvider, read_json, write_json};
use crate::types::{DownloadQueueItem, DrainReport, Event, WikiId};

/// Everything a drain needs to turn queue items into cached files
#[derive(Clone)]
pub struct DrainWorker {
    /// Resolves an item's wiki id to its target
    pub registry: Arc<WikiRegistry>,
    /// Source of dedicated ports, one per wiki group
    pub pool: Arc<PortPool>,
    /// Performs and records the downloads
    pub media: MediaCache,
    /// Receives [`Event::QueueDrained`]
    pub events: broadcast::Sender<Event>,
}

struct Inner {
    storage: Arc<dyn StorageProvider>,
    key: String,
    items: Mutex<Vec<DownloadQueueItem>>,
    draining: AtomicBool,
    wake: Notify,
}

/// Resets the draining flag however the drain ends
struct DrainingGuard<'a>(&'a AtomicBool);

impl Drop for DrainingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Persisted list of media waiting to be downloaded
#[derive(Clone)]
pub struct DownloadQueue {
    inner: Arc<Inner>,
}

impl DownloadQueue {
    /// Restore the queue stored under `key`
    ///
    /// An unreadable queue is logged and replaced by an empty one.
    pub async fn load(storage: Arc<dyn StorageProvider>, key: impl Into<String>) -> Self {
        let key = key.into();
        let items = match read_json::<Vec<DownloadQueueItem>>(storage.as_ref(), &key).await {
            Ok(Some(items)) => items,
            Ok(None) => Vec::new(),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "discarding unreadable download queue");
                Vec::new()
            }
        };
        if !items.is_empty() {
            tracing::info!(pending = items.len(), "restored download queue");
        }

        Self {
            inner: Arc::new(Inner {
                storage,
                key,
                items: Mutex::new(items),
                draining: AtomicBool::new(false),
                wake: Notify::new(),
            }),
        }
    }

    /// Append an item unless an identical one is already queued
    ///
    /// Returns whether the item was added.
    pub async fn enqueue(&self, item: DownloadQueueItem) -> Result<bool> {
        {
            let mut items = self.inner.items.lock().await;
            if items.contains(&item) {
                return Ok(false);
            }
            // Persist first so a failed write leaves nothing queued in memory
            let mut updated = items.clone();
            updated.push(item);
            write_json(self.inner.storage.as_ref(), &self.inner.key, &updated).await?;
            if let Some(item) = updated.last() {
                tracing::debug!(url = %item.url, wiki_id = %item.wiki_id, "media queued");
            }
            *items = updated;
        }
        self.inner.wake.notify_one();
        Ok(true)
    }

    /// Snapshot of the queued items
    pub async fn pending(&self) -> Vec<DownloadQueueItem> {
        self.inner.items.lock().await.clone()
    }

    /// Whether a drain is running
    pub fn is_draining(&self) -> bool {
        self.inner.draining.load(Ordering::SeqCst)
    }

    /// Download everything queued, including items added while draining
    ///
    /// Only one drain runs at a time; a concurrent call returns an empty
    /// report immediately. Failed items are logged and dropped.
    pub async fn drain(&self, worker: &DrainWorker) -> DrainReport {
        if self
            .inner
            .draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("drain already running");
            return DrainReport::default();
        }
        let _guard = DrainingGuard(&self.inner.draining);

        let mut report = DrainReport::default();
        loop {
            let batch = self.take_all().await;
            if batch.is_empty() {
                break;
            }

            let mut groups: BTreeMap<WikiId, Vec<String>> = BTreeMap::new();
            for item in batch {
                groups.entry(item.wiki_id).or_default().push(item.url);
            }
            for (wiki_id, urls) in groups {
                let (processed, failed) = drain_group(worker, &wiki_id, &urls).await;
                report.processed += processed;
                report.failed += failed;
            }
        }

        if report.processed + report.failed > 0 {
            tracing::info!(
                processed = report.processed,
                failed = report.failed,
                "download queue drained"
            );
            let _ = worker.events.send(Event::QueueDrained {
                processed: report.processed,
                failed: report.failed,
            });
        }
        report
    }

    /// Run drains in the background whenever items are enqueued
    ///
    /// Drains once right away for items restored from storage. Cancellation
    /// is honoured between drains, never in the middle of one.
    pub fn spawn_drain_loop(&self, worker: DrainWorker, cancel: CancellationToken) -> JoinHandle<()> {
        let queue = self.clone();
        tokio::spawn(async move {
            loop {
                queue.drain(&worker).await;
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = queue.inner.wake.notified() => {}
                }
            }
            tracing::debug!("drain loop stopped");
        })
    }

    async fn take_all(&self) -> Vec<DownloadQueueItem> {
        let mut items = self.inner.items.lock().await;
        if items.is_empty() {
            return Vec::new();
        }
        let batch = std::mem::take(&mut *items);
        let empty: &[DownloadQueueItem] = &[];
        if let Err(e) = write_json(self.inner.storage.as_ref(), &self.inner.key, empty).await {
            // Items stay on disk and are downloaded again after a restart
            tracing::warn!(error = %e, "could not persist emptied download queue");
        }
        batch
    }
}

/// Download one wiki's share of a batch through a dedicated port
async fn drain_group(worker: &DrainWorker, wiki_id: &WikiId, urls: &[String]) -> (usize, usize) {
    let Some(target) = worker.registry.get(wiki_id).await else {
        tracing::warn!(wiki_id = %wiki_id, items = urls.len(), "dropping queued media of unknown wiki");
        return (0, urls.len());
    };

    let port = match worker.pool.dedicated(&target).await {
        Ok(port) => port,
        Err(e) => {
            tracing::warn!(wiki_id = %wiki_id, error = %e, "no port for queued downloads");
            return (0, urls.len());
        }
    };

    let results = futures::future::join_all(
        urls.iter()
            .map(|url| worker.media.resolve_with_port(Arc::clone(&port), &target, url)),
    )
    .await;
    port.dispose().await;

    let mut processed = 0;
    let mut failed = 0;
    for (url, result) in urls.iter().zip(results) {
        match result {
            Ok(_) => processed += 1,
            Err(e) => {
                failed += 1;
                tracing::warn!(wiki_id = %wiki_id, url = %url, error = %e, "queued download failed");
            }
        }
    }
    (processed, failed)
}
