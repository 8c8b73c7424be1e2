//! Articles and media.

use super::WikiClient;
use crate::error::{Error, Result};
use crate::types::{Article, CacheSizes, DownloadQueueItem, DrainReport, Event, WikiId};

impl WikiClient {
    /// Fetch an article, preferring a fresh-enough cached copy
    ///
    /// `random` and `Special:Random` pick a random article. A
    /// [`Error::VerificationRequired`] failure is also broadcast as
    /// [`Event::VerificationRequired`] so a host UI can start the challenge flow.
    pub async fn fetch_article(
        &self,
        wiki: &WikiId,
        title: &str,
        force_refresh: bool,
    ) -> Result<Article> {
        let target = self.registry.require(wiki).await?;
        match self.articles.fetch_article(&target, title, force_refresh).await {
            Ok(article) => {
                self.emit(Event::ArticleServed {
                    title: article.title.clone(),
                    source: article.source,
                });
                Ok(article)
            }
            Err(e) => {
                if let Error::VerificationRequired { url } = &e {
                    self.emit(Event::VerificationRequired { url: url.clone() });
                }
                Err(e)
            }
        }
    }

    /// Save locally edited HTML as the cached copy of `title`
    pub async fn store_edited(&self, wiki: &WikiId, title: &str, html: &str) -> Result<()> {
        self.articles.store_edited(wiki, title, html).await
    }

    /// Drop the cached copy of `title`
    pub async fn invalidate_article(&self, wiki: &WikiId, title: &str) -> Result<()> {
        self.articles.invalidate(wiki, title).await
    }

    /// Local path of a media file, downloading it if needed
    ///
    /// Relative and protocol-relative URLs are resolved against the wiki.
    pub async fn resolve_media(&self, wiki: &WikiId, url: &str) -> Result<String> {
        let target = self.registry.require(wiki).await?;
        self.media.resolve(&target, url).await
    }

    /// Local path of a media file if it is already cached
    pub async fn cached_media(&self, url: &str) -> Option<String> {
        self.media.lookup(url).await
    }

    /// Let `thumbnail_url` resolve to the download of `full_url`
    pub fn register_media_alias(&self, thumbnail_url: &str, full_url: &str) {
        self.media.register_alias(thumbnail_url, full_url);
    }

    /// Queue a media file for background download
    ///
    /// Returns false when the same item is already queued.
    pub async fn enqueue_media(&self, wiki: &WikiId, url: &str) -> Result<bool> {
        self.registry.require(wiki).await?;
        self.queue
            .enqueue(DownloadQueueItem::new(url, wiki.clone()))
            .await
    }

    /// Items waiting in the download queue
    pub async fn pending_media(&self) -> Vec<DownloadQueueItem> {
        self.queue.pending().await
    }

    /// Download everything queued now
    ///
    /// Returns an empty report when a drain is already running.
    pub async fn drain_queue(&self) -> DrainReport {
        self.queue.drain(&self.drain_worker()).await
    }

    /// Disk usage of the article and media caches
    pub async fn cache_sizes(&self) -> Result<CacheSizes> {
        Ok(CacheSizes {
            articles: self.articles.cache().size_bytes().await?,
            media: self.media.size_bytes().await?,
        })
    }

    /// Delete every cached article
    pub async fn clear_article_cache(&self) -> Result<()> {
        tracing::info!("clearing article cache");
        self.articles.cache().clear().await
    }

    /// Delete every cached media file and forget every mapping
    pub async fn clear_media_cache(&self) -> Result<()> {
        tracing::info!("clearing media cache");
        self.media.clear().await
    }
}
