//! Article cache and fetch pipeline
//!
//! [`ArticleCache`] is the on-disk layout: one `<hash>.json` metadata file and
//! one `<hash>.html` body per (wiki, title). [`ArticlePipeline`] decides, per
//! request, whether the cached body is good enough or the network must be
//! asked, and falls back to a stale entry rather than failing outright.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::connectivity::Connectivity;
use crate::error::{Error, Result};
use crate::network::PortPool;
use crate::storage::{StorageProvider, read_json, write_json};
use crate::types::{Article, ArticleMetadata, ArticleSource, Event, WikiId, WikiTarget};
use crate::utils::{is_random_title, join_key, normalize_title, sha256_hex};
use crate::wiki_api;

/// A complete cache entry
#[derive(Clone, Debug)]
pub struct CachedArticle {
    /// The `.json` half
    pub metadata: ArticleMetadata,
    /// The `.html` half
    pub html: String,
}

impl CachedArticle {
    fn into_article(self, source: ArticleSource) -> Article {
        Article {
            title: self.metadata.title,
            html: self.html,
            last_updated: Some(self.metadata.last_updated),
            source,
        }
    }
}

/// Storage layout for cached articles
pub struct ArticleCache {
    storage: Arc<dyn StorageProvider>,
    dir: String,
}

impl ArticleCache {
    /// Cache rooted at the `dir` folder of `storage`
    pub fn new(storage: Arc<dyn StorageProvider>, dir: impl Into<String>) -> Self {
        Self {
            storage,
            dir: dir.into(),
        }
    }

    fn entry_key(&self, wiki: &WikiId, title: &str) -> String {
        let hash = sha256_hex(&format!("{}:{}", wiki, normalize_title(title)));
        join_key(&[&self.dir, &hash])
    }

    /// Read a complete entry; storage failures count as a miss
    pub async fn get(&self, wiki: &WikiId, title: &str) -> Option<CachedArticle> {
        let key = self.entry_key(wiki, title);
        let metadata = match read_json::<ArticleMetadata>(self.storage.as_ref(), &format!("{key}.json")).await {
            Ok(Some(metadata)) => metadata,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(wiki_id = %wiki, title = %title, error = %e, "unreadable article metadata");
                return None;
            }
        };
        match self.storage.read_text(&format!("{key}.html")).await {
            Ok(Some(html)) => Some(CachedArticle { metadata, html }),
            Ok(None) => {
                tracing::debug!(wiki_id = %wiki, title = %title, "article metadata without body");
                None
            }
            Err(e) => {
                tracing::warn!(wiki_id = %wiki, title = %title, error = %e, "unreadable article body");
                None
            }
        }
    }

    /// Write an entry, body first so a metadata file always has its body
    pub async fn put(
        &self,
        wiki: &WikiId,
        title: &str,
        metadata: &ArticleMetadata,
        html: &str,
    ) -> Result<()> {
        let key = self.entry_key(wiki, title);
        self.storage.write_text(&format!("{key}.html"), html).await?;
        write_json(self.storage.as_ref(), &format!("{key}.json"), metadata).await
    }

    /// Drop one entry
    pub async fn invalidate(&self, wiki: &WikiId, title: &str) -> Result<()> {
        let key = self.entry_key(wiki, title);
        self.storage.delete(&format!("{key}.json")).await?;
        self.storage.delete(&format!("{key}.html")).await
    }

    /// Drop every entry
    pub async fn clear(&self) -> Result<()> {
        self.storage.recreate_folder(&self.dir).await
    }

    /// Bytes used by all entries
    pub async fn size_bytes(&self) -> Result<u64> {
        self.storage.folder_size(&self.dir).await
    }
}

/// Cache-or-network article retrieval
pub struct ArticlePipeline {
    cache: ArticleCache,
    enabled: bool,
    pool: Arc<PortPool>,
    connectivity: Arc<dyn Connectivity>,
    events: broadcast::Sender<Event>,
}

impl ArticlePipeline {
    /// Wire a pipeline; with `enabled == false` every fetch goes to the network
    pub fn new(
        cache: ArticleCache,
        enabled: bool,
        pool: Arc<PortPool>,
        connectivity: Arc<dyn Connectivity>,
        events: broadcast::Sender<Event>,
    ) -> Self {
        Self {
            cache,
            enabled,
            pool,
            connectivity,
            events,
        }
    }

    /// The underlying cache
    pub fn cache(&self) -> &ArticleCache {
        &self.cache
    }

    /// Fetch `title` from `wiki`, preferring a fresh-enough cache entry
    ///
    /// `random` / `Special:Random` is resolved to a concrete title first.
    /// A cached body is served when its revision timestamp is at least as
    /// new as the remote one, when the network is unreachable, or when a
    /// refresh fails.
    pub async fn fetch_article(
        &self,
        wiki: &WikiTarget,
        title: &str,
        force_refresh: bool,
    ) -> Result<Article> {
        let online = self.connectivity.is_online().await;

        let title = if is_random_title(title) {
            if !online {
                return Err(Error::NoConnection {
                    title: title.trim().to_string(),
                });
            }
            let port = self.pool.port_for(wiki).await?;
            let resolved = wiki_api::random_title(port.as_ref(), wiki).await?;
            tracing::debug!(wiki_id = %wiki.id, title = %resolved, "resolved random article");
            normalize_title(&resolved)
        } else {
            normalize_title(title)
        };

        let cached = if self.enabled {
            self.cache.get(&wiki.id, &title).await
        } else {
            None
        };

        let mut remote_timestamp = None;
        if let Some(entry) = &cached
            && !force_refresh
        {
            if !online {
                tracing::debug!(wiki_id = %wiki.id, title = %title, "offline, serving cache");
                return Ok(entry.clone().into_article(ArticleSource::Cache));
            }

            match self.remote_timestamp(wiki, &title).await {
                Ok(remote) if entry.metadata.last_updated >= remote => {
                    tracing::debug!(wiki_id = %wiki.id, title = %title, "cache is current");
                    return Ok(entry.clone().into_article(ArticleSource::Cache));
                }
                Ok(remote) => {
                    tracing::debug!(
                        wiki_id = %wiki.id,
                        title = %title,
                        cached = %entry.metadata.last_updated,
                        remote = %remote,
                        "cache is stale"
                    );
                    remote_timestamp = Some(remote);
                }
                Err(e) if e.is_offline() => {
                    tracing::debug!(wiki_id = %wiki.id, title = %title, error = %e, "freshness probe unreachable, serving cache");
                    return Ok(entry.clone().into_article(ArticleSource::Cache));
                }
                Err(e) if e.is_verification_required() => {
                    self.announce_verification(&e);
                    return Ok(entry.clone().into_article(ArticleSource::Cache));
                }
                Err(e) => {
                    tracing::debug!(wiki_id = %wiki.id, title = %title, error = %e, "freshness unknown, refetching");
                }
            }
        }

        if !online {
            return match cached {
                Some(entry) => Ok(entry.into_article(ArticleSource::StaleCache)),
                None => Err(Error::NoConnection { title }),
            };
        }

        match self.fetch_fresh(wiki, &title, remote_timestamp).await {
            Ok(article) => Ok(article),
            Err(e) => {
                let fallback = if self.enabled {
                    self.cache.get(&wiki.id, &title).await
                } else {
                    None
                };
                match fallback {
                    Some(entry) => {
                        if e.is_verification_required() {
                            self.announce_verification(&e);
                        }
                        tracing::warn!(wiki_id = %wiki.id, title = %title, error = %e, "refresh failed, serving stale cache");
                        Ok(entry.into_article(ArticleSource::StaleCache))
                    }
                    None => Err(e),
                }
            }
        }
    }

    async fn remote_timestamp(&self, wiki: &WikiTarget, title: &str) -> Result<DateTime<Utc>> {
        let port = self.pool.port_for(wiki).await?;
        wiki_api::last_revision(port.as_ref(), wiki, title).await
    }

    async fn fetch_fresh(
        &self,
        wiki: &WikiTarget,
        title: &str,
        known_timestamp: Option<DateTime<Utc>>,
    ) -> Result<Article> {
        let port = self.pool.port_for(wiki).await?;

        // Timestamp before body: an edit landing in between only makes the entry look stale
        let timestamp = match known_timestamp {
            Some(timestamp) => Some(timestamp),
            // Only the cache write needs it
            None if !self.enabled => None,
            None => match wiki_api::last_revision(port.as_ref(), wiki, title).await {
                Ok(timestamp) => Some(timestamp),
                Err(e) if e.is_verification_required() => return Err(e),
                Err(e) => {
                    tracing::debug!(wiki_id = %wiki.id, title = %title, error = %e, "no revision timestamp");
                    None
                }
            },
        };

        let page = wiki_api::rendered_page(port.as_ref(), wiki, title).await?;

        if self.enabled {
            match timestamp {
                Some(last_updated) => {
                    let metadata = ArticleMetadata {
                        title: page.title.clone(),
                        last_updated,
                    };
                    if let Err(e) = self.cache.put(&wiki.id, title, &metadata, &page.html).await {
                        tracing::warn!(wiki_id = %wiki.id, title = %title, error = %e, "could not write article cache");
                    }
                }
                None => {
                    tracing::debug!(wiki_id = %wiki.id, title = %title, "skipping cache write without timestamp")
                }
            }
        }

        tracing::info!(wiki_id = %wiki.id, title = %page.title, "fetched article");
        Ok(Article {
            title: page.title,
            html: page.html,
            last_updated: timestamp,
            source: ArticleSource::Network,
        })
    }

    fn announce_verification(&self, error: &Error) {
        if let Error::VerificationRequired { url } = error {
            tracing::warn!(url = %url, "verification required, serving cached copy");
            let _ = self.events.send(Event::VerificationRequired { url: url.clone() });
        }
    }

    /// Overwrite the entry with locally edited HTML
    ///
    /// The entry is stamped with the current time so it outranks the revision
    /// it was based on.
    pub async fn store_edited(&self, wiki: &WikiId, title: &str, html: &str) -> Result<()> {
        let title = normalize_title(title);
        let metadata = ArticleMetadata {
            title: title.clone(),
            last_updated: Utc::now(),
        };
        self.cache.put(wiki, &title, &metadata, html).await
    }

    /// Forget the cached entry so the next fetch goes to the network
    pub async fn invalidate(&self, wiki: &WikiId, title: &str) -> Result<()> {
        self.cache.invalidate(wiki, &normalize_title(title)).await
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::StaticConnectivity;
    use crate::network::test_support::{FakeBuilder, FakePort, Reply};
    use crate::storage::MemoryStorage;
    use crate::types::BackendKind;
    use url::Url;

    const DOG_REVISION: &str = r#"{"query":{"pages":[{"title":"Dog","revisions":[{"timestamp":"2024-05-01T12:00:00Z"}]}]}}"#;
    const DOG_NEWER: &str = r#"{"query":{"pages":[{"title":"Dog","revisions":[{"timestamp":"2024-06-01T12:00:00Z"}]}]}}"#;
    const DOG_PARSE: &str = r#"{"parse":{"title":"Dog","text":"<p>Woof</p>"}}"#;

    struct Harness {
        pipeline: ArticlePipeline,
        builder: Arc<FakeBuilder>,
        connectivity: Arc<StaticConnectivity>,
        storage: Arc<MemoryStorage>,
        events: broadcast::Receiver<Event>,
    }

    impl Harness {
        fn new(enabled: bool) -> Self {
            let port = FakePort::new(BackendKind::Direct);
            port.reply("prop=revisions", Reply::Text(DOG_REVISION.into()));
            port.reply("action=parse", Reply::Text(DOG_PARSE.into()));
            let builder = Arc::new(FakeBuilder::new().with(port));
            let storage = Arc::new(MemoryStorage::new());
            let connectivity = Arc::new(StaticConnectivity::new(true));
            let (tx, events) = broadcast::channel(16);
            let pipeline = ArticlePipeline::new(
                ArticleCache::new(storage.clone(), "articles"),
                enabled,
                Arc::new(PortPool::new(builder.clone())),
                connectivity.clone(),
                tx,
            );
            Self {
                pipeline,
                builder,
                connectivity,
                storage,
                events,
            }
        }

        fn port(&self) -> &FakePort {
            self.builder.template(BackendKind::Direct)
        }
    }

    fn wiki() -> WikiTarget {
        let mut target = WikiTarget::new("ex", Url::parse("https://example.org/").unwrap());
        target.script_path = "w/".into();
        target
    }

    #[tokio::test]
    async fn miss_fetches_and_writes_through() {
        let h = Harness::new(true);
        let article = h.pipeline.fetch_article(&wiki(), "Dog", false).await.unwrap();

        assert_eq!(article.source, ArticleSource::Network);
        assert_eq!(article.html, "<p>Woof</p>");
        let cached = h.pipeline.cache().get(&wiki().id, "Dog").await.unwrap();
        assert_eq!(cached.html, "<p>Woof</p>");
        assert_eq!(cached.metadata.last_updated.to_rfc3339(), "2024-05-01T12:00:00+00:00");
    }

    #[tokio::test]
    async fn fresh_cache_skips_the_body_fetch() {
        let h = Harness::new(true);
        h.pipeline.fetch_article(&wiki(), "Dog", false).await.unwrap();
        let parses_before = h.port().requests_matching("action=parse");

        let article = h.pipeline.fetch_article(&wiki(), "Dog", false).await.unwrap();
        assert_eq!(article.source, ArticleSource::Cache);
        assert_eq!(h.port().requests_matching("action=parse"), parses_before);
        assert_eq!(h.port().requests_matching("prop=revisions"), 2);
    }

    #[tokio::test]
    async fn newer_remote_revision_triggers_refetch() {
        let h = Harness::new(true);
        h.pipeline.fetch_article(&wiki(), "Dog", false).await.unwrap();
        h.port().reply("prop=revisions", Reply::Text(DOG_NEWER.into()));

        let article = h.pipeline.fetch_article(&wiki(), "Dog", false).await.unwrap();
        assert_eq!(article.source, ArticleSource::Network);
        let cached = h.pipeline.cache().get(&wiki().id, "Dog").await.unwrap();
        assert_eq!(cached.metadata.last_updated.to_rfc3339(), "2024-06-01T12:00:00+00:00");
        assert_eq!(h.port().requests_matching("action=parse"), 2);
    }

    #[tokio::test]
    async fn offline_with_cache_touches_no_network() {
        let h = Harness::new(true);
        let metadata = ArticleMetadata {
            title: "Dog".into(),
            last_updated: Utc::now(),
        };
        h.pipeline
            .cache()
            .put(&wiki().id, "Dog", &metadata, "<p>cached</p>")
            .await
            .unwrap();
        h.connectivity.set_online(false);

        let article = h.pipeline.fetch_article(&wiki(), "Dog", false).await.unwrap();
        assert_eq!(article.source, ArticleSource::Cache);
        assert_eq!(article.html, "<p>cached</p>");
        assert!(h.builder.built().is_empty());
        assert_eq!(h.port().total_calls(), 0);
    }

    #[tokio::test]
    async fn offline_without_cache_is_no_connection() {
        let h = Harness::new(true);
        h.connectivity.set_online(false);
        match h.pipeline.fetch_article(&wiki(), "Dog", false).await {
            Err(Error::NoConnection { title }) => assert_eq!(title, "Dog"),
            other => panic!("expected NoConnection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_probe_trusts_the_cache() {
        let h = Harness::new(true);
        h.pipeline.fetch_article(&wiki(), "Dog", false).await.unwrap();
        h.port().reply(
            "prop=revisions",
            Reply::Fail(Error::TransientNetwork("timed out".into())),
        );

        let article = h.pipeline.fetch_article(&wiki(), "Dog", false).await.unwrap();
        assert_eq!(article.source, ArticleSource::Cache);
        assert_eq!(h.port().requests_matching("action=parse"), 1);
    }

    #[tokio::test]
    async fn failed_refresh_serves_stale_entry() {
        let h = Harness::new(true);
        h.pipeline.fetch_article(&wiki(), "Dog", false).await.unwrap();
        h.port().reply("prop=revisions", Reply::Text(DOG_NEWER.into()));
        h.port().reply(
            "action=parse",
            Reply::Fail(Error::Http {
                status: 500,
                body: "boom".into(),
            }),
        );

        let article = h.pipeline.fetch_article(&wiki(), "Dog", false).await.unwrap();
        assert_eq!(article.source, ArticleSource::StaleCache);
        assert_eq!(article.html, "<p>Woof</p>");
    }

    #[tokio::test]
    async fn failed_fetch_without_cache_propagates_error() {
        let h = Harness::new(true);
        h.port().reply(
            "action=parse",
            Reply::Fail(Error::MalformedResponse("garbage".into())),
        );
        assert!(matches!(
            h.pipeline.fetch_article(&wiki(), "Dog", false).await,
            Err(Error::MalformedResponse(_))
        ));
    }

    #[tokio::test]
    async fn challenge_on_probe_serves_cache_and_announces() {
        let mut h = Harness::new(true);
        h.pipeline.fetch_article(&wiki(), "Dog", false).await.unwrap();
        h.port().reply(
            "prop=revisions",
            Reply::Fail(Error::VerificationRequired {
                url: "https://example.org/w/api.php".into(),
            }),
        );

        let article = h.pipeline.fetch_article(&wiki(), "Dog", false).await.unwrap();
        assert_eq!(article.source, ArticleSource::Cache);
        match h.events.try_recv().unwrap() {
            Event::VerificationRequired { url } => assert_eq!(url, "https://example.org/w/api.php"),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn force_refresh_bypasses_fresh_cache() {
        let h = Harness::new(true);
        h.pipeline.fetch_article(&wiki(), "Dog", false).await.unwrap();
        let article = h.pipeline.fetch_article(&wiki(), "Dog", true).await.unwrap();

        assert_eq!(article.source, ArticleSource::Network);
        assert_eq!(h.port().requests_matching("action=parse"), 2);
    }

    #[tokio::test]
    async fn random_title_is_resolved_before_caching() {
        let h = Harness::new(true);
        h.port().reply(
            "list=random",
            Reply::Text(r#"{"query":{"random":[{"title":"Dog"}]}}"#.into()),
        );

        let article = h.pipeline.fetch_article(&wiki(), "Special:Random", false).await.unwrap();
        assert_eq!(article.title, "Dog");
        assert!(h.pipeline.cache().get(&wiki().id, "Dog").await.is_some());
        assert!(h.pipeline.cache().get(&wiki().id, "Special:Random").await.is_none());
    }

    #[tokio::test]
    async fn disabled_cache_always_fetches_and_stores_nothing() {
        let h = Harness::new(false);
        h.pipeline.fetch_article(&wiki(), "Dog", false).await.unwrap();
        h.pipeline.fetch_article(&wiki(), "Dog", false).await.unwrap();

        assert_eq!(h.port().requests_matching("action=parse"), 2);
        assert_eq!(h.port().requests_matching("prop=revisions"), 0);
        assert_eq!(h.storage.write_count(), 0);
    }

    #[tokio::test]
    async fn edited_html_replaces_entry_and_invalidate_removes_it() {
        let h = Harness::new(true);
        h.pipeline.fetch_article(&wiki(), "Dog", false).await.unwrap();

        h.pipeline
            .store_edited(&wiki().id, "Dog", "<p>Edited</p>")
            .await
            .unwrap();
        let article = h.pipeline.fetch_article(&wiki(), "Dog", false).await.unwrap();
        assert_eq!(article.source, ArticleSource::Cache);
        assert_eq!(article.html, "<p>Edited</p>");

        h.pipeline.invalidate(&wiki().id, "Dog").await.unwrap();
        assert!(h.pipeline.cache().get(&wiki().id, "Dog").await.is_none());
    }

    #[tokio::test]
    async fn cache_keys_are_per_wiki_and_normalised() {
        let storage = Arc::new(MemoryStorage::new());
        let cache = ArticleCache::new(storage.clone(), "articles");
        let metadata = ArticleMetadata {
            title: "Hot dog".into(),
            last_updated: Utc::now(),
        };
        cache
            .put(&WikiId::from("a"), "Hot_dog", &metadata, "<p>a</p>")
            .await
            .unwrap();

        assert!(cache.get(&WikiId::from("a"), " Hot dog ").await.is_some());
        assert!(cache.get(&WikiId::from("b"), "Hot dog").await.is_none());
        assert!(storage.keys().iter().all(|key| key.starts_with("articles/")));
        // body plus metadata
        assert!(cache.size_bytes().await.unwrap() > "<p>a</p>".len() as u64);

        cache.clear().await.unwrap();
        assert!(cache.get(&WikiId::from("a"), "Hot dog").await.is_none());
    }
}
