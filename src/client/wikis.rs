//! Registering wikis and choosing how to reach them.

use url::Url;

use super::WikiClient;
use crate::error::{Error, Result};
use crate::types::{BackendKind, ConnectionTestResult, Event, WikiId, WikiTarget};

impl WikiClient {
    /// Negotiate a backend for `base_url` and register the wiki under `id`
    ///
    /// The detected script and article paths and the winning backend are
    /// persisted. The port that passed negotiation becomes the wiki's shared
    /// port, so its session (including any solved challenge) is kept.
    pub async fn connect_wiki(&self, id: impl Into<WikiId>, base_url: &str) -> Result<WikiTarget> {
        let id = id.into();
        let base_url = parse_base_url(base_url)?;

        let negotiated = self.negotiator.negotiate(&base_url).await?;
        let target = WikiTarget {
            id: id.clone(),
            base_url,
            script_path: negotiated.probe.script_path,
            article_path: negotiated.probe.article_path,
            preferred_backend: negotiated.probe.backend,
        };

        self.registry.upsert(target.clone()).await?;
        self.pool.adopt(id.clone(), negotiated.port).await;

        tracing::info!(wiki_id = %id, backend = %target.preferred_backend, "wiki connected");
        self.emit(Event::BackendSelected {
            wiki_id: id,
            backend: target.preferred_backend,
        });
        Ok(target)
    }

    /// Register a wiki whose paths and backend are already known
    ///
    /// Replaces any previous registration and its shared port.
    pub async fn add_wiki(&self, target: WikiTarget) -> Result<()> {
        let id = target.id.clone();
        self.registry.upsert(target).await?;
        self.pool.release(&id).await;
        Ok(())
    }

    /// Forget a wiki and close its port; returns whether it was registered
    pub async fn remove_wiki(&self, id: &WikiId) -> Result<bool> {
        let removed = self.registry.remove(id).await?;
        self.pool.release(id).await;
        Ok(removed)
    }

    /// One registered wiki
    pub async fn wiki(&self, id: &WikiId) -> Result<WikiTarget> {
        self.registry.require(id).await
    }

    /// Every registered wiki, ordered by id
    pub async fn wikis(&self) -> Vec<WikiTarget> {
        self.registry.list().await
    }

    /// Reach `id` through `backend` from now on
    ///
    /// The shared port is rebuilt on its next use.
    pub async fn set_preferred_backend(
        &self,
        id: &WikiId,
        backend: BackendKind,
    ) -> Result<WikiTarget> {
        let target = self.registry.set_preferred_backend(id, backend).await?;
        self.emit(Event::BackendSelected {
            wiki_id: id.clone(),
            backend,
        });
        Ok(target)
    }

    /// Probe a registered wiki with its preferred backend
    pub async fn test_connection(&self, id: &WikiId) -> Result<ConnectionTestResult> {
        let target = self.registry.require(id).await?;
        Ok(self.negotiator.test_connection(&target).await)
    }
}

/// Parse a user-supplied origin, making sure relative joins stay inside it
fn parse_base_url(raw: &str) -> Result<Url> {
    let mut url = Url::parse(raw.trim())
        .map_err(|e| Error::config(format!("invalid base URL {raw}: {e}"), "base_url"))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::config(
            format!("unsupported scheme in base URL {raw}"),
            "base_url",
        ));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}
