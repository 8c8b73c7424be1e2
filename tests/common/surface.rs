//! A stand-in browser surface whose challenge is already solved

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use url::Url;
use wiki_fetch::{BrowserSurface, Error, Result, SurfaceFactory};

use super::fixtures::CLEARANCE;

/// Opens [`ClearedSurface`]s and counts them
#[derive(Default)]
pub struct ClearedSurfaces {
    pub opened: AtomicUsize,
    pub closed: Arc<AtomicUsize>,
}

#[async_trait]
impl SurfaceFactory for ClearedSurfaces {
    async fn open(&self) -> Result<Arc<dyn BrowserSurface>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(ClearedSurface {
            client: reqwest::Client::new(),
            closed: Arc::clone(&self.closed),
        }))
    }
}

/// Navigates with the clearance header a solved challenge would leave behind
pub struct ClearedSurface {
    client: reqwest::Client,
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl BrowserSurface for ClearedSurface {
    async fn navigate(&self, url: &Url) -> Result<String> {
        let response = self
            .client
            .get(url.clone())
            .header(CLEARANCE.0, CLEARANCE.1)
            .send()
            .await
            .map_err(|e| Error::TransientNetwork(e.to_string()))?;
        response
            .text()
            .await
            .map_err(|e| Error::TransientNetwork(e.to_string()))
    }

    async fn evaluate(&self, _script: &str) -> Result<String> {
        Err(Error::MalformedResponse(
            "test surface has no script engine".to_string(),
        ))
    }

    async fn cookies(&self, _url: &Url) -> Result<Vec<String>> {
        Ok(vec!["cf_clearance=solved".to_string()])
    }

    async fn set_cookies(&self, _url: &Url, _cookies: &[String]) -> Result<()> {
        Ok(())
    }

    async fn close(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}
