//! Browser-driven backend.
//!
//! The crate ships no browser engine. Hosts plug one in through
//! [`SurfaceFactory`] / [`BrowserSurface`]; [`ScriptedPort`] turns the port
//! contract into navigations and in-page `fetch()` calls on that surface.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use url::Url;

use super::NetworkAccessPort;
use super::direct::http_error;
use super::extract::{ensure_not_challenge, unwrap_json_payload};
use super::lifecycle::Lifecycle;
use crate::error::{Error, Result};
use crate::types::BackendKind;

/// A scripting-capable page, typically an embedded or headless browser tab
#[async_trait]
pub trait BrowserSurface: Send + Sync {
    /// Load `url` and return the rendered document once it settles
    ///
    /// When the origin shows an interactive challenge, the surface is expected
    /// to keep waiting while the user solves it.
    async fn navigate(&self, url: &Url) -> Result<String>;

    /// Evaluate a script in the current page and return its string result
    ///
    /// Scripts produced by [`ScriptedPort`] evaluate to a promise of a string.
    async fn evaluate(&self, script: &str) -> Result<String>;

    /// Cookies visible to `url`, as `name=value` pairs
    async fn cookies(&self, url: &Url) -> Result<Vec<String>>;

    /// Install `name=value` cookies for `url`
    async fn set_cookies(&self, url: &Url, cookies: &[String]) -> Result<()>;

    /// Tear the surface down
    async fn close(&self);
}

/// Opens fresh [`BrowserSurface`]s for scripted ports
#[async_trait]
pub trait SurfaceFactory: Send + Sync {
    /// Open a new, blank surface
    async fn open(&self) -> Result<Arc<dyn BrowserSurface>>;
}

/// Result envelope produced by the in-page scripts
#[derive(Debug, Deserialize)]
struct InPageResponse {
    status: u16,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    base64: Option<String>,
}

/// Backend that drives a [`BrowserSurface`]
///
/// Slower than plain HTTP but able to pass challenge walls, because the
/// surface carries the clearance cookies a solved challenge leaves behind.
pub struct ScriptedPort {
    factory: Arc<dyn SurfaceFactory>,
    surface: Mutex<Option<Arc<dyn BrowserSurface>>>,
    challenge_timeout: Duration,
    lifecycle: Lifecycle,
}

impl ScriptedPort {
    /// Create an uninitialised port; the surface opens on `initialize`
    pub fn new(factory: Arc<dyn SurfaceFactory>, challenge_timeout: Duration) -> Self {
        Self {
            factory,
            surface: Mutex::new(None),
            challenge_timeout,
            lifecycle: Lifecycle::new(),
        }
    }

    fn surface(&self) -> Result<Arc<dyn BrowserSurface>> {
        self.lifecycle.ensure_ready()?;
        self.surface
            .lock()
            .ok()
            .and_then(|guard| guard.clone())
            .ok_or(Error::NotInitialized)
    }

    async fn bounded<T>(
        &self,
        what: &Url,
        operation: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        tokio::time::timeout(self.challenge_timeout, operation)
            .await
            .map_err(|_| {
                Error::TransientNetwork(format!(
                    "{what} did not settle within {}s",
                    self.challenge_timeout.as_secs()
                ))
            })?
    }

    async fn navigate(&self, surface: &dyn BrowserSurface, url: &Url) -> Result<String> {
        tracing::debug!(url = %url, "scripted navigation");
        let html = self.bounded(url, surface.navigate(url)).await?;
        ensure_not_challenge(url.as_str(), &html)?;
        Ok(html)
    }

    async fn run_in_page(&self, url: &Url, script: String) -> Result<InPageResponse> {
        let surface = self.surface()?;
        let raw = self.bounded(url, surface.evaluate(&script)).await?;
        serde_json::from_str(&raw)
            .map_err(|e| Error::MalformedResponse(format!("in-page fetch result: {e}")))
    }
}

/// Script fetching `url` with the page's credentials, body base64-encoded
fn bytes_script(url: &Url) -> String {
    let target = serde_json::Value::from(url.as_str()).to_string();
    format!(
        r#"(async () => {{
  const r = await fetch({target}, {{ credentials: 'include' }});
  if (!r.ok) return JSON.stringify({{ status: r.status, text: await r.text() }});
  const data = new Uint8Array(await r.arrayBuffer());
  let bin = '';
  for (let i = 0; i < data.length; i += 0x8000) bin += String.fromCharCode.apply(null, data.subarray(i, i + 0x8000));
  return JSON.stringify({{ status: r.status, base64: btoa(bin) }});
}})()"#
    )
}

/// Script posting `fields` form-encoded to `url`, body returned as text
fn post_script(url: &Url, fields: &[(String, String)]) -> String {
    let target = serde_json::Value::from(url.as_str()).to_string();
    let pairs = serde_json::to_string(fields).unwrap_or_else(|_| "[]".to_string());
    format!(
        r#"(async () => {{
  const r = await fetch({target}, {{
    method: 'POST',
    credentials: 'include',
    headers: {{ 'Content-Type': 'application/x-www-form-urlencoded' }},
    body: new URLSearchParams({pairs}).toString()
  }});
  return JSON.stringify({{ status: r.status, text: await r.text() }});
}})()"#
    )
}

fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

#[async_trait]
impl NetworkAccessPort for ScriptedPort {
    fn kind(&self) -> BackendKind {
        BackendKind::Scripted
    }

    async fn initialize(&self, base_url: Option<&Url>) -> Result<()> {
        self.lifecycle
            .initialize(|| async {
                let surface = self.factory.open().await?;
                if let Some(base) = base_url
                    && let Err(e) = self.navigate(surface.as_ref(), base).await
                {
                    surface.close().await;
                    return Err(e);
                }
                if let Ok(mut guard) = self.surface.lock() {
                    *guard = Some(surface);
                }
                tracing::debug!(base_url = ?base_url.map(Url::as_str), "scripted surface ready");
                Ok(())
            })
            .await
    }

    async fn fetch_json(&self, url: &Url) -> Result<String> {
        let surface = self.surface()?;
        let html = self.navigate(surface.as_ref(), url).await?;
        unwrap_json_payload(&html)
    }

    async fn post_form_and_fetch_json(
        &self,
        url: &Url,
        fields: &[(String, String)],
    ) -> Result<String> {
        let response = self.run_in_page(url, post_script(url, fields)).await?;
        let text = response.text.unwrap_or_default();
        ensure_not_challenge(url.as_str(), &text)?;
        if !is_success(response.status) {
            return Err(http_error(response.status, &text));
        }
        unwrap_json_payload(&text)
    }

    async fn fetch_raw_html(&self, url: &Url) -> Result<String> {
        let surface = self.surface()?;
        self.navigate(surface.as_ref(), url).await
    }

    async fn fetch_raw_bytes(&self, url: &Url) -> Result<Vec<u8>> {
        let response = self.run_in_page(url, bytes_script(url)).await?;
        if !is_success(response.status) {
            let text = response.text.unwrap_or_default();
            ensure_not_challenge(url.as_str(), &text)?;
            return Err(http_error(response.status, &text));
        }
        let encoded = response.base64.ok_or_else(|| {
            Error::MalformedResponse(format!("in-page fetch of {url} returned no body"))
        })?;
        BASE64
            .decode(encoded.as_bytes())
            .map_err(|e| Error::MalformedResponse(format!("in-page fetch body: {e}")))
    }

    async fn land_on(&self, base_url: &Url) -> Result<()> {
        let surface = self.surface()?;
        self.navigate(surface.as_ref(), base_url).await.map(|_| ())
    }

    async fn export_cookies(&self, url: &Url) -> Result<Vec<String>> {
        self.surface()?.cookies(url).await
    }

    async fn import_cookies(&self, url: &Url, cookies: &[String]) -> Result<()> {
        self.surface()?.set_cookies(url, cookies).await
    }

    async fn dispose(&self) {
        if !self.lifecycle.dispose() {
            return;
        }
        let surface = self.surface.lock().ok().and_then(|mut guard| guard.take());
        if let Some(surface) = surface {
            surface.close().await;
            tracing::debug!("scripted surface closed");
        }
    }
}
