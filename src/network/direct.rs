//! Direct HTTP backend built on `reqwest`.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::cookie::{CookieStore as _, Jar};
use url::Url;

use super::extract::{ensure_not_challenge, unwrap_json_payload};
use super::lifecycle::Lifecycle;
use super::{NetworkAccessPort, split_cookie_header};
use crate::config::NetworkConfig;
use crate::error::{Error, Result};
use crate::types::BackendKind;

/// Longest response body kept in an [`Error::Http`] diagnostic
const MAX_ERROR_BODY: usize = 512;

/// Header Cloudflare sets on challenge responses
const MITIGATED_HEADER: &str = "cf-mitigated";

/// Plain request/response backend
///
/// Fastest of the three, but cannot pass an interactive challenge: a
/// challenge wall is reported as [`Error::VerificationRequired`].
pub struct DirectHttpPort {
    client: reqwest::Client,
    jar: Arc<Jar>,
    base_url: Mutex<Option<Url>>,
    lifecycle: Lifecycle,
}

impl DirectHttpPort {
    /// Build a client with a private cookie jar
    pub fn new(config: &NetworkConfig) -> Result<Self> {
        let jar = Arc::new(Jar::default());
        let client = reqwest::Client::builder()
            .cookie_provider(Arc::clone(&jar))
            .user_agent(config.user_agent.clone())
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::config(format!("failed to build HTTP client: {e}"), "network"))?;

        Ok(Self {
            client,
            jar,
            base_url: Mutex::new(None),
            lifecycle: Lifecycle::new(),
        })
    }

    /// Base URL recorded by `initialize`, if any
    pub fn base_url(&self) -> Option<Url> {
        self.base_url.lock().ok().and_then(|guard| guard.clone())
    }

    async fn read_text(&self, url: &Url, response: reqwest::Response) -> Result<String> {
        let status = response.status();
        let mitigated = response.headers().contains_key(MITIGATED_HEADER);
        let body = response.text().await?;

        if mitigated || !status.is_success() {
            ensure_not_challenge(url.as_str(), &body)?;
        }
        if !status.is_success() {
            return Err(http_error(status.as_u16(), &body));
        }
        Ok(body)
    }

    async fn get_text(&self, url: &Url) -> Result<String> {
        self.lifecycle.ensure_ready()?;
        tracing::debug!(url = %url, "direct GET");
        let response = self.client.get(url.clone()).send().await?;
        self.read_text(url, response).await
    }
}

pub(crate) fn http_error(status: u16, body: &str) -> Error {
    let body: String = body.chars().take(MAX_ERROR_BODY).collect();
    Error::Http { status, body }
}

#[async_trait]
impl NetworkAccessPort for DirectHttpPort {
    fn kind(&self) -> BackendKind {
        BackendKind::Direct
    }

    async fn initialize(&self, base_url: Option<&Url>) -> Result<()> {
        self.lifecycle
            .initialize(|| async {
                if let Ok(mut guard) = self.base_url.lock() {
                    *guard = base_url.cloned();
                }
                Ok(())
            })
            .await
    }

    async fn fetch_json(&self, url: &Url) -> Result<String> {
        let body = self.get_text(url).await?;
        unwrap_json_payload(&body)
    }

    async fn post_form_and_fetch_json(
        &self,
        url: &Url,
        fields: &[(String, String)],
    ) -> Result<String> {
        self.lifecycle.ensure_ready()?;
        tracing::debug!(url = %url, fields = fields.len(), "direct POST");
        let response = self.client.post(url.clone()).form(fields).send().await?;
        let body = self.read_text(url, response).await?;
        unwrap_json_payload(&body)
    }

    async fn fetch_raw_html(&self, url: &Url) -> Result<String> {
        self.get_text(url).await
    }

    async fn fetch_raw_bytes(&self, url: &Url) -> Result<Vec<u8>> {
        self.lifecycle.ensure_ready()?;
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;

        if !status.is_success() {
            let body = String::from_utf8_lossy(&bytes);
            ensure_not_challenge(url.as_str(), &body)?;
            return Err(http_error(status.as_u16(), &body));
        }
        Ok(bytes.to_vec())
    }

    async fn export_cookies(&self, url: &Url) -> Result<Vec<String>> {
        let Some(header) = self.jar.cookies(url) else {
            return Ok(Vec::new());
        };
        let header = header
            .to_str()
            .map_err(|e| Error::MalformedResponse(format!("cookie header: {e}")))?;
        Ok(split_cookie_header(header))
    }

    async fn import_cookies(&self, url: &Url, cookies: &[String]) -> Result<()> {
        for cookie in cookies {
            self.jar.add_cookie_str(cookie, url);
        }
        Ok(())
    }

    async fn dispose(&self) {
        if self.lifecycle.dispose() {
            tracing::debug!("direct port disposed");
        }
    }
}
