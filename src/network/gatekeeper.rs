//! Remote relay backend.
//!
//! The gatekeeper is an HTTP service that performs requests on our behalf
//! from an environment the origin trusts. It accepts
//! `{"url": ...}` for GETs and `{"url": ..., "postData": ...}` for form posts
//! and answers with the origin's body, sometimes gzip-compressed.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Serialize;
use url::Url;

use super::NetworkAccessPort;
use super::direct::http_error;
use super::extract::{decode_relay_body, ensure_not_challenge, unwrap_json_payload};
use super::lifecycle::Lifecycle;
use crate::config::NetworkConfig;
use crate::error::{Error, Result};
use crate::types::BackendKind;

#[derive(Debug, Serialize)]
struct RelayRequest<'a> {
    url: &'a str,
    #[serde(rename = "postData", skip_serializing_if = "Option::is_none")]
    post_data: Option<BTreeMap<&'a str, &'a str>>,
}

/// Backend that delegates every request to the gatekeeper relay
pub struct GatekeeperPort {
    client: reqwest::Client,
    endpoint: Url,
    // The relay keeps the origin session; these only satisfy cookie transplants
    cookies: Mutex<Vec<String>>,
    lifecycle: Lifecycle,
}

impl GatekeeperPort {
    /// Create a port for the relay at `config.gatekeeper_endpoint`
    pub fn new(config: &NetworkConfig) -> Result<Self> {
        let endpoint = Url::parse(&config.gatekeeper_endpoint).map_err(|e| {
            Error::config(
                format!("invalid gatekeeper endpoint: {e}"),
                "gatekeeper_endpoint",
            )
        })?;
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::config(format!("failed to build HTTP client: {e}"), "network"))?;

        Ok(Self {
            client,
            endpoint,
            cookies: Mutex::new(Vec::new()),
            lifecycle: Lifecycle::new(),
        })
    }

    async fn relay(&self, url: &Url, post_data: Option<BTreeMap<&str, &str>>) -> Result<Vec<u8>> {
        self.lifecycle.ensure_ready()?;
        tracing::debug!(url = %url, post = post_data.is_some(), "relaying request");

        let request = RelayRequest {
            url: url.as_str(),
            post_data,
        };
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let bytes = decode_relay_body(response.bytes().await?.to_vec())?;
        if !status.is_success() {
            let body = String::from_utf8_lossy(&bytes);
            tracing::warn!(url = %url, status = status.as_u16(), "gatekeeper rejected request");
            return Err(http_error(status.as_u16(), &body));
        }
        Ok(bytes)
    }

    async fn relay_text(
        &self,
        url: &Url,
        post_data: Option<BTreeMap<&str, &str>>,
    ) -> Result<String> {
        let bytes = self.relay(url, post_data).await?;
        let text = String::from_utf8(bytes)
            .map_err(|e| Error::MalformedResponse(format!("relay body is not UTF-8: {e}")))?;
        ensure_not_challenge(url.as_str(), &text)?;
        Ok(text)
    }
}

/// Form fields as the relay's `postData` object; a repeated name keeps its last value
fn post_data(fields: &[(String, String)]) -> BTreeMap<&str, &str> {
    fields
        .iter()
        .map(|(name, value)| (name.as_str(), value.as_str()))
        .collect()
}

#[async_trait]
impl NetworkAccessPort for GatekeeperPort {
    fn kind(&self) -> BackendKind {
        BackendKind::Gatekeeper
    }

    async fn initialize(&self, _base_url: Option<&Url>) -> Result<()> {
        self.lifecycle.initialize(|| async { Ok(()) }).await
    }

    async fn fetch_json(&self, url: &Url) -> Result<String> {
        let text = self.relay_text(url, None).await?;
        unwrap_json_payload(&text)
    }

    async fn post_form_and_fetch_json(
        &self,
        url: &Url,
        fields: &[(String, String)],
    ) -> Result<String> {
        let text = self.relay_text(url, Some(post_data(fields))).await?;
        unwrap_json_payload(&text)
    }

    async fn fetch_raw_html(&self, url: &Url) -> Result<String> {
        self.relay_text(url, None).await
    }

    async fn fetch_raw_bytes(&self, url: &Url) -> Result<Vec<u8>> {
        self.relay(url, None).await
    }

    async fn export_cookies(&self, _url: &Url) -> Result<Vec<String>> {
        Ok(self
            .cookies
            .lock()
            .map(|cookies| cookies.clone())
            .unwrap_or_default())
    }

    async fn import_cookies(&self, _url: &Url, cookies: &[String]) -> Result<()> {
        if let Ok(mut stored) = self.cookies.lock() {
            stored.extend_from_slice(cookies);
        }
        Ok(())
    }

    async fn dispose(&self) {
        self.lifecycle.dispose();
    }
}
