//! Network reachability
//!
//! The article pipeline asks a [`Connectivity`] before touching the network so
//! that an offline device serves its cache immediately instead of waiting for
//! request timeouts.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::config::NetworkConfig;
use crate::error::{Error, Result};

/// Reports whether the network is currently reachable
#[async_trait]
pub trait Connectivity: Send + Sync {
    /// True when requests have a chance of succeeding
    async fn is_online(&self) -> bool;
}

/// Fixed answer, switchable at runtime (hosts wire OS reachability events into it)
#[derive(Debug)]
pub struct StaticConnectivity {
    online: AtomicBool,
}

impl StaticConnectivity {
    /// Start with the given state
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
        }
    }

    /// Flip the reported state
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connectivity for StaticConnectivity {
    async fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

/// Probes a URL; any HTTP answer at all counts as online
pub struct HttpConnectivity {
    client: reqwest::Client,
    probe_url: Url,
    timeout: Duration,
}

impl HttpConnectivity {
    /// Probe `probe_url`, giving up after `timeout`
    pub fn new(probe_url: Url, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::config(format!("failed to build HTTP client: {e}"), "network"))?;
        Ok(Self {
            client,
            probe_url,
            timeout,
        })
    }

    /// Probe `connectivity_probe_url` when configured, otherwise assume online
    pub fn from_config(config: &NetworkConfig) -> Result<Box<dyn Connectivity>> {
        match &config.connectivity_probe_url {
            Some(probe) => {
                let url = Url::parse(probe).map_err(|e| {
                    Error::config(format!("invalid probe URL: {e}"), "connectivity_probe_url")
                })?;
                Ok(Box::new(Self::new(url, config.request_timeout)?))
            }
            None => Ok(Box::new(StaticConnectivity::new(true))),
        }
    }
}

#[async_trait]
impl Connectivity for HttpConnectivity {
    async fn is_online(&self) -> bool {
        let request = self.client.head(self.probe_url.clone()).send();
        match tokio::time::timeout(self.timeout, request).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                tracing::debug!(url = %self.probe_url, error = %e, "connectivity probe failed");
                false
            }
            Err(_) => {
                tracing::debug!(url = %self.probe_url, timeout = ?self.timeout, "connectivity probe timed out");
                false
            }
        }
    }
}
