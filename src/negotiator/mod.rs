//! Backend negotiation and connection testing
//!
//! [`ConnectionNegotiator::negotiate`] walks [`BackendKind::PRIORITY`] and
//! keeps the first backend that can both read the origin's root page and
//! answer an API probe. It is a plain fallback chain: the first working
//! candidate wins.

mod paths;

pub use paths::{detect_article_path, detect_script_path};

use std::sync::Arc;
use std::time::Instant;

use url::Url;

use crate::error::{Error, Result};
use crate::network::{NetworkAccessPort, PortBuilder};
use crate::types::{BackendKind, ConnectionProbeResult, ConnectionTestResult, WikiTarget};
use crate::wiki_api;

/// Outcome of a successful negotiation
///
/// `port` is the winning backend, already initialised; callers may adopt it
/// instead of building a new one.
pub struct Negotiated {
    /// Detected paths and chosen backend
    pub probe: ConnectionProbeResult,
    /// The initialised port that passed the probe
    pub port: Arc<dyn NetworkAccessPort>,
}

impl std::fmt::Debug for Negotiated {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Negotiated")
            .field("probe", &self.probe)
            .field("port", &self.port.kind())
            .finish()
    }
}

/// Picks a working backend for a wiki origin
pub struct ConnectionNegotiator {
    builder: Arc<dyn PortBuilder>,
}

impl ConnectionNegotiator {
    /// Create a negotiator building candidates with `builder`
    pub fn new(builder: Arc<dyn PortBuilder>) -> Self {
        Self { builder }
    }

    /// Try every backend in priority order against `base_url`
    ///
    /// Fails with [`Error::NegotiationFailed`] listing one reason per
    /// candidate when none works. A challenge wall on one candidate only
    /// disqualifies that candidate.
    pub async fn negotiate(&self, base_url: &Url) -> Result<Negotiated> {
        let mut attempts = Vec::new();

        for kind in BackendKind::PRIORITY {
            let port = match self.builder.create(kind) {
                Ok(port) => port,
                Err(e) => {
                    tracing::debug!(backend = %kind, error = %e, "backend unavailable, skipping");
                    attempts.push(format!("{kind}: {e}"));
                    continue;
                }
            };

            match self.try_candidate(port.as_ref(), base_url).await {
                Ok(probe) => {
                    tracing::info!(
                        base_url = %base_url,
                        backend = %kind,
                        script_path = %probe.script_path,
                        article_path = %probe.article_path,
                        "backend negotiated"
                    );
                    return Ok(Negotiated { probe, port });
                }
                Err(e) => {
                    tracing::warn!(base_url = %base_url, backend = %kind, error = %e, "candidate failed");
                    attempts.push(format!("{kind}: {e}"));
                    port.dispose().await;
                }
            }
        }

        Err(Error::NegotiationFailed {
            base_url: base_url.to_string(),
            attempts,
        })
    }

    async fn try_candidate(
        &self,
        port: &dyn NetworkAccessPort,
        base_url: &Url,
    ) -> Result<ConnectionProbeResult> {
        port.initialize(Some(base_url)).await?;
        let html = port.fetch_raw_html(base_url).await?;

        let (script_path, article_path) = paths::detect_paths(&html, base_url);
        let script_path = script_path.ok_or_else(|| {
            Error::MalformedResponse("root page has no API edit link".to_string())
        })?;

        let mut target = WikiTarget::new("negotiation", base_url.clone());
        target.script_path = script_path.clone();
        let site = wiki_api::siteinfo(port, &target).await?;
        tracing::debug!(sitename = %site.sitename, backend = %port.kind(), "API probe answered");

        Ok(ConnectionProbeResult {
            success: true,
            backend: port.kind(),
            script_path,
            article_path,
        })
    }

    /// Probe `target` with its preferred backend and time the round trip
    ///
    /// Never fails; the outcome is reported in the result.
    pub async fn test_connection(&self, target: &WikiTarget) -> ConnectionTestResult {
        let backend = target.preferred_backend;
        let port = match self.builder.create(backend) {
            Ok(port) => port,
            Err(e) => return ConnectionTestResult::failed(backend, e.to_string()),
        };

        let start = Instant::now();
        let outcome = async {
            port.initialize(Some(&target.base_url)).await?;
            wiki_api::siteinfo(port.as_ref(), target).await
        }
        .await;
        let latency = start.elapsed();
        port.dispose().await;

        match outcome {
            Ok(_) => ConnectionTestResult {
                success: true,
                backend,
                latency: Some(latency),
                error: None,
            },
            Err(e) => {
                tracing::warn!(wiki_id = %target.id, backend = %backend, error = %e, "connection test failed");
                ConnectionTestResult::failed(backend, e.to_string())
            }
        }
    }
}
