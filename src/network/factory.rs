//! Backend construction.

use std::sync::Arc;

use super::{DirectHttpPort, GatekeeperPort, NetworkAccessPort, ScriptedPort, SurfaceFactory};
use crate::config::NetworkConfig;
use crate::error::{Error, Result};
use crate::types::BackendKind;

/// Builds uninitialised ports for a backend variant
///
/// The pool and the negotiator only see this trait, so the set of available
/// backends is decided by whoever constructs the client.
pub trait PortBuilder: Send + Sync {
    /// Create a fresh, uninitialised port of the given kind
    fn create(&self, kind: BackendKind) -> Result<Arc<dyn NetworkAccessPort>>;
}

/// The production [`PortBuilder`]
pub struct PortFactory {
    config: NetworkConfig,
    surfaces: Option<Arc<dyn SurfaceFactory>>,
}

impl PortFactory {
    /// Factory without a browser engine; scripted ports cannot be built
    pub fn new(config: NetworkConfig) -> Self {
        Self {
            config,
            surfaces: None,
        }
    }

    /// Enable [`BackendKind::Scripted`] using `surfaces` to open pages
    pub fn with_surfaces(mut self, surfaces: Arc<dyn SurfaceFactory>) -> Self {
        self.surfaces = Some(surfaces);
        self
    }
}

impl PortBuilder for PortFactory {
    fn create(&self, kind: BackendKind) -> Result<Arc<dyn NetworkAccessPort>> {
        let port: Arc<dyn NetworkAccessPort> = match kind {
            BackendKind::Direct => Arc::new(DirectHttpPort::new(&self.config)?),
            BackendKind::Scripted => {
                let surfaces = self.surfaces.as_ref().ok_or_else(|| {
                    Error::config(
                        "scripted backend requested but no browser surface factory is configured",
                        "surfaces",
                    )
                })?;
                Arc::new(ScriptedPort::new(
                    Arc::clone(surfaces),
                    self.config.challenge_timeout,
                ))
            }
            BackendKind::Gatekeeper => Arc::new(GatekeeperPort::new(&self.config)?),
        };
        Ok(port)
    }
}
