//! One live port per wiki.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use super::{NetworkAccessPort, PortBuilder};
use crate::error::Result;
use crate::types::{WikiId, WikiTarget};

/// Keeps a shared, initialised port per wiki
///
/// The shared port is built with the wiki's preferred backend and rebuilt
/// when that preference changes. Background work asks for a
/// [`dedicated`](PortPool::dedicated) port instead so it never competes with
/// foreground requests for the same session.
pub struct PortPool {
    builder: Arc<dyn PortBuilder>,
    ports: Mutex<HashMap<WikiId, Arc<dyn NetworkAccessPort>>>,
}

impl PortPool {
    /// Create an empty pool
    pub fn new(builder: Arc<dyn PortBuilder>) -> Self {
        Self {
            builder,
            ports: Mutex::new(HashMap::new()),
        }
    }

    /// The shared port for `target`, created and initialised on first use
    pub async fn port_for(&self, target: &WikiTarget) -> Result<Arc<dyn NetworkAccessPort>> {
        let (port, replaced) = {
            let mut ports = self.ports.lock().await;
            match ports.get(&target.id) {
                Some(port) if port.kind() == target.preferred_backend => (Arc::clone(port), None),
                _ => {
                    let port = self.builder.create(target.preferred_backend)?;
                    let replaced = ports.insert(target.id.clone(), Arc::clone(&port));
                    (port, replaced)
                }
            }
        };

        if let Some(old) = replaced {
            tracing::debug!(
                wiki_id = %target.id,
                from = %old.kind(),
                to = %target.preferred_backend,
                "preferred backend changed, replacing port"
            );
            old.dispose().await;
        }

        port.initialize(Some(&target.base_url)).await?;
        Ok(port)
    }

    /// Make an initialised port the shared port of `id`, disposing the one it replaces
    pub async fn adopt(&self, id: WikiId, port: Arc<dyn NetworkAccessPort>) {
        let replaced = self.ports.lock().await.insert(id, Arc::clone(&port));
        if let Some(old) = replaced
            && !Arc::ptr_eq(&old, &port)
        {
            old.dispose().await;
        }
    }

    /// A fresh port for `target` carrying the shared port's cookies
    ///
    /// Cookies go in before the port first visits the origin, so a cleared
    /// challenge stays cleared. The caller owns the port and must dispose it.
    pub async fn dedicated(&self, target: &WikiTarget) -> Result<Arc<dyn NetworkAccessPort>> {
        let port = self.builder.create(target.preferred_backend)?;
        if let Err(e) = port.initialize(None).await {
            port.dispose().await;
            return Err(e);
        }

        let shared = self.ports.lock().await.get(&target.id).cloned();
        if let Some(shared) = shared {
            port.copy_cookies_from(shared.as_ref(), &target.base_url)
                .await;
        }

        if let Err(e) = port.land_on(&target.base_url).await {
            tracing::warn!(wiki_id = %target.id, error = %e, "dedicated port could not reach origin");
            port.dispose().await;
            return Err(e);
        }
        Ok(port)
    }

    /// Dispose and forget the shared port of one wiki
    pub async fn release(&self, id: &WikiId) {
        let removed = self.ports.lock().await.remove(id);
        if let Some(port) = removed {
            port.dispose().await;
        }
    }

    /// Dispose every shared port
    pub async fn dispose_all(&self) {
        let ports: Vec<_> = self.ports.lock().await.drain().collect();
        for (id, port) in ports {
            tracing::debug!(wiki_id = %id, backend = %port.kind(), "disposing port");
            port.dispose().await;
        }
    }
}
