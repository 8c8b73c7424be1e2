//! Persisted list of configured wikis

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::storage::{StorageProvider, read_json, write_json};
use crate::types::{BackendKind, WikiId, WikiTarget};

/// Known wikis keyed by id, written through on every change
///
/// The lock is held across the write so persisted snapshots land in order.
pub struct WikiRegistry {
    storage: Arc<dyn StorageProvider>,
    key: String,
    wikis: Mutex<BTreeMap<WikiId, WikiTarget>>,
}

impl WikiRegistry {
    /// Restore the registry stored under `key`
    ///
    /// An unreadable registry is logged and replaced by an empty one.
    pub async fn load(storage: Arc<dyn StorageProvider>, key: impl Into<String>) -> Self {
        let key = key.into();
        let wikis = match read_json::<Vec<WikiTarget>>(storage.as_ref(), &key).await {
            Ok(Some(list)) => list.into_iter().map(|w| (w.id.clone(), w)).collect(),
            Ok(None) => BTreeMap::new(),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "discarding unreadable wiki registry");
                BTreeMap::new()
            }
        };
        Self {
            storage,
            key,
            wikis: Mutex::new(wikis),
        }
    }

    /// Look up one wiki
    pub async fn get(&self, id: &WikiId) -> Option<WikiTarget> {
        self.wikis.lock().await.get(id).cloned()
    }

    /// Look up one wiki, failing with [`Error::UnknownWiki`]
    pub async fn require(&self, id: &WikiId) -> Result<WikiTarget> {
        self.get(id)
            .await
            .ok_or_else(|| Error::UnknownWiki(id.clone()))
    }

    /// Every registered wiki, ordered by id
    pub async fn list(&self) -> Vec<WikiTarget> {
        self.wikis.lock().await.values().cloned().collect()
    }

    /// Insert or replace a wiki
    pub async fn upsert(&self, target: WikiTarget) -> Result<()> {
        let mut wikis = self.wikis.lock().await;
        wikis.insert(target.id.clone(), target);
        self.persist(&wikis).await
    }

    /// Forget a wiki; returns whether it was registered
    pub async fn remove(&self, id: &WikiId) -> Result<bool> {
        let mut wikis = self.wikis.lock().await;
        if wikis.remove(id).is_none() {
            return Ok(false);
        }
        self.persist(&wikis).await?;
        Ok(true)
    }

    /// Change the backend a wiki is reached through
    pub async fn set_preferred_backend(
        &self,
        id: &WikiId,
        backend: BackendKind,
    ) -> Result<WikiTarget> {
        let mut wikis = self.wikis.lock().await;
        let target = wikis
            .get_mut(id)
            .ok_or_else(|| Error::UnknownWiki(id.clone()))?;
        target.preferred_backend = backend;
        let updated = target.clone();
        self.persist(&wikis).await?;
        Ok(updated)
    }

    async fn persist(&self, wikis: &BTreeMap<WikiId, WikiTarget>) -> Result<()> {
        let list: Vec<&WikiTarget> = wikis.values().collect();
        write_json(self.storage.as_ref(), &self.key, &list).await
    }
}
