//! In-memory [`StorageProvider`] for tests and throwaway clients.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;

use super::StorageProvider;
use crate::error::{Error, Result, StorageError};

/// Map-backed store; folders are implied by key prefixes
///
/// Counts writes so tests can assert on write amplification.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
    writes: AtomicUsize,
    writes_by_key: Mutex<HashMap<String, usize>>,
    read_only: AtomicBool,
}

impl MemoryStorage {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful write calls so far
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of write calls that targeted `key`
    pub fn writes_to(&self, key: &str) -> usize {
        self.writes_by_key
            .lock()
            .map(|counts| counts.get(key).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Make every write fail as if the backing store were unreachable
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    /// Keys currently stored, in order
    pub fn keys(&self) -> Vec<String> {
        self.entries
            .read()
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn poisoned() -> Error {
        Error::Storage(StorageError::Unavailable(
            "memory storage lock poisoned".to_string(),
        ))
    }

    fn folder_prefix(key: &str) -> String {
        let trimmed = key.trim_end_matches('/');
        if trimmed.is_empty() {
            String::new()
        } else {
            format!("{trimmed}/")
        }
    }

    fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        if self.read_only.load(Ordering::SeqCst) {
            return Err(Error::Storage(StorageError::Unavailable(format!(
                "{key}: storage is read-only"
            ))));
        }
        let mut entries = self.entries.write().map_err(|_| Self::poisoned())?;
        entries.insert(key.to_string(), bytes);
        self.writes.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut counts) = self.writes_by_key.lock() {
            *counts.entry(key.to_string()).or_insert(0) += 1;
        }
        Ok(())
    }
}

#[async_trait]
impl StorageProvider for MemoryStorage {
    async fn read_text(&self, key: &str) -> Result<Option<String>> {
        match self.read_bytes(key).await? {
            Some(bytes) => String::from_utf8(bytes).map(Some).map_err(|e| {
                Error::Storage(StorageError::Io {
                    key: key.to_string(),
                    reason: format!("not UTF-8: {e}"),
                })
            }),
            None => Ok(None),
        }
    }

    async fn write_text(&self, key: &str, text: &str) -> Result<()> {
        self.put(key, text.as_bytes().to_vec())
    }

    async fn read_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let entries = self.entries.read().map_err(|_| Self::poisoned())?;
        Ok(entries.get(key).cloned())
    }

    async fn write_bytes(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.put(key, bytes.to_vec())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let entries = self.entries.read().map_err(|_| Self::poisoned())?;
        Ok(entries.contains_key(key))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.write().map_err(|_| Self::poisoned())?;
        entries.remove(key);
        Ok(())
    }

    async fn folder_size(&self, key: &str) -> Result<u64> {
        let prefix = Self::folder_prefix(key);
        let entries = self.entries.read().map_err(|_| Self::poisoned())?;
        Ok(entries
            .iter()
            .filter(|(k, _)| k.starts_with(&prefix))
            .map(|(_, v)| v.len() as u64)
            .sum())
    }

    async fn recreate_folder(&self, key: &str) -> Result<()> {
        let prefix = Self::folder_prefix(key);
        let mut entries = self.entries.write().map_err(|_| Self::poisoned())?;
        entries.retain(|k, _| !k.starts_with(&prefix));
        Ok(())
    }
}
