//! Filesystem-backed storage rooted at one directory.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use super::StorageProvider;
use crate::error::{Error, Result, StorageError};

/// [`StorageProvider`] writing plain files under `root`
///
/// Writes go to a temporary sibling first and are renamed into place so a
/// crash never leaves a half-written JSON document behind.
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    /// Create a store rooted at `root` (created lazily on first write)
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory of this store
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path for a key; rejects keys escaping the root
    pub fn path_for(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        for component in relative.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => {
                    return Err(Error::Storage(StorageError::Io {
                        key: key.to_string(),
                        reason: "key must be a relative path without '..'".to_string(),
                    }));
                }
            }
        }
        Ok(self.root.join(relative))
    }

    async fn write_atomic(&self, key: &str, data: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(key, e))?;
        }

        let tmp_path = path.with_extension(format!("tmp.{:016x}", rand::random::<u64>()));
        fs::write(&tmp_path, data)
            .await
            .map_err(|e| io_error(key, e))?;
        if let Err(e) = fs::rename(&tmp_path, &path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(io_error(key, e));
        }
        Ok(())
    }
}

fn io_error(key: &str, e: std::io::Error) -> Error {
    match e.kind() {
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::Interrupted => {
            Error::Storage(StorageError::Unavailable(format!("{key}: {e}")))
        }
        _ => Error::Storage(StorageError::Io {
            key: key.to_string(),
            reason: e.to_string(),
        }),
    }
}

#[async_trait]
impl StorageProvider for FsStorage {
    async fn read_text(&self, key: &str) -> Result<Option<String>> {
        let Some(bytes) = self.read_bytes(key).await? else {
            return Ok(None);
        };
        String::from_utf8(bytes).map(Some).map_err(|e| {
            Error::Storage(StorageError::Io {
                key: key.to_string(),
                reason: format!("not UTF-8: {e}"),
            })
        })
    }

    async fn write_text(&self, key: &str, text: &str) -> Result<()> {
        self.write_atomic(key, text.as_bytes()).await
    }

    async fn read_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(key, e)),
        }
    }

    async fn write_bytes(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.write_atomic(key, bytes).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key)?;
        fs::try_exists(&path).await.map_err(|e| io_error(key, e))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(key, e)),
        }
    }

    async fn folder_size(&self, key: &str) -> Result<u64> {
        let mut total = 0u64;
        let mut pending = vec![self.path_for(key)?];

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(io_error(key, e)),
            };
            while let Some(entry) = entries.next_entry().await.map_err(|e| io_error(key, e))? {
                let metadata = entry.metadata().await.map_err(|e| io_error(key, e))?;
                if metadata.is_dir() {
                    pending.push(entry.path());
                } else {
                    total = total.saturating_add(metadata.len());
                }
            }
        }

        Ok(total)
    }

    async fn recreate_folder(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match fs::remove_dir_all(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(io_error(key, e)),
        }
        fs::create_dir_all(&path)
            .await
            .map_err(|e| io_error(key, e))
    }
}
