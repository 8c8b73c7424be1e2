//! Storage provider abstraction
//!
//! Every persisted artefact (article entries, media files, the media map, the
//! download queue, the wiki registry) goes through [`StorageProvider`]. Keys
//! are `/`-separated relative paths.
//!
//! Two implementations ship with the crate:
//! - [`FsStorage`] - files under a root directory
//! - [`MemoryStorage`] - a map in memory, for tests and ephemeral clients

mod fs;
mod memory;

pub use fs::FsStorage;
pub use memory::MemoryStorage;

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Byte/text store addressed by relative keys
///
/// All calls may fail with [`crate::error::StorageError`]; callers in this
/// crate treat such failures as "no cache available".
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Read a UTF-8 value, `None` when the key does not exist
    async fn read_text(&self, key: &str) -> Result<Option<String>>;

    /// Write a UTF-8 value, creating parent folders as needed
    async fn write_text(&self, key: &str, text: &str) -> Result<()>;

    /// Read raw bytes, `None` when the key does not exist
    async fn read_bytes(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Write raw bytes, creating parent folders as needed
    async fn write_bytes(&self, key: &str, bytes: &[u8]) -> Result<()>;

    /// Whether a value exists under the key
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Remove a value; removing a missing key succeeds
    async fn delete(&self, key: &str) -> Result<()>;

    /// Total size in bytes of every value under the folder key
    async fn folder_size(&self, key: &str) -> Result<u64>;

    /// Drop everything under the folder key and leave an empty folder
    async fn recreate_folder(&self, key: &str) -> Result<()>;
}

/// Read and deserialize a JSON value
pub async fn read_json<T: DeserializeOwned>(
    storage: &dyn StorageProvider,
    key: &str,
) -> Result<Option<T>> {
    let Some(text) = storage.read_text(key).await? else {
        return Ok(None);
    };
    let value =
        serde_json::from_str(&text).map_err(|e| Error::Serialization(format!("{key}: {e}")))?;
    Ok(Some(value))
}

/// Serialize and write a JSON value
pub async fn write_json<T: Serialize + ?Sized>(
    storage: &dyn StorageProvider,
    key: &str,
    value: &T,
) -> Result<()> {
    let text =
        serde_json::to_string(value).map_err(|e| Error::Serialization(format!("{key}: {e}")))?;
    storage.write_text(key, &text).await
}
