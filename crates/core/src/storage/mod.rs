//! Durable keyed storage
//!
//! The [`Storage`] trait is the only persistence seam used by the backend and
//! the rotation subsystem. It is strongly consistent per key and offers no
//! cross-key transactions.
//!
//! Paths are `/`-separated. [`Storage::list`] returns the names directly
//! under a prefix; names of nested "directories" end with `/`.

mod file;
mod memory;

pub use file::FileStorage;
pub use memory::MemoryStorage;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{StorageError, StorageResult};

/// Trait for durable keyed storage
#[async_trait]
pub trait Storage: Send + Sync {
    /// Read the entry at `path`, `None` if absent
    async fn get(&self, path: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Create or overwrite the entry at `path`
    async fn put(&self, path: &str, value: &[u8]) -> StorageResult<()>;

    /// Delete the entry at `path`; deleting an absent entry is not an error
    async fn delete(&self, path: &str) -> StorageResult<()>;

    /// List names directly under `prefix`
    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>>;
}

/// JSON helpers on top of [`Storage`]
#[async_trait]
pub trait StorageExt: Storage {
    /// Read and decode a JSON entry
    async fn get_json<T>(&self, path: &str) -> StorageResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        match self.get(path).await? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|source| StorageError::Serialization {
                    path: path.to_string(),
                    source,
                }),
            None => Ok(None),
        }
    }

    /// Encode and write a JSON entry
    async fn put_json<T>(&self, path: &str, value: &T) -> StorageResult<()>
    where
        T: Serialize + Sync,
    {
        let bytes = serde_json::to_vec(value).map_err(|source| StorageError::Serialization {
            path: path.to_string(),
            source,
        })?;
        self.put(path, &bytes).await
    }
}

impl<S: Storage + ?Sized> StorageExt for S {}

/// Reject paths that could escape a storage root
pub(crate) fn validate_path(path: &str) -> StorageResult<()> {
    if path.is_empty() {
        return Err(StorageError::InvalidPath {
            path: path.to_string(),
            reason: "path is empty",
        });
    }
    if path.starts_with('/') || path.ends_with('/') {
        return Err(StorageError::InvalidPath {
            path: path.to_string(),
            reason: "path must not start or end with '/'",
        });
    }
    if path
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        return Err(StorageError::InvalidPath {
            path: path.to_string(),
            reason: "path contains an empty or relative segment",
        });
    }
    Ok(())
}
