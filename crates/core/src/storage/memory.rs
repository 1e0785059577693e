//! In-memory storage

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::{Storage, validate_path};
use crate::error::StorageResult;

/// In-memory implementation of [`Storage`]
///
/// Entries live in an ordered map so prefix listing is a range scan. Clones
/// share the same entries, which lets tests keep a handle on the storage a
/// backend was built with.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    entries: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryStorage {
    /// Create a new empty storage
    pub fn new() -> Self {
        Self::default()
    }

    /// Get number of stored entries
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Remove every entry
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

impl std::fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStorage")
            .field("entries", &self.len())
            .finish()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get(&self, path: &str) -> StorageResult<Option<Vec<u8>>> {
        validate_path(path)?;
        Ok(self.entries.read().get(path).cloned())
    }

    async fn put(&self, path: &str, value: &[u8]) -> StorageResult<()> {
        validate_path(path)?;
        self.entries.write().insert(path.to_string(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, path: &str) -> StorageResult<()> {
        validate_path(path)?;
        self.entries.write().remove(path);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let entries = self.entries.read();
        let mut names: Vec<String> = Vec::new();

        for key in entries
            .range(prefix.to_string()..)
            .map(|(k, _)| k)
            .take_while(|k| k.starts_with(prefix))
        {
            let rest = &key[prefix.len()..];
            let name = match rest.find('/') {
                Some(idx) => &rest[..=idx],
                None => rest,
            };
            if names.last().map(String::as_str) != Some(name) {
                names.push(name.to_string());
            }
        }

        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageExt;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_storage_basic() {
        let storage = MemoryStorage::new();
        assert!(storage.is_empty());

        storage.put("config/prod", b"one").await.unwrap();
        assert_eq!(storage.get("config/prod").await.unwrap(), Some(b"one".to_vec()));
        assert_eq!(storage.len(), 1);

        storage.delete("config/prod").await.unwrap();
        assert!(storage.get("config/prod").await.unwrap().is_none());

        // deleting twice is fine
        storage.delete("config/prod").await.unwrap();
    }

    #[tokio::test]
    async fn test_list_returns_direct_children() {
        let storage = MemoryStorage::new();
        storage.put("roles/a", b"1").await.unwrap();
        storage.put("roles/b", b"2").await.unwrap();
        storage.put("roles/nested/c", b"3").await.unwrap();
        storage.put("roles/nested/d", b"4").await.unwrap();
        storage.put("rolesx", b"5").await.unwrap();

        let names = storage.list("roles/").await.unwrap();
        assert_eq!(names, vec!["a", "b", "nested/"]);
        assert!(storage.list("missing/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_json_helpers() {
        let storage = MemoryStorage::new();
        storage
            .put_json("config/x", &json!({"endpoint": "https://h"}))
            .await
            .unwrap();

        let value: Option<serde_json::Value> = storage.get_json("config/x").await.unwrap();
        assert_eq!(value, Some(json!({"endpoint": "https://h"})));

        storage.put("config/bad", b"{not json").await.unwrap();
        let err = storage
            .get_json::<serde_json::Value>("config/bad")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("config/bad"));
    }

    #[tokio::test]
    async fn test_clones_share_entries() {
        let storage = MemoryStorage::new();
        let handle = storage.clone();
        storage.put("k", b"v").await.unwrap();
        assert_eq!(handle.get("k").await.unwrap(), Some(b"v".to_vec()));
    }
}
