//! Filesystem storage
//!
//! Stores one file per entry under a base directory, mirroring the `/`
//! separated path as nested directories. Writes are atomic: data goes to a
//! temporary file in the same directory which is then renamed over the
//! target, so a crash leaves either the old or the new content.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use super::{Storage, validate_path};
use crate::error::{StorageError, StorageResult};

/// Suffix of in-flight temporary files; never listed
const TEMP_MARKER: &str = ".tmp.";

/// Filesystem implementation of [`Storage`]
#[derive(Debug, Clone)]
pub struct FileStorage {
    base_path: PathBuf,
}

impl FileStorage {
    /// Open (and create if needed) a storage rooted at `base_path`
    pub async fn open(base_path: impl Into<PathBuf>) -> StorageResult<Self> {
        let base_path = base_path.into();
        tokio::fs::create_dir_all(&base_path)
            .await
            .map_err(|source| StorageError::Write {
                path: base_path.display().to_string(),
                source,
            })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o700);
            tokio::fs::set_permissions(&base_path, perms)
                .await
                .map_err(|source| StorageError::Write {
                    path: base_path.display().to_string(),
                    source,
                })?;
        }

        Ok(Self { base_path })
    }

    /// Root directory of this storage
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn file_path(&self, path: &str) -> PathBuf {
        path.split('/')
            .fold(self.base_path.clone(), |acc, segment| acc.join(segment))
    }
}

/// Atomically write data to a file with owner-only permissions
async fn atomic_write(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let temp_path = path.with_file_name(format!(
        "{}{TEMP_MARKER}{}",
        path.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("entry"),
        Uuid::new_v4()
    ));

    tokio::fs::write(&temp_path, data).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&temp_path, perms).await?;
    }

    tokio::fs::rename(&temp_path, path).await
}

#[async_trait]
impl Storage for FileStorage {
    async fn get(&self, path: &str) -> StorageResult<Option<Vec<u8>>> {
        validate_path(path)?;
        match tokio::fs::read(self.file_path(path)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            // a directory at this path means "no entry"
            Err(e) if e.kind() == ErrorKind::IsADirectory => Ok(None),
            Err(source) => Err(StorageError::Read {
                path: path.to_string(),
                source,
            }),
        }
    }

    async fn put(&self, path: &str, value: &[u8]) -> StorageResult<()> {
        validate_path(path)?;
        atomic_write(&self.file_path(path), value)
            .await
            .map_err(|source| StorageError::Write {
                path: path.to_string(),
                source,
            })?;
        tracing::trace!(path, bytes = value.len(), "storage entry written");
        Ok(())
    }

    async fn delete(&self, path: &str) -> StorageResult<()> {
        validate_path(path)?;
        match tokio::fs::remove_file(self.file_path(path)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StorageError::Delete {
                path: path.to_string(),
                source,
            }),
        }
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        // `prefix` is a directory ("roles/") or empty for the root
        let dir = match prefix.trim_end_matches('/') {
            "" => self.base_path.clone(),
            trimmed => {
                validate_path(trimmed)?;
                self.file_path(trimmed)
            }
        };

        let mut read_dir = match tokio::fs::read_dir(&dir).await {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StorageError::Read {
                    path: prefix.to_string(),
                    source,
                });
            }
        };

        let mut names = Vec::new();
        loop {
            let entry = match read_dir.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(source) => {
                    return Err(StorageError::Read {
                        path: prefix.to_string(),
                        source,
                    });
                }
            };
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if name.contains(TEMP_MARKER) {
                continue;
            }
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            names.push(if is_dir { format!("{name}/") } else { name });
        }

        names.sort();
        Ok(names)
    }
}
