//! Local filesystem blob backend
//!
//! Uploads land in a hidden temp file inside the upload root, are flushed to
//! disk, then renamed onto their final key. Readers therefore only ever see
//! complete files under a key, and a crash mid-write leaves at most a stray
//! `.part` file that never gets a reference.

use super::{BlobStore, StorageError, StorageKey, StorageResult};
use crate::config::LocalStorageConfig;
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

/// Stores attachments as files under a fixed upload root.
#[derive(Debug, Clone)]
pub struct LocalDiskStore {
    root: PathBuf,
    public_prefix: String,
}

impl LocalDiskStore {
    /// Create the store, creating the upload root if it does not exist yet.
    pub async fn new(config: &LocalStorageConfig) -> StorageResult<Self> {
        fs::create_dir_all(&config.root).await?;

        let metadata = fs::metadata(&config.root).await?;
        if !metadata.is_dir() {
            return Err(StorageError::Configuration {
                message: format!("upload root is not a directory: {}", config.root.display()),
            });
        }

        Ok(Self {
            root: config.root.clone(),
            public_prefix: config.normalized_prefix(),
        })
    }

    /// Directory holding stored files
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reference handed out for a key: `<prefix>/<key>`, always with `/`
    fn reference_for(&self, key: &StorageKey) -> String {
        if self.public_prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}/{}", self.public_prefix, key)
        }
    }

    fn key_from_reference(&self, reference: &str) -> StorageResult<StorageKey> {
        let raw = if self.public_prefix.is_empty() {
            Some(reference)
        } else {
            reference
                .strip_prefix(self.public_prefix.as_str())
                .and_then(|rest| rest.strip_prefix('/'))
        };

        raw.and_then(StorageKey::parse)
            .ok_or_else(|| StorageError::ForeignReference {
                reference: reference.to_string(),
            })
    }

    async fn write_then_rename(&self, bytes: &[u8], temp_path: &Path, final_path: &Path) -> std::io::Result<()> {
        let mut file = fs::File::create(temp_path).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(temp_path, final_path).await
    }
}

#[async_trait]
impl BlobStore for LocalDiskStore {
    fn backend(&self) -> &'static str {
        "local"
    }

    fn owns(&self, reference: &str) -> bool {
        self.key_from_reference(reference).is_ok()
    }

    async fn store(&self, bytes: Bytes, _content_type: &str, key: &StorageKey) -> StorageResult<String> {
        let temp_path = self.root.join(format!(".{}.part", Uuid::new_v4().simple()));
        let final_path = self.root.join(key.as_str());

        debug!(key = %key, size = bytes.len(), "local store: write");

        if let Err(e) = self.write_then_rename(&bytes, &temp_path, &final_path).await {
            if let Err(cleanup) = fs::remove_file(&temp_path).await {
                if cleanup.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %temp_path.display(), error = %cleanup, "Failed to remove partial upload");
                }
            }
            return Err(StorageError::Io(e));
        }

        Ok(self.reference_for(key))
    }

    async fn fetch(&self, reference: &str) -> StorageResult<Bytes> {
        let key = self.key_from_reference(reference)?;

        match fs::read(self.root.join(key.as_str())).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound {
                reference: reference.to_string(),
            }),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn remove(&self, reference: &str) -> StorageResult<()> {
        let key = self.key_from_reference(reference)?;

        match fs::remove_file(self.root.join(key.as_str())).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound {
                reference: reference.to_string(),
            }),
            Err(e) => Err(StorageError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store_in(dir: &Path) -> LocalDiskStore {
        LocalDiskStore::new(&LocalStorageConfig {
            root: dir.join("uploads"),
            public_prefix: "uploads".to_string(),
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_store_and_fetch_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path()).await;
        let key = StorageKey::derive("photo.jpg");

        let reference = store
            .store(Bytes::from_static(b"\xff\xd8jpeg-bytes"), "image/jpeg", &key)
            .await
            .unwrap();

        assert_eq!(reference, format!("uploads/{}", key));
        assert!(store.owns(&reference));
        assert_eq!(store.fetch(&reference).await.unwrap().as_ref(), b"\xff\xd8jpeg-bytes");
    }

    #[tokio::test]
    async fn test_no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path()).await;
        let key = StorageKey::derive("a.txt");
        store.store(Bytes::from_static(b"a"), "text/plain", &key).await.unwrap();

        let mut entries = fs::read_dir(store.root()).await.unwrap();
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
        assert_eq!(names, vec![key.to_string()]);
    }

    #[tokio::test]
    async fn test_failed_write_returns_error_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path()).await;

        // A directory squatting on the final path makes the rename fail.
        let key = StorageKey::derive("clash.bin");
        fs::create_dir(store.root().join(key.as_str())).await.unwrap();
        fs::write(store.root().join(key.as_str()).join("child"), b"x").await.unwrap();

        let result = store.store(Bytes::from_static(b"data"), "application/octet-stream", &key).await;
        assert!(result.is_err());

        let mut entries = fs::read_dir(store.root()).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            assert!(!entry.file_name().to_string_lossy().ends_with(".part"));
        }
    }

    #[tokio::test]
    async fn test_foreign_references_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path()).await;

        assert!(!store.owns("https://example.com/uploads/x.jpg"));
        assert!(!store.owns("uploads/../secret"));
        assert!(matches!(
            store.fetch("elsewhere/file.txt").await,
            Err(StorageError::ForeignReference { .. })
        ));
    }

    #[tokio::test]
    async fn test_remove_deletes_blob() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path()).await;
        let key = StorageKey::derive("gone.txt");
        let reference = store.store(Bytes::from_static(b"bye"), "text/plain", &key).await.unwrap();

        store.remove(&reference).await.unwrap();
        assert!(matches!(store.fetch(&reference).await, Err(StorageError::NotFound { .. })));
    }
}
