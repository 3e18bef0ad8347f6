//! Attachment blob storage
//!
//! Provides:
//! - Storage key derivation from client filenames
//! - A uniform [`BlobStore`] interface over local disk and S3-compatible
//!   object storage
//! - A factory selecting the backend from configuration
//!
//! A store only hands out a reference once the backend has acknowledged the
//! write; failed writes leave nothing behind that a caller could link to.

mod key;
mod local;
mod object;

pub use key::StorageKey;
pub use local::LocalDiskStore;
pub use object::ObjectStore;

use crate::config::{StorageBackendKind, StorageConfig};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::info;

/// Errors raised by blob backends
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage backend error: {message}")]
    Backend { message: String },

    #[error("Blob not found: {reference}")]
    NotFound { reference: String },

    #[error("Reference is not managed by this store: {reference}")]
    ForeignReference { reference: String },

    #[error("Storage configuration error: {message}")]
    Configuration { message: String },
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Durable byte storage for article attachments
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Short backend name used in logs and metrics
    fn backend(&self) -> &'static str;

    /// Whether `reference` was produced by this store
    fn owns(&self, reference: &str) -> bool;

    /// Persist `bytes` under `key` and return the public reference.
    ///
    /// The reference is returned only after the backend acknowledged the
    /// write. On error no reference exists and no partial blob is visible.
    async fn store(&self, bytes: Bytes, content_type: &str, key: &StorageKey) -> StorageResult<String>;

    /// Read back the bytes behind a reference returned by [`BlobStore::store`]
    async fn fetch(&self, reference: &str) -> StorageResult<Bytes>;

    /// Delete the blob behind a reference returned by [`BlobStore::store`]
    async fn remove(&self, reference: &str) -> StorageResult<()>;
}

/// Build the blob store selected by configuration.
pub async fn build_blob_store(config: &StorageConfig) -> StorageResult<Arc<dyn BlobStore>> {
    match config.backend {
        StorageBackendKind::Local => {
            let store = LocalDiskStore::new(&config.local).await?;
            info!(root = %config.local.root.display(), "Using local disk attachment storage");
            Ok(Arc::new(store))
        }
        StorageBackendKind::Object => {
            let store = ObjectStore::new(&config.object).await?;
            info!(bucket = %config.object.bucket, "Using object storage for attachments");
            Ok(Arc::new(store))
        }
    }
}

/// Store a blob and record latency/volume metrics around the call.
pub async fn store_with_metrics(
    store: &dyn BlobStore,
    bytes: Bytes,
    content_type: &str,
    key: &StorageKey,
) -> StorageResult<String> {
    let start = Instant::now();
    let size = bytes.len();
    let result = store.store(bytes, content_type, key).await;

    crate::metrics::record_blob_write(
        store.backend(),
        start.elapsed().as_secs_f64(),
        size,
        result.is_ok(),
    );

    result
}
