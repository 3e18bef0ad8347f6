//! S3-compatible object storage backend
//!
//! Works against AWS S3 and any provider exposing the S3 API (GCS
//! interoperability, MinIO, R2). Credentials come from the standard AWS
//! environment (`AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`, profiles).
//!
//! Public references follow `https://<public_host>/<bucket>/<key>`.

use super::{BlobStore, StorageError, StorageKey, StorageResult};
use crate::config::ObjectStorageConfig;
use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use aws_types::region::Region;
use bytes::Bytes;
use tracing::debug;

/// Bucket-scoped object store client
pub struct ObjectStore {
    client: S3Client,
    bucket: String,
    url_prefix: String,
}

impl ObjectStore {
    /// Create a client from configuration and the ambient AWS credentials
    pub async fn new(config: &ObjectStorageConfig) -> StorageResult<Self> {
        if config.bucket.is_empty() {
            return Err(StorageError::Configuration {
                message: "object storage bucket is not configured".to_string(),
            });
        }

        let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .load()
            .await;

        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.force_path_style);
        if let Some(endpoint) = &config.endpoint_url {
            builder = builder.endpoint_url(endpoint);
        }

        Ok(Self::with_client(S3Client::from_conf(builder.build()), config))
    }

    /// Create with an existing S3 client
    pub fn with_client(client: S3Client, config: &ObjectStorageConfig) -> Self {
        Self {
            client,
            bucket: config.bucket.clone(),
            url_prefix: public_url_prefix(&config.public_host, &config.bucket),
        }
    }

    fn public_url(&self, key: &StorageKey) -> String {
        format!("{}{}", self.url_prefix, key)
    }

    fn key_from_reference(&self, reference: &str) -> StorageResult<StorageKey> {
        reference
            .strip_prefix(self.url_prefix.as_str())
            .and_then(StorageKey::parse)
            .ok_or_else(|| StorageError::ForeignReference {
                reference: reference.to_string(),
            })
    }
}

#[async_trait]
impl BlobStore for ObjectStore {
    fn backend(&self) -> &'static str {
        "object"
    }

    fn owns(&self, reference: &str) -> bool {
        self.key_from_reference(reference).is_ok()
    }

    async fn store(&self, bytes: Bytes, content_type: &str, key: &StorageKey) -> StorageResult<String> {
        debug!(bucket = %self.bucket, key = %key, size = bytes.len(), "object store: put");

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key.as_str())
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| StorageError::Backend {
                message: format!("put_object failed for {}: {}", key, e),
            })?;

        Ok(self.public_url(key))
    }

    async fn fetch(&self, reference: &str) -> StorageResult<Bytes> {
        let key = self.key_from_reference(reference)?;

        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key.as_str())
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().map(|se| se.is_no_such_key()).unwrap_or(false) {
                    StorageError::NotFound {
                        reference: reference.to_string(),
                    }
                } else {
                    StorageError::Backend {
                        message: format!("get_object failed for {}: {}", key, e),
                    }
                }
            })?;

        let data = output.body.collect().await.map_err(|e| StorageError::Backend {
            message: format!("reading object {} failed: {}", key, e),
        })?;

        Ok(data.into_bytes())
    }

    async fn remove(&self, reference: &str) -> StorageResult<()> {
        let key = self.key_from_reference(reference)?;

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key.as_str())
            .send()
            .await
            .map_err(|e| StorageError::Backend {
                message: format!("delete_object failed for {}: {}", key, e),
            })?;

        Ok(())
    }
}

/// `https://<host>/<bucket>/`; an explicit scheme on the host is kept
fn public_url_prefix(public_host: &str, bucket: &str) -> String {
    let host = public_host.trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        format!("{}/{}/", host, bucket)
    } else {
        format!("https://{}/{}/", host, bucket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offline_store(public_host: &str) -> ObjectStore {
        let conf = aws_sdk_s3::Config::builder()
            .behavior_version(aws_sdk_s3::config::BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .build();
        ObjectStore::with_client(
            S3Client::from_conf(conf),
            &ObjectStorageConfig {
                bucket: "ines-web".to_string(),
                public_host: public_host.to_string(),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_public_url_shape() {
        let store = offline_store("storage.googleapis.com");
        let key = StorageKey::derive("cover.png");
        assert_eq!(
            store.public_url(&key),
            format!("https://storage.googleapis.com/ines-web/{}", key)
        );
    }

    #[test]
    fn test_public_host_with_scheme() {
        assert_eq!(
            public_url_prefix("http://localhost:9000/", "bucket"),
            "http://localhost:9000/bucket/"
        );
    }

    #[test]
    fn test_owns_only_its_bucket() {
        let store = offline_store("storage.googleapis.com");
        let key = StorageKey::derive("cover.png");
        assert!(store.owns(&store.public_url(&key)));
        assert!(!store.owns(&format!("https://storage.googleapis.com/other/{}", key)));
        assert!(!store.owns("uploads/cover.png"));
    }

    #[tokio::test]
    async fn test_new_requires_bucket() {
        let result = ObjectStore::new(&ObjectStorageConfig::default()).await;
        assert!(matches!(result, Err(StorageError::Configuration { .. })));
    }
}
