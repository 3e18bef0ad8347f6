//! Article attachment ingestion
//!
//! Handles the upload workflow for article writes:
//! 1. Validate the submitted fields
//! 2. Derive a storage key from the client filename
//! 3. Persist the bytes in the blob store
//! 4. Commit the article record pointing at the stored blob
//!
//! A record only ever references a blob the store acknowledged. When the
//! record write fails after a successful upload, the fresh blob is removed
//! again.

use crate::db::models::Article;
use crate::db::{ArticlePatch, NewArticle, Repository};
use crate::errors::{AppError, Result};
use crate::metrics::record_ingest;
use crate::storage::{store_with_metrics, BlobStore, StorageKey};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// An uploaded file as received from the client
#[derive(Debug, Clone)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub bytes: Bytes,
}

/// What the client sent for the `file` field
#[derive(Debug, Clone)]
pub enum FileInput {
    /// Raw bytes that still have to be stored
    Upload(Attachment),
    /// An absolute http(s) URL that is already durable elsewhere
    Link(String),
}

/// Article fields submitted by a create or update request
#[derive(Debug, Clone, Default)]
pub struct ArticleUpload {
    pub title: Option<String>,
    pub summary: Option<String>,
    pub content: Option<String>,
    pub file: Option<FileInput>,
}

/// Where an ingest request ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStage {
    Received,
    ValidationFailed,
    KeyDerived,
    Stored,
    StoreFailed,
    RecordCommitted,
    CommitFailed,
}

impl IngestStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestStage::Received => "received",
            IngestStage::ValidationFailed => "validation_failed",
            IngestStage::KeyDerived => "key_derived",
            IngestStage::Stored => "stored",
            IngestStage::StoreFailed => "store_failed",
            IngestStage::RecordCommitted => "record_committed",
            IngestStage::CommitFailed => "commit_failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            IngestStage::ValidationFailed
                | IngestStage::StoreFailed
                | IngestStage::RecordCommitted
                | IngestStage::CommitFailed
        )
    }
}

/// A file reference ready to be linked into a record
struct PersistedFile {
    reference: String,
    /// Written by this request; must be removed if the commit fails
    fresh: bool,
}

/// Coordinates blob writes with article record writes
#[derive(Clone)]
pub struct AttachmentIngestor {
    repo: Repository,
    store: Arc<dyn BlobStore>,
}

impl AttachmentIngestor {
    pub fn new(repo: Repository, store: Arc<dyn BlobStore>) -> Self {
        Self { repo, store }
    }

    /// Name of the blob backend in use
    pub fn backend(&self) -> &'static str {
        self.store.backend()
    }

    /// Create an article from a complete upload.
    ///
    /// Fails with `MissingField` naming the first absent field before any
    /// blob is written.
    pub async fn create(&self, upload: ArticleUpload) -> Result<Article> {
        const OP: &str = "create";
        let start = Instant::now();
        trace_stage(OP, IngestStage::Received);

        let validated = required_fields(upload).and_then(|fields| {
            self.check_link_target(Some(&fields.3))?;
            Ok(fields)
        });

        let (title, summary, content, file) = match validated {
            Ok(fields) => fields,
            Err(e) => {
                finish(OP, IngestStage::ValidationFailed);
                return Err(e);
            }
        };

        let persisted = self.persist(OP, file).await?;

        let fields = NewArticle {
            title,
            summary,
            content,
            file: persisted.reference.clone(),
        };

        match self.repo.create_article(fields).await {
            Ok(article) => {
                finish(OP, IngestStage::RecordCommitted);
                tracing::info!(
                    article_id = %article.id,
                    file = %article.file,
                    total_ms = start.elapsed().as_millis(),
                    "Article created"
                );
                Ok(article)
            }
            Err(e) => {
                self.compensate(&persisted).await;
                finish(OP, IngestStage::CommitFailed);
                Err(e)
            }
        }
    }

    /// Merge the supplied fields into an existing article.
    ///
    /// Absent fields keep their value; `file` changes only when a new one is
    /// supplied. Unknown ids fail before any blob write.
    pub async fn update(&self, id: Uuid, upload: ArticleUpload) -> Result<Article> {
        const OP: &str = "update";
        let start = Instant::now();
        trace_stage(OP, IngestStage::Received);

        let validated = supplied_fields(upload).and_then(|fields| {
            self.check_link_target(fields.1.as_ref())?;
            Ok(fields)
        });

        let (mut patch, file) = match validated {
            Ok(fields) => fields,
            Err(e) => {
                finish(OP, IngestStage::ValidationFailed);
                return Err(e);
            }
        };

        let existing = self.repo.find_article(id).await?;

        let persisted = match file {
            Some(file) => Some(self.persist(OP, file).await?),
            None => None,
        };
        patch.file = persisted.as_ref().map(|p| p.reference.clone());

        let updated = match self.repo.update_article(id, patch).await {
            Ok(article) => article,
            Err(e) => {
                if let Some(ref persisted) = persisted {
                    self.compensate(persisted).await;
                }
                finish(OP, IngestStage::CommitFailed);
                return Err(e);
            }
        };

        finish(OP, IngestStage::RecordCommitted);

        if persisted.is_some() && existing.file != updated.file {
            self.discard(&existing.file).await;
        }

        tracing::info!(
            article_id = %updated.id,
            file_replaced = persisted.is_some(),
            total_ms = start.elapsed().as_millis(),
            "Article updated"
        );

        Ok(updated)
    }

    /// Delete an article and, best-effort, the blob it referenced
    pub async fn delete(&self, id: Uuid) -> Result<Article> {
        let article = self.repo.delete_article(id).await?;
        self.discard(&article.file).await;

        tracing::info!(article_id = %article.id, "Article deleted");
        Ok(article)
    }

    /// A link may not name a blob this store manages; every owned blob
    /// belongs to exactly one record
    fn check_link_target(&self, file: Option<&FileInput>) -> Result<()> {
        match file {
            Some(FileInput::Link(url)) if self.store.owns(url) => Err(AppError::Validation {
                message: "file links may not point at stored attachments; upload the file instead"
                    .to_string(),
                field: Some("file".to_string()),
            }),
            _ => Ok(()),
        }
    }

    /// Turn a file input into a durable reference
    async fn persist(&self, operation: &'static str, file: FileInput) -> Result<PersistedFile> {
        let attachment = match file {
            FileInput::Link(url) => {
                return Ok(PersistedFile { reference: url, fresh: false });
            }
            FileInput::Upload(attachment) => attachment,
        };

        let key = StorageKey::derive(&attachment.filename);
        tracing::debug!(
            operation,
            stage = IngestStage::KeyDerived.as_str(),
            key = %key,
            original = %attachment.filename,
            size = attachment.bytes.len(),
            "Storage key derived"
        );

        let content_type = if attachment.content_type.is_empty() {
            "application/octet-stream"
        } else {
            attachment.content_type.as_str()
        };

        match store_with_metrics(self.store.as_ref(), attachment.bytes, content_type, &key).await {
            Ok(reference) => {
                tracing::debug!(
                    operation,
                    stage = IngestStage::Stored.as_str(),
                    reference = %reference,
                    "Attachment stored"
                );
                Ok(PersistedFile { reference, fresh: true })
            }
            Err(e) => {
                tracing::error!(
                    operation,
                    backend = self.store.backend(),
                    key = %key,
                    error = %e,
                    "Attachment store failed"
                );
                finish(operation, IngestStage::StoreFailed);
                Err(e.into())
            }
        }
    }

    /// Undo a blob written for a record that was never committed
    async fn compensate(&self, persisted: &PersistedFile) {
        if !persisted.fresh {
            return;
        }

        match self.store.remove(&persisted.reference).await {
            Ok(()) => tracing::warn!(
                reference = %persisted.reference,
                "Record commit failed, stored attachment removed"
            ),
            Err(e) => tracing::error!(
                reference = %persisted.reference,
                error = %e,
                "Record commit failed and the stored attachment could not be removed"
            ),
        }
    }

    /// Remove a blob that is no longer referenced, if this store manages it
    async fn discard(&self, reference: &str) {
        if !self.store.owns(reference) {
            return;
        }

        if let Err(e) = self.store.remove(reference).await {
            tracing::warn!(reference = %reference, error = %e, "Failed to remove unreferenced attachment");
        }
    }
}

fn trace_stage(operation: &'static str, stage: IngestStage) {
    tracing::debug!(operation, stage = stage.as_str(), "Ingest stage");
}

fn finish(operation: &'static str, stage: IngestStage) {
    debug_assert!(stage.is_terminal());
    record_ingest(operation, stage.as_str());
}

/// Check a create request: every text field non-empty, then the file
fn required_fields(upload: ArticleUpload) -> Result<(String, String, String, FileInput)> {
    let title = require("title", upload.title)?;
    let summary = require("summary", upload.summary)?;
    let content = require("content", upload.content)?;
    let file = upload.file.ok_or_else(|| AppError::MissingField {
        field: "file".to_string(),
    })?;
    check_file(&file)?;

    Ok((title, summary, content, file))
}

/// Check an update request: supplied text fields must not be blank
fn supplied_fields(upload: ArticleUpload) -> Result<(ArticlePatch, Option<FileInput>)> {
    let patch = ArticlePatch {
        title: upload.title.map(|v| require("title", Some(v))).transpose()?,
        summary: upload.summary.map(|v| require("summary", Some(v))).transpose()?,
        content: upload.content.map(|v| require("content", Some(v))).transpose()?,
        file: None,
    };

    if let Some(ref file) = upload.file {
        check_file(file)?;
    }

    Ok((patch, upload.file))
}

fn require(field: &str, value: Option<String>) -> Result<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(AppError::MissingField {
            field: field.to_string(),
        }),
    }
}

fn check_file(file: &FileInput) -> Result<()> {
    if let FileInput::Link(url) = file {
        let rest = url
            .strip_prefix("https://")
            .or_else(|| url.strip_prefix("http://"))
            .unwrap_or_default();

        if rest.is_empty() || rest.chars().any(char::is_whitespace) {
            return Err(AppError::Validation {
                message: "file must be an uploaded file or an absolute http(s) URL".to_string(),
                field: Some("file".to_string()),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DatabaseConfig, LocalStorageConfig};
    use crate::db::DbPool;
    use crate::storage::{LocalDiskStore, StorageError, StorageResult};
    use async_trait::async_trait;
    use sea_orm::ConnectionTrait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Store whose writes always fail
    #[derive(Default)]
    struct FailingStore {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl BlobStore for FailingStore {
        fn backend(&self) -> &'static str {
            "failing"
        }

        fn owns(&self, _reference: &str) -> bool {
            true
        }

        async fn store(&self, _bytes: Bytes, _ct: &str, _key: &StorageKey) -> StorageResult<String> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(StorageError::Backend { message: "bucket unreachable".to_string() })
        }

        async fn fetch(&self, reference: &str) -> StorageResult<Bytes> {
            Err(StorageError::NotFound { reference: reference.to_string() })
        }

        async fn remove(&self, _reference: &str) -> StorageResult<()> {
            Ok(())
        }
    }

    struct Fixture {
        _dir: TempDir,
        root: std::path::PathBuf,
        pool: DbPool,
        repo: Repository,
        store: Arc<LocalDiskStore>,
        ingestor: AttachmentIngestor,
    }

    async fn fixture() -> Fixture {
        fixture_with_prefix("uploads").await
    }

    async fn fixture_with_prefix(public_prefix: &str) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("uploads");
        let store = Arc::new(
            LocalDiskStore::new(&LocalStorageConfig {
                root: root.clone(),
                public_prefix: public_prefix.to_string(),
            })
            .await
            .unwrap(),
        );

        let pool = DbPool::new(&DatabaseConfig::in_memory()).await.unwrap();
        pool.ensure_schema().await.unwrap();
        let repo = Repository::new(pool.clone());
        let ingestor = AttachmentIngestor::new(repo.clone(), store.clone());

        Fixture { _dir: dir, root, pool, repo, store, ingestor }
    }

    async fn failing_fixture() -> (Repository, Arc<FailingStore>, AttachmentIngestor) {
        let pool = DbPool::new(&DatabaseConfig::in_memory()).await.unwrap();
        pool.ensure_schema().await.unwrap();
        let repo = Repository::new(pool);
        let store = Arc::new(FailingStore::default());
        let ingestor = AttachmentIngestor::new(repo.clone(), store.clone());
        (repo, store, ingestor)
    }

    fn upload(filename: &str, bytes: &'static [u8]) -> FileInput {
        FileInput::Upload(Attachment {
            filename: filename.to_string(),
            content_type: "image/jpeg".to_string(),
            bytes: Bytes::from_static(bytes),
        })
    }

    fn complete(filename: &str, bytes: &'static [u8]) -> ArticleUpload {
        ArticleUpload {
            title: Some("Hello".to_string()),
            summary: Some("A greeting".to_string()),
            content: Some("Longer greeting".to_string()),
            file: Some(upload(filename, bytes)),
        }
    }

    fn stored_files(root: &std::path::Path) -> Vec<String> {
        std::fs::read_dir(root)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }

    #[tokio::test]
    async fn test_create_stores_bytes_then_record() {
        let fx = fixture().await;
        let article = fx.ingestor.create(complete("photo.jpg", b"\xff\xd8jpeg-bytes")).await.unwrap();

        assert!(article.file.starts_with("uploads/"));
        assert!(article.file.ends_with("-photo.jpg"));

        let bytes = fx.store.fetch(&article.file).await.unwrap();
        assert_eq!(&bytes[..], b"\xff\xd8jpeg-bytes");
        assert_eq!(fx.repo.find_article(article.id).await.unwrap(), article);
    }

    #[tokio::test]
    async fn test_same_filename_twice_gets_distinct_blobs() {
        let fx = fixture().await;
        let a = fx.ingestor.create(complete("photo.jpg", b"one")).await.unwrap();
        let b = fx.ingestor.create(complete("photo.jpg", b"two")).await.unwrap();

        assert_ne!(a.file, b.file);
        assert_eq!(&fx.store.fetch(&a.file).await.unwrap()[..], b"one");
        assert_eq!(&fx.store.fetch(&b.file).await.unwrap()[..], b"two");
    }

    #[tokio::test]
    async fn test_create_missing_field_makes_no_store_call() {
        let (repo, store, ingestor) = failing_fixture().await;

        let mut missing_summary = complete("photo.jpg", b"x");
        missing_summary.summary = None;
        let err = ingestor.create(missing_summary).await.unwrap_err();
        assert!(matches!(err, AppError::MissingField { ref field } if field == "summary"));

        let mut blank_title = complete("photo.jpg", b"x");
        blank_title.title = Some("   ".to_string());
        let err = ingestor.create(blank_title).await.unwrap_err();
        assert!(matches!(err, AppError::MissingField { ref field } if field == "title"));

        let mut no_file = complete("photo.jpg", b"x");
        no_file.file = None;
        let err = ingestor.create(no_file).await.unwrap_err();
        assert!(matches!(err, AppError::MissingField { ref field } if field == "file"));

        assert_eq!(store.attempts.load(Ordering::SeqCst), 0);
        assert!(repo.list_articles().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_creates_no_record() {
        let (repo, store, ingestor) = failing_fixture().await;

        let err = ingestor.create(complete("photo.jpg", b"x")).await.unwrap_err();
        assert!(matches!(err, AppError::Storage(_)));
        assert_eq!(store.attempts.load(Ordering::SeqCst), 1);
        assert!(repo.list_articles().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_commit_failure_removes_stored_blob() {
        let fx = fixture().await;
        fx.pool
            .write()
            .execute_unprepared("DROP TABLE articles")
            .await
            .unwrap();

        let err = fx.ingestor.create(complete("photo.jpg", b"x")).await.unwrap_err();
        assert!(matches!(err, AppError::Database(_)));
        assert!(stored_files(&fx.root).is_empty());
    }

    #[tokio::test]
    async fn test_link_is_accepted_without_store_call() {
        let (repo, store, ingestor) = failing_fixture().await;
        let mut linked = complete("unused", b"");
        linked.file = Some(FileInput::Link("https://cdn.example.com/a.png".to_string()));

        let article = ingestor.create(linked).await.unwrap();
        assert_eq!(article.file, "https://cdn.example.com/a.png");
        assert_eq!(store.attempts.load(Ordering::SeqCst), 0);
        assert_eq!(repo.list_articles().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_link_must_be_absolute_url() {
        let (_repo, _store, ingestor) = failing_fixture().await;
        let mut linked = complete("unused", b"");
        linked.file = Some(FileInput::Link("not a url".to_string()));

        let err = ingestor.create(linked).await.unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_link_to_stored_attachment_rejected() {
        let fx = fixture_with_prefix("https://cdn.example.com/uploads").await;
        let owner = fx.ingestor.create(complete("photo.jpg", b"owned")).await.unwrap();
        assert!(owner.file.starts_with("https://cdn.example.com/uploads/"));

        let mut borrowing = complete("unused", b"");
        borrowing.file = Some(FileInput::Link(owner.file.clone()));
        let err = fx.ingestor.create(borrowing).await.unwrap_err();
        assert!(matches!(err, AppError::Validation { field: Some(ref f), .. } if f == "file"));

        let other = fx
            .ingestor
            .create(ArticleUpload {
                file: Some(FileInput::Link("https://elsewhere.example.com/a.png".to_string())),
                ..complete("unused", b"")
            })
            .await
            .unwrap();
        let err = fx
            .ingestor
            .update(other.id, ArticleUpload {
                file: Some(FileInput::Link(owner.file.clone())),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));

        // Deleting the other record leaves the owner's blob in place
        fx.ingestor.delete(other.id).await.unwrap();
        assert_eq!(&fx.store.fetch(&owner.file).await.unwrap()[..], b"owned");
        assert_eq!(fx.repo.list_articles().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_without_file_keeps_reference() {
        let fx = fixture().await;
        let created = fx.ingestor.create(complete("photo.jpg", b"x")).await.unwrap();

        let updated = fx
            .ingestor
            .update(created.id, ArticleUpload {
                title: Some("Renamed".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(updated.title, "Renamed");
        assert_eq!(updated.summary, created.summary);
        assert_eq!(updated.file, created.file);
        assert!(updated.updated_at >= created.updated_at);
    }

    #[tokio::test]
    async fn test_update_replaces_file_and_drops_old_blob() {
        let fx = fixture().await;
        let created = fx.ingestor.create(complete("old.jpg", b"old")).await.unwrap();

        let updated = fx
            .ingestor
            .update(created.id, ArticleUpload {
                file: Some(upload("new.jpg", b"new")),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_ne!(updated.file, created.file);
        assert!(updated.file.ends_with("-new.jpg"));
        assert_eq!(&fx.store.fetch(&updated.file).await.unwrap()[..], b"new");
        assert!(matches!(
            fx.store.fetch(&created.file).await,
            Err(StorageError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_update_unknown_id_writes_nothing() {
        let (_repo, store, ingestor) = failing_fixture().await;

        let err = ingestor
            .update(Uuid::new_v4(), ArticleUpload {
                file: Some(upload("photo.jpg", b"x")),
                ..Default::default()
            })
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::ArticleNotFound { .. }));
        assert_eq!(store.attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_update_store_failure_leaves_record_untouched() {
        let (repo, _store, ingestor) = failing_fixture().await;
        let original = repo
            .create_article(NewArticle {
                title: "t".to_string(),
                summary: "s".to_string(),
                content: "c".to_string(),
                file: "https://cdn.example.com/a.png".to_string(),
            })
            .await
            .unwrap();

        let err = ingestor
            .update(original.id, ArticleUpload {
                title: Some("changed".to_string()),
                file: Some(upload("photo.jpg", b"x")),
                ..Default::default()
            })
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Storage(_)));
        assert_eq!(repo.find_article(original.id).await.unwrap(), original);
    }

    #[tokio::test]
    async fn test_update_blank_field_rejected() {
        let fx = fixture().await;
        let created = fx.ingestor.create(complete("photo.jpg", b"x")).await.unwrap();

        let err = fx
            .ingestor
            .update(created.id, ArticleUpload {
                content: Some(String::new()),
                ..Default::default()
            })
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::MissingField { ref field } if field == "content"));
        assert_eq!(fx.repo.find_article(created.id).await.unwrap(), created);
    }

    #[tokio::test]
    async fn test_delete_removes_record_and_blob() {
        let fx = fixture().await;
        let created = fx.ingestor.create(complete("photo.jpg", b"x")).await.unwrap();

        let deleted = fx.ingestor.delete(created.id).await.unwrap();
        assert_eq!(deleted.id, created.id);
        assert!(stored_files(&fx.root).is_empty());
        assert!(matches!(
            fx.ingestor.delete(created.id).await,
            Err(AppError::ArticleNotFound { .. })
        ));
    }

    #[test]
    fn test_terminal_stages() {
        assert!(!IngestStage::Received.is_terminal());
        assert!(!IngestStage::Stored.is_terminal());
        assert!(IngestStage::CommitFailed.is_terminal());
        assert_eq!(IngestStage::StoreFailed.as_str(), "store_failed");
    }
}
