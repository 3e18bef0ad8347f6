//! Folio Common Library
//!
//! Shared code for the Folio article backend including:
//! - Database models and repository patterns
//! - Attachment storage (local disk and object store)
//! - The attachment ingest pipeline
//! - Error types and handling
//! - Configuration management
//! - Authentication utilities
//! - Metrics and observability

pub mod auth;
pub mod config;
pub mod db;
pub mod errors;
pub mod ingest;
pub mod metrics;
pub mod storage;

// Re-export commonly used types
pub use config::AppConfig;
pub use db::Repository;
pub use errors::{AppError, Result};
pub use ingest::AttachmentIngestor;
pub use storage::BlobStore;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
