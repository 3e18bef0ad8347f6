//! Configuration management for Folio services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default, config/{APP_ENV}, config/local)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use cookie::SameSite;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Deployment environment name (development, production, ...)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Attachment storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Authentication configuration
    #[serde(default)]
    pub auth: AuthConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Shutdown timeout in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// Origins allowed to make credentialed cross-origin requests
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,

    /// Largest accepted request body (multipart uploads included)
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Primary database URL (for writes)
    pub url: String,

    /// Read replica URL (optional, falls back to primary)
    pub read_url: Option<String>,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

impl DatabaseConfig {
    /// Private in-memory SQLite database; a single pooled connection keeps
    /// every query on the same database.
    pub fn in_memory() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            read_url: None,
            max_connections: 1,
            min_connections: 1,
            connect_timeout_secs: default_connect_timeout(),
            idle_timeout_secs: default_idle_timeout(),
        }
    }
}

/// Which blob backend stores article attachments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackendKind {
    Local,
    Object,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_backend")]
    pub backend: StorageBackendKind,

    #[serde(default)]
    pub local: LocalStorageConfig,

    #[serde(default)]
    pub object: ObjectStorageConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LocalStorageConfig {
    /// Directory receiving uploaded files
    #[serde(default = "default_upload_root")]
    pub root: PathBuf,

    /// Prefix of the references handed out (and the URL path they are served under)
    #[serde(default = "default_public_prefix")]
    pub public_prefix: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObjectStorageConfig {
    /// Bucket receiving uploaded files
    #[serde(default)]
    pub bucket: String,

    /// Region of the bucket
    #[serde(default = "default_object_region")]
    pub region: String,

    /// Custom endpoint for S3-compatible providers
    pub endpoint_url: Option<String>,

    /// Host used to build public object URLs
    #[serde(default = "default_public_host")]
    pub public_host: String,

    /// Use path-style addressing (required by most S3-compatible providers)
    #[serde(default = "default_force_path_style")]
    pub force_path_style: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    /// JWT secret for token signing
    pub jwt_secret: Option<String>,

    /// JWT expiration in seconds
    #[serde(default = "default_jwt_expiration")]
    pub jwt_expiration_secs: u64,

    /// Session cookie policy; defaults follow the deployment environment
    #[serde(default)]
    pub cookie: CookieOverrides,

    /// Username of the account created at startup when missing
    pub admin_username: Option<String>,

    /// Password of the account created at startup when missing
    pub admin_password: Option<String>,
}

/// Optional overrides of the per-environment cookie policy
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CookieOverrides {
    pub secure: Option<bool>,
    pub same_site: Option<SameSitePolicy>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SameSitePolicy {
    Strict,
    Lax,
    None,
}

impl From<SameSitePolicy> for SameSite {
    fn from(policy: SameSitePolicy) -> Self {
        match policy {
            SameSitePolicy::Strict => SameSite::Strict,
            SameSitePolicy::Lax => SameSite::Lax,
            SameSitePolicy::None => SameSite::None,
        }
    }
}

/// Resolved attributes of the session cookie
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CookiePolicy {
    pub secure: bool,
    pub same_site: SameSitePolicy,
}

impl CookiePolicy {
    /// Local development keeps the cookie first-party; hosted deployments
    /// serve a cross-origin frontend and need `SameSite=None; Secure`.
    pub fn for_environment(environment: &str) -> Self {
        if environment.eq_ignore_ascii_case("development") {
            Self { secure: false, same_site: SameSitePolicy::Strict }
        } else {
            Self { secure: true, same_site: SameSitePolicy::None }
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log filter (debug, info, warn, error or an EnvFilter directive)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

// Default value functions
fn default_environment() -> String { "development".to_string() }
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 5000 }
fn default_request_timeout() -> u64 { 30 }
fn default_shutdown_timeout() -> u64 { 30 }
fn default_cors_origins() -> Vec<String> { vec!["http://localhost:5173".to_string()] }
fn default_max_upload_bytes() -> usize { 20 * 1024 * 1024 }
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 1 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_storage_backend() -> StorageBackendKind { StorageBackendKind::Local }
fn default_upload_root() -> PathBuf { PathBuf::from("uploads") }
fn default_public_prefix() -> String { "uploads".to_string() }
fn default_object_region() -> String { "auto".to_string() }
fn default_public_host() -> String { "storage.googleapis.com".to_string() }
fn default_force_path_style() -> bool { true }
fn default_jwt_expiration() -> u64 { 3600 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            cors_origins: default_cors_origins(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            local: LocalStorageConfig::default(),
            object: ObjectStorageConfig::default(),
        }
    }
}

impl LocalStorageConfig {
    /// Prefix as it appears in references and URL paths: forward slashes,
    /// no leading `./` or `/`, no trailing separator
    pub fn normalized_prefix(&self) -> String {
        let normalized = self.public_prefix.replace('\\', "/");
        let normalized = normalized.trim_start_matches("./");
        normalized.trim_matches('/').to_string()
    }
}

impl Default for LocalStorageConfig {
    fn default() -> Self {
        Self {
            root: default_upload_root(),
            public_prefix: default_public_prefix(),
        }
    }
}

impl Default for ObjectStorageConfig {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            region: default_object_region(),
            endpoint_url: None,
            public_host: default_public_host(),
            force_path_style: default_force_path_style(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            jwt_expiration_secs: default_jwt_expiration(),
            cookie: CookieOverrides::default(),
            admin_username: None,
            admin_password: None,
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| default_environment());

        let config = Config::builder()
            .set_default("environment", env.clone())?
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // e.g., APP__SERVER__PORT=5001
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("server.cors_origins")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject combinations that would fail at runtime
    pub fn validate(&self) -> Result<(), ConfigError> {
        let policy = self.cookie_policy();
        if policy.same_site == SameSitePolicy::None && !policy.secure {
            return Err(ConfigError::Message(
                "auth.cookie: SameSite=None requires secure cookies".to_string(),
            ));
        }

        if self.storage.backend == StorageBackendKind::Object && self.storage.object.bucket.is_empty() {
            return Err(ConfigError::Message(
                "storage.object.bucket is required for the object backend".to_string(),
            ));
        }

        Ok(())
    }

    /// Session cookie policy: environment defaults with explicit overrides applied
    pub fn cookie_policy(&self) -> CookiePolicy {
        let base = CookiePolicy::for_environment(&self.environment);
        CookiePolicy {
            secure: self.auth.cookie.secure.unwrap_or(base.secure),
            same_site: self.auth.cookie.same_site.unwrap_or(base.same_site),
        }
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            server: ServerConfig::default(),
            database: DatabaseConfig {
                url: "sqlite://folio.db?mode=rwc".to_string(),
                read_url: None,
                max_connections: default_max_connections(),
                min_connections: default_min_connections(),
                connect_timeout_secs: default_connect_timeout(),
                idle_timeout_secs: default_idle_timeout(),
            },
            storage: StorageConfig::default(),
            auth: AuthConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.auth.jwt_expiration_secs, 3600);
        assert_eq!(config.storage.backend, StorageBackendKind::Local);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_timeouts() {
        let config = AppConfig::default();
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_public_prefix_normalization() {
        let prefix = |raw: &str| LocalStorageConfig {
            public_prefix: raw.to_string(),
            ..Default::default()
        }
        .normalized_prefix();

        assert_eq!(prefix("uploads/"), "uploads");
        assert_eq!(prefix(".\\data\\uploads\\"), "data/uploads");
        assert_eq!(prefix("./uploads"), "uploads");
        assert_eq!(prefix("/uploads/"), "uploads");
    }

    #[test]
    fn test_cookie_policy_follows_environment() {
        let dev = CookiePolicy::for_environment("development");
        assert!(!dev.secure);
        assert_eq!(dev.same_site, SameSitePolicy::Strict);

        let hosted = CookiePolicy::for_environment("production");
        assert!(hosted.secure);
        assert_eq!(hosted.same_site, SameSitePolicy::None);
    }

    #[test]
    fn test_cookie_overrides_win() {
        let mut config = AppConfig::default();
        config.auth.cookie.same_site = Some(SameSitePolicy::Lax);
        assert_eq!(config.cookie_policy().same_site, SameSitePolicy::Lax);
        assert!(!config.cookie_policy().secure);
    }

    #[test]
    fn test_insecure_cross_site_cookie_rejected() {
        let mut config = AppConfig::default();
        config.auth.cookie.same_site = Some(SameSitePolicy::None);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_object_backend_requires_bucket() {
        let mut config = AppConfig::default();
        config.storage.backend = StorageBackendKind::Object;
        assert!(config.validate().is_err());

        config.storage.object.bucket = "articles".to_string();
        assert!(config.validate().is_ok());
    }
}
