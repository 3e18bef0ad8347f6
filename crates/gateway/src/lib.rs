//! Folio API Gateway
//!
//! HTTP surface of the article backend.
//! Handles:
//! - Session login, verification and logout
//! - Article CRUD with multipart attachment uploads
//! - Serving locally stored attachments
//! - Observability (logging, metrics, request ids)

pub mod handlers;
pub mod middleware;

use axum::{
    extract::{DefaultBodyLimit, FromRef},
    http::{header, HeaderValue, Method},
    middleware::from_fn,
    routing::{get, post},
    Router,
};
use folio_common::{
    auth::JwtManager,
    config::{AppConfig, StorageBackendKind},
    db::DbPool,
    errors::{AppError, Result},
    AttachmentIngestor, BlobStore, Repository,
};
use std::future::{Future, IntoFuture};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    services::ServeDir,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DbPool,
    pub repo: Repository,
    pub ingestor: AttachmentIngestor,
    pub jwt: Arc<JwtManager>,
}

impl AppState {
    /// Wire the shared services together
    pub fn new(config: AppConfig, db: DbPool, store: Arc<dyn BlobStore>) -> Result<Self> {
        let secret = match config.auth.jwt_secret.clone() {
            Some(secret) if !secret.is_empty() => secret,
            _ if config.environment.eq_ignore_ascii_case("development") => {
                warn!("auth.jwt_secret not set, using a random secret; sessions end on restart");
                random_secret()
            }
            _ => {
                return Err(AppError::Configuration {
                    message: "auth.jwt_secret is required outside development".to_string(),
                })
            }
        };

        let jwt = Arc::new(JwtManager::new(&secret, config.auth.jwt_expiration_secs));
        let repo = Repository::new(db.clone());
        let ingestor = AttachmentIngestor::new(repo.clone(), store);

        Ok(Self {
            config: Arc::new(config),
            db,
            repo,
            ingestor,
            jwt,
        })
    }
}

impl FromRef<AppState> for Arc<JwtManager> {
    fn from_ref(state: &AppState) -> Self {
        state.jwt.clone()
    }
}

fn random_secret() -> String {
    (0..4).map(|_| uuid::Uuid::new_v4().simple().to_string()).collect()
}

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    let config = state.config.clone();

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let api_routes = Router::new()
        // Health endpoints
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))

        // Session endpoints
        .route("/login", post(handlers::auth::login))
        .route("/verify-token", get(handlers::auth::verify_token))
        .route("/logout", post(handlers::auth::logout))
        .route("/users", get(handlers::auth::list_users))

        // Article endpoints
        .route(
            "/articles",
            get(handlers::articles::list_articles).post(handlers::articles::create_article),
        )
        .route(
            "/articles/{id}",
            get(handlers::articles::get_article)
                .put(handlers::articles::update_article)
                .delete(handlers::articles::delete_article),
        )
        .route_layer(from_fn(middleware::metrics::track_metrics));

    let mut app = api_routes;

    // Relative local references are served under the same prefix; absolute
    // URL prefixes are fronted by something else
    if config.storage.backend == StorageBackendKind::Local {
        let prefix = config.storage.local.normalized_prefix();
        if !prefix.is_empty() && !prefix.contains("://") {
            app = app.nest_service(&format!("/{}", prefix), ServeDir::new(&config.storage.local.root));
        }
    }

    app.layer(DefaultBodyLimit::max(config.server.max_upload_bytes))
        .layer(TimeoutLayer::new(config.request_timeout()))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&config.server.cors_origins))
        .layer(propagate_id)
        .layer(request_id)
        .with_state(state)
}

/// Serve until `shutdown` resolves, then give in-flight requests at most
/// `drain_timeout` to finish.
pub async fn serve<F>(
    listener: TcpListener,
    app: Router,
    shutdown: F,
    drain_timeout: Duration,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let (draining_tx, draining_rx) = oneshot::channel::<()>();

    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.await;
            let _ = draining_tx.send(());
        })
        .into_future();

    let deadline = async move {
        match draining_rx.await {
            Ok(()) => tokio::time::sleep(drain_timeout).await,
            Err(_) => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        result = server => result,
        _ = deadline => {
            warn!(timeout_secs = drain_timeout.as_secs(), "Shutdown drain timed out, dropping open connections");
            Ok(())
        }
    }
}

/// Credentialed CORS for the configured frontend origins
fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    info!(count = origins.len(), "CORS origins configured");

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}
