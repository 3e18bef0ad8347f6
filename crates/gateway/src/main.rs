//! Folio API Gateway binary
//!
//! Loads configuration, prepares the database and attachment store, then
//! serves the HTTP API until Ctrl+C or SIGTERM.

use folio_common::{
    auth::ensure_user,
    config::AppConfig,
    db::DbPool,
    metrics::{self, LATENCY_BUCKETS},
    storage::build_blob_store,
};
use folio_gateway::{create_router, serve, AppState};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = AppConfig::load()?;

    init_tracing(&config);

    info!(
        version = folio_common::VERSION,
        environment = %config.environment,
        "Starting Folio API Gateway"
    );

    // Initialize metrics
    init_metrics(config.observability.metrics_port)?;
    metrics::register_metrics();

    // Initialize database connection
    let db = DbPool::new(&config.database).await?;
    db.ensure_schema().await?;

    let store = build_blob_store(&config.storage).await?;

    let state = AppState::new(config, db.clone(), store)?;

    if let (Some(username), Some(password)) = (
        state.config.auth.admin_username.as_deref(),
        state.config.auth.admin_password.as_deref(),
    ) {
        ensure_user(&state.repo, username, password).await?;
    }

    let addr: SocketAddr = format!("{}:{}", state.config.server.host, state.config.server.port).parse()?;
    let drain_timeout = state.config.shutdown_timeout();
    let app = create_router(state);

    info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    serve(listener, app, shutdown_signal(), drain_timeout).await?;

    db.close().await?;
    info!("Server shutdown complete");
    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if config.observability.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn init_metrics(port: u16) -> anyhow::Result<()> {
    if port == 0 {
        info!("Metrics exporter disabled");
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(SocketAddr::from(([0, 0, 0, 0], port)))
        .set_buckets_for_metric(Matcher::Suffix("duration_seconds".to_string()), LATENCY_BUCKETS)?
        .install()?;

    info!(port, "Metrics exporter listening");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
