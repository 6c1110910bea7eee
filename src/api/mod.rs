//! API layer - HTTP handlers and routing
//!
//! This module contains the HTTP API of the Verbatims data pipeline.
//! It includes:
//! - Import endpoints (submit, progress, cancel, history, report)
//! - Export endpoints
//! - Backup endpoints (snapshot, download, delete, rollback)
//! - Health check

pub mod backups;
pub mod common;
pub mod export;
pub mod import;
pub mod middleware;
pub mod progress;

use axum::{
    extract::{DefaultBodyLimit, State},
    http::{header, HeaderValue, Method},
    middleware as axum_middleware,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::db::repositories::{
    SqlxBackupFileRepository, SqlxExportLogRepository, SqlxImportLogRepository,
    SqlxSnapshotRepository,
};
use crate::db::DynDatabasePool;
use crate::services::importers::ImportRepositories;
use crate::services::{
    BackupService, BackupSettings, ExportService, ImportService, ImportSettings, LocalBlobStore,
    ProgressStore,
};

pub use middleware::{ApiError, AppState};

/// Wire every service from configuration
pub fn build_state(pool: DynDatabasePool, config: &Config) -> AppState {
    let progress = ProgressStore::new(Duration::from_millis(config.import.progress_interval_ms));

    let backup_service = Arc::new(BackupService::new(
        SqlxBackupFileRepository::boxed(pool.clone()),
        SqlxSnapshotRepository::boxed(pool.clone()),
        Arc::new(LocalBlobStore::new(config.storage.path.clone())),
        BackupSettings::from(&config.storage),
    ));
    let import_service = Arc::new(ImportService::new(
        progress.clone(),
        SqlxImportLogRepository::boxed(pool.clone()),
        ImportRepositories::sqlx(pool.clone()),
        backup_service.clone(),
        ImportSettings::from(&config.import),
    ));
    let export_service = Arc::new(ExportService::new(
        progress.clone(),
        SqlxExportLogRepository::boxed(pool.clone()),
        SqlxSnapshotRepository::boxed(pool.clone()),
        backup_service.clone(),
    ));

    AppState {
        pool,
        progress,
        import_service,
        export_service,
        backup_service,
        admin_tokens: Arc::new(config.security.admin_tokens.clone()),
        heartbeat: Duration::from_secs(config.import.heartbeat_secs.max(1)),
    }
}

/// Build the main API router
pub fn build_api_router(state: AppState) -> Router<AppState> {
    // Admin routes (need an admin token)
    let admin_routes = Router::new()
        .nest("/admin/import", import::router())
        .nest("/admin/export", export::router())
        .nest("/admin/backups", backups::router())
        .route_layer(axum_middleware::from_fn_with_state(
            state,
            middleware::require_admin,
        ));

    // Public routes
    Router::new()
        .route("/health", get(health))
        .merge(admin_routes)
}

/// Build the complete router with middleware
pub fn build_router(state: AppState, cors_origin: &str, max_body_bytes: usize) -> Router {
    let mut cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::IF_NONE_MATCH,
        ]);
    match cors_origin.parse::<HeaderValue>() {
        Ok(origin) => cors = cors.allow_origin(origin),
        Err(e) => tracing::warn!("Ignoring invalid CORS origin '{}': {}", cors_origin, e),
    }

    Router::new()
        .nest("/api/v1", build_api_router(state.clone()))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    database: &'static str,
    jobs: usize,
}

/// GET /api/v1/health
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let database = match state.pool.ping().await {
        Ok(()) => "ok",
        Err(e) => {
            tracing::warn!("Health check ping failed: {}", e);
            "unavailable"
        }
    };
    Json(HealthResponse {
        status: if database == "ok" { "ok" } else { "degraded" },
        database,
        jobs: state.progress.len(),
    })
}
