//! Verbatims - Import, export and backup service for a quotes catalogue

use anyhow::Result;
use std::path::Path;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use verbatims::{api, config::Config, db};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "verbatims=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Verbatims data service...");

    // Load configuration
    let config = Config::load_with_env(Path::new("config.yml"))?;
    tracing::info!("Configuration loaded");

    if config.security.admin_tokens.is_empty() {
        tracing::warn!("No admin tokens configured, every admin request will be rejected");
    }

    // Initialize database
    let pool = db::create_pool(&config.database).await?;
    tracing::info!("Database connected: {}", config.database.url);

    // Run migrations
    db::migrations::run_migrations(&pool).await?;
    tracing::info!("Database migrations completed");

    tokio::fs::create_dir_all(&config.storage.path).await?;
    tracing::info!("Object storage at {}", config.storage.path.display());

    let state = api::build_state(pool, &config);

    // Drop finished jobs from memory once their log is the only copy
    {
        let progress = state.progress.clone();
        let retention = Duration::from_secs(config.import.job_retention_secs);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                let purged = progress.purge_finished(retention);
                if purged > 0 {
                    tracing::debug!("Purged {} finished jobs", purged);
                }
            }
        });
    }

    // Expire old snapshots, exports and reports
    {
        let backups = state.backup_service.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(3600));
            loop {
                interval.tick().await;
                if let Err(e) = backups.purge_expired().await {
                    tracing::warn!("Backup purge failed: {}", e);
                }
            }
        });
    }

    let app = api::build_router(
        state,
        &config.server.cors_origin,
        config.server.max_body_bytes,
    );

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
