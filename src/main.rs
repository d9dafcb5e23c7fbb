use anyhow::Context;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use sqlx::SqlitePool;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use tracing::info;

mod config;
mod db;
mod error;
mod export;
mod handlers;
mod models;
mod storage;
mod submission;
#[cfg(test)]
mod test_support;

use crate::config::Config;
use crate::storage::BlobStore;

/// Shared application state, cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub blobs: BlobStore,
    /// How long an unreferenced blob is left alone before a sweep may take it.
    pub sweep_grace: chrono::Duration,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present (ignored in production where env vars are injected)
    dotenv::dotenv().ok();

    // Structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,returns_log=debug")),
        )
        .with_target(false)
        .compact()
        .init();

    let config = Config::from_env()?;

    info!("Returns log service starting");

    info!(database_url = %config.database_url, "Opening database...");
    let pool = db::connect(&config.database_url, 5)
        .await
        .context("failed to open database")?;

    info!("Running migrations...");
    db::run_migrations(&pool)
        .await
        .context("failed to run migrations")?;
    info!("Migrations complete.");

    let blobs = BlobStore::open(&config.upload_dir)
        .await
        .context("failed to open upload directory")?;
    info!(root = %blobs.root().display(), "Blob store ready");

    let state = AppState {
        db: pool,
        blobs,
        sweep_grace: chrono::Duration::seconds(i64::from(config.sweep_grace_secs)),
    };
    let app = build_router(state, config.max_upload_bytes);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn build_router(state: AppState, max_upload_bytes: usize) -> Router {
    let uploads = ServeDir::new(state.blobs.root());

    Router::new()
        // ── Health ──────────────────────────────────────────────────────────
        .route("/health", get(handlers::health))

        // ── Returns ─────────────────────────────────────────────────────────
        .route(
            "/api/returns",
            get(handlers::returns::list_returns).post(handlers::returns::create_return),
        )
        .route(
            "/api/returns/:id",
            get(handlers::returns::get_return).delete(handlers::returns::delete_return),
        )
        .route(
            "/api/returns/:id/delete",
            post(handlers::returns::delete_return),
        )

        // ── Export ──────────────────────────────────────────────────────────
        .route(
            "/api/returns/export/xlsx",
            get(handlers::export::export_xlsx),
        )
        .route(
            "/api/returns/export/csv",
            get(handlers::export::export_csv),
        )

        // ── Maintenance ─────────────────────────────────────────────────────
        .route(
            "/api/maintenance/sweep-blobs",
            post(handlers::maintenance::sweep_blobs),
        )

        // ── Evidence files ──────────────────────────────────────────────────
        .nest_service("/uploads", uploads)

        // ── Middleware ──────────────────────────────────────────────────────
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
