//! Admin API routes for cache inspection and on-demand maintenance.
//!
//! - `GET /cache` - cache usage plus in-flight download count
//! - `POST /cache/sweep` - run a sweep now
//! - `POST /refresh` - run a refresh batch now

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use mediastash_common::Error;
use serde::Serialize;

use super::{error::AppError, AppContext};
use crate::cache::{CacheStats, SweepReport};
use crate::refresh::RefreshReport;

/// Create admin routes.
pub fn admin_routes() -> Router<AppContext> {
    Router::new()
        .route("/cache", get(get_cache))
        .route("/cache/sweep", post(sweep_cache))
        .route("/refresh", post(run_refresh))
}

#[derive(Debug, Serialize)]
pub struct CacheOverview {
    #[serde(flatten)]
    pub stats: CacheStats,
    pub active_downloads: usize,
}

async fn get_cache(State(ctx): State<AppContext>) -> Result<Json<CacheOverview>, AppError> {
    let cache = ctx.cache.clone();
    let stats = tokio::task::spawn_blocking(move || cache.stats())
        .await
        .map_err(|e| Error::internal(format!("stats task failed: {e}")))??;

    Ok(Json(CacheOverview {
        stats,
        active_downloads: ctx.downloads.active_count(),
    }))
}

async fn sweep_cache(State(ctx): State<AppContext>) -> Result<Json<SweepReport>, AppError> {
    let cache = ctx.cache.clone();
    let report = tokio::task::spawn_blocking(move || cache.sweep())
        .await
        .map_err(|e| Error::internal(format!("sweep task failed: {e}")))??;
    Ok(Json(report))
}

async fn run_refresh(State(ctx): State<AppContext>) -> Json<RefreshReport> {
    Json(ctx.refresh.run_once().await)
}
