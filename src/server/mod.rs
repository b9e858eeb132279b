use crate::cache::CacheStore;
use crate::config::Config;
use crate::downloads::{DownloadManager, Fetcher, YtDlpFetcher};
use crate::events::ProgressBroadcaster;
use crate::refresh::{self, RefreshScheduler};
use crate::streaming;
use anyhow::{Context, Result};
use axum::{
    http::{header, Method, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub mod error;
pub mod routes_admin;
pub mod routes_download;

/// Shared application context
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub cache: Arc<CacheStore>,
    pub downloads: Arc<DownloadManager>,
    pub events: ProgressBroadcaster,
    pub refresh: Arc<RefreshScheduler>,
    /// Cancelled when the server starts shutting down.
    pub shutdown: CancellationToken,
}

impl AppContext {
    /// Wire the cache, ledger and broadcaster around the given collaborators.
    pub fn new(
        config: Config,
        fetcher: Arc<dyn Fetcher>,
        refresh: RefreshScheduler,
    ) -> Result<Self> {
        let cache = Arc::new(
            CacheStore::open(&config.cache)
                .with_context(|| format!("Failed to open cache dir {:?}", config.cache.dir))?,
        );
        let events = ProgressBroadcaster::new(
            config.downloads.subscriber_capacity,
            config.downloads.terminal_send_timeout(),
        );
        let downloads = DownloadManager::new(
            &config.downloads,
            Arc::clone(&cache),
            fetcher,
            events.clone(),
        );

        Ok(Self {
            config: Arc::new(config),
            cache,
            downloads,
            events,
            refresh: Arc::new(refresh),
            shutdown: CancellationToken::new(),
        })
    }

    /// Context backed by yt-dlp, ffmpeg and the configured sources.
    pub fn from_config(config: Config) -> Result<Self> {
        let fetcher = Arc::new(YtDlpFetcher::new(&config.tools));
        let scheduler = refresh::scheduler_from_config(&config);
        Self::new(config, fetcher, scheduler)
    }
}

/// Create the Axum router with all routes
pub fn create_router(ctx: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::RANGE])
        .expose_headers([
            header::CONTENT_RANGE,
            header::CONTENT_LENGTH,
            header::ACCEPT_RANGES,
        ]);

    Router::new()
        .route("/health", get(health_check))
        .nest("/api", api_routes())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

fn api_routes() -> Router<AppContext> {
    Router::new()
        .nest("/stream", streaming::stream_router())
        .merge(routes_download::download_routes())
        .merge(routes_admin::admin_routes())
}

async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}

/// Start the HTTP server with the background sweeper and refresh scheduler.
pub async fn start_server(config: Config) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;

    let ctx = AppContext::from_config(config)?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!("Starting server on {}", addr);
    serve(ctx, listener, shutdown_signal()).await
}

/// Serve `ctx` on `listener` until `signal` resolves, then drain.
///
/// On shutdown in-flight fetches are cancelled and their temp files removed
/// before open connections are waited on, so event streams see a terminal
/// event and close.
pub async fn serve(
    ctx: AppContext,
    listener: TcpListener,
    signal: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let sweeper = Arc::clone(&ctx.cache).spawn_sweeper(
        ctx.config.cache.sweep_interval(),
        ctx.shutdown.child_token(),
    );
    let scheduler = if ctx.config.refresh.enabled {
        Some(Arc::clone(&ctx.refresh).spawn(ctx.shutdown.child_token()))
    } else {
        tracing::info!("Refresh scheduler disabled");
        None
    };

    let shutdown = ctx.shutdown.clone();
    let downloads = Arc::clone(&ctx.downloads);
    let drain = async move {
        signal.await;
        // Terminal events must be queued before event streams stop reading.
        downloads.shutdown().await;
        shutdown.cancel();
    };

    let result = axum::serve(listener, create_router(ctx))
        .with_graceful_shutdown(drain)
        .await;

    let _ = sweeper.await;
    if let Some(handle) = scheduler {
        let _ = handle.await;
    }

    tracing::info!("Server shutdown complete");
    result.context("Server error")
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => {}
            Err(e) => {
                tracing::error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
