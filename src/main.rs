use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use axum::body::Body;
use http::{HeaderValue, StatusCode};
use sqlx::SqlitePool;
use tower_governor::governor::GovernorConfigBuilder;
use tower_governor::key_extractor::SmartIpKeyExtractor;
use tower_governor::{GovernorError, GovernorLayer};
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod db;
mod error;
mod middleware;
mod routes;
mod services;

use config::{Config, LogFormat};
use services::{
    cache::{CachedValue, TtlCache},
    init,
    provider::{PlanFeed, ProviderClient},
    search::SearchService,
    sync::SyncOrchestrator,
};

pub struct AppState {
    pub db: SqlitePool,
    pub config: Config,
    pub cache: TtlCache<CachedValue>,
    pub provider: Arc<dyn PlanFeed>,
    pub sync: Arc<SyncOrchestrator>,
    pub search: SearchService,
    pub started_at: Instant,
}

impl AppState {
    /// Wire the services around one shared cache.
    pub fn new(config: Config, db: SqlitePool, provider: Arc<dyn PlanFeed>) -> Self {
        let cache = TtlCache::new();
        let sync = Arc::new(SyncOrchestrator::new(
            provider.clone(),
            db.clone(),
            cache.clone(),
        ));
        let search = SearchService::new(
            db.clone(),
            cache.clone(),
            Duration::from_secs(config.cache.search_ttl_seconds),
            Duration::from_secs(config.cache.stats_ttl_seconds),
        );

        Self {
            db,
            config,
            cache,
            provider,
            sync,
            search,
            started_at: Instant::now(),
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "plans_service=debug,tower_http=debug".into());

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// JSON 429 with `Retry-After`, matching the `AppError` body shape.
fn rate_limit_error(error: GovernorError) -> http::Response<Body> {
    match error {
        GovernorError::TooManyRequests { wait_time, headers } => {
            let body = serde_json::json!({
                "error": {
                    "code": "RATE_LIMITED",
                    "message": "Rate limit exceeded",
                    "details": { "retry_after_seconds": wait_time }
                }
            })
            .to_string();

            let mut resp = http::Response::new(Body::from(body));
            *resp.status_mut() = StatusCode::TOO_MANY_REQUESTS;
            resp.headers_mut().insert(
                http::header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );

            if let Some(hmap) = headers {
                for (name, value) in hmap.iter() {
                    resp.headers_mut().append(name.clone(), value.clone());
                }
            }

            resp.headers_mut()
                .insert(http::header::RETRY_AFTER, HeaderValue::from(wait_time));

            resp
        }
        GovernorError::UnableToExtractKey => {
            let body = serde_json::json!({
                "error": {
                    "code": "INVALID_REQUEST",
                    "message": "Unable to determine client IP for rate limiting"
                }
            })
            .to_string();

            let mut resp = http::Response::new(Body::from(body));
            *resp.status_mut() = StatusCode::BAD_REQUEST;
            resp.headers_mut().insert(
                http::header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );
            resp
        }
        GovernorError::Other { code, msg, headers } => {
            let body = msg.unwrap_or_else(|| "Rate limiting error".to_string());
            let mut resp = http::Response::new(Body::from(body));
            *resp.status_mut() =
                StatusCode::from_u16(code.as_u16()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            if let Some(hmap) = headers {
                for (name, value) in hmap.iter() {
                    resp.headers_mut().append(name.clone(), value.clone());
                }
            }
            resp
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    init_tracing(config.logging.format);

    tracing::info!("Starting plans service");

    let pool = init::init_db(&config).await?;
    let provider: Arc<dyn PlanFeed> = Arc::new(ProviderClient::new(&config)?);
    tracing::info!(url = %config.provider.url, "Provider client configured");

    let app_state = Arc::new(AppState::new(config.clone(), pool, provider));

    // Shutdown notifier for background workers and std threads
    let (shutdown_tx, _shutdown_rx) = tokio::sync::broadcast::channel::<()>(1);
    let thread_shutdown = Arc::new(AtomicBool::new(false));

    // Sync scheduler (initial sync included) and cache sweeper
    let bg_handles = init::spawn_background_workers(app_state.clone(), shutdown_tx.clone());

    // Per-IP rate limiter for the whole API
    let mut governor_builder = GovernorConfigBuilder::default();
    governor_builder.per_second(config.rate_limit.per_second);
    governor_builder.burst_size(config.rate_limit.burst);
    governor_builder.key_extractor(SmartIpKeyExtractor);
    governor_builder.error_handler(rate_limit_error);
    let governor_conf = Arc::new(
        governor_builder
            .finish()
            .ok_or_else(|| anyhow::anyhow!("Failed to build rate limiter config"))?,
    );

    // Background cleanup for limiter storage
    let limiter_cleaner = {
        let limiter = governor_conf.limiter().clone();
        let interval = Duration::from_secs(60);
        let flag = thread_shutdown.clone();
        std::thread::spawn(move || {
            let tick = Duration::from_secs(1);
            loop {
                for _ in 0..interval.as_secs() {
                    if flag.load(Ordering::SeqCst) {
                        tracing::info!("Rate limiter cleanup thread exiting");
                        return;
                    }
                    std::thread::sleep(tick);
                }
                tracing::debug!("rate limiter size: {}", limiter.len());
                limiter.retain_recent();
            }
        })
    };

    let cors = CorsLayer::new()
        .allow_origin(config.server.frontend_url.parse::<HeaderValue>()?)
        .allow_methods([
            http::Method::GET,
            http::Method::POST,
            http::Method::DELETE,
            http::Method::OPTIONS,
        ])
        .allow_headers([http::header::CONTENT_TYPE, http::header::ACCEPT]);

    let app = routes::router(app_state.clone())
        .layer(GovernorLayer {
            config: governor_conf.clone(),
        })
        .layer(cors);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let server_fut = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    );

    let shutdown_tx_clone = shutdown_tx.clone();
    let thread_shutdown_clone = thread_shutdown.clone();

    let signal_fut = async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut term) => {
                    tokio::select! {
                        _ = ctrl_c => {},
                        _ = term.recv() => {},
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to bind SIGTERM handler: {}", e);
                    let _ = ctrl_c.await;
                }
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }

        tracing::info!("Shutdown signal received, notifying background workers and threads");
        let _ = shutdown_tx_clone.send(());
        thread_shutdown_clone.store(true, Ordering::SeqCst);
    };

    tokio::select! {
        res = server_fut => {
            if let Err(e) = res {
                tracing::error!("Server error: {}", e);
            }
        }
        _ = signal_fut => {
            tracing::info!("Signal handler completed; server stopped accepting connections");
        }
    }

    // A sync in flight runs to completion; give it a bounded window.
    let shutdown_wait = Duration::from_secs(15);
    tracing::info!(
        "Waiting up to {}s for background workers to exit",
        shutdown_wait.as_secs()
    );

    let bg_wait = async {
        for h in bg_handles {
            let _ = h.await;
        }
    };
    if tokio::time::timeout(shutdown_wait, bg_wait).await.is_err() {
        tracing::warn!("Background workers did not exit in time");
    }

    // The server future may have ended on its own; make sure the thread sees shutdown.
    thread_shutdown.store(true, Ordering::SeqCst);
    if let Err(e) = limiter_cleaner.join() {
        tracing::warn!("Rate limiter cleanup thread join failed: {:?}", e);
    }

    app_state.db.close().await;
    tracing::info!("Shutdown complete");
    Ok(())
}
