//! Startup helpers:
//! - database connection + migrations
//! - background workers (sync scheduler, cache sweeper)

use std::{path::Path, sync::Arc, time::Duration};

use anyhow::Result;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::services::cache::{CachedValue, TtlCache};
use crate::services::sync::SyncOrchestrator;

/// Redact potentially sensitive information from a database URL before logging.
///
/// Userinfo (username:password) and query parameters are dropped. Falls back to
/// stripping everything before '@' or returning "(redacted)".
pub fn redact_db_url(db_url: &str) -> String {
    if let Ok(url) = url::Url::parse(db_url) {
        let host = url.host_str().unwrap_or("");
        let port_part = url.port().map(|p| format!(":{}", p)).unwrap_or_default();
        format!("{}://{}{}{}", url.scheme(), host, port_part, url.path())
    } else if let Some(at_pos) = db_url.find('@') {
        format!("(redacted){}", &db_url[at_pos + 1..])
    } else {
        "(redacted)".to_string()
    }
}

/// Open the SQLite pool and run migrations.
///
/// The parent directory of the database file is created when missing.
pub async fn init_db(config: &Config) -> Result<sqlx::SqlitePool> {
    let db_url = &config.database.url;
    tracing::info!("Connecting to database: {}", redact_db_url(db_url));

    let db_path = db_url
        .strip_prefix("sqlite://")
        .or_else(|| db_url.strip_prefix("sqlite:"))
        .unwrap_or(db_url);
    let db_file_path = Path::new(db_path);

    if let Some(parent) = db_file_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                anyhow::anyhow!(
                    "Failed to create database directory {}: {}",
                    parent.display(),
                    e
                )
            })?;
        }
    }

    let existed = db_file_path.exists();

    let connect_options = sqlx::sqlite::SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect_with(connect_options)
        .await?;

    if existed {
        tracing::info!("Opened database file: {}", db_file_path.display());
    } else {
        tracing::info!("Created database file: {}", db_file_path.display());
    }

    tracing::info!("Running database migrations");
    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

/// Spawn the long-running workers. Each one exits when `shutdown` fires;
/// the returned handles let the caller wait for them.
pub fn spawn_background_workers(
    state: Arc<crate::AppState>,
    shutdown: broadcast::Sender<()>,
) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();

    if state.config.sync.enabled {
        handles.push(spawn_sync_scheduler(
            state.sync.clone(),
            Duration::from_secs(state.config.sync.interval_seconds),
            shutdown.subscribe(),
        ));
    } else {
        tracing::info!("Scheduled sync disabled; only manual triggers will run");
    }

    handles.push(spawn_cache_sweeper(
        state.cache.clone(),
        Duration::from_secs(state.config.cache.sweep_interval_seconds),
        shutdown.subscribe(),
    ));

    handles
}

/// Initial sync right away, then one per `interval`. Failed cycles are logged
/// and the schedule carries on.
pub fn spawn_sync_scheduler(
    sync: Arc<SyncOrchestrator>,
    interval: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(
            interval_secs = interval.as_secs(),
            "Sync scheduler started"
        );

        loop {
            match sync.sync_now().await {
                Ok(Some(report)) => {
                    tracing::debug!(plans = report.plans_processed, "Scheduled sync finished")
                }
                Ok(None) => tracing::debug!("Scheduled sync skipped, another run is active"),
                Err(e) => tracing::warn!("Scheduled sync failed: {}", e),
            }

            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Sync scheduler shutting down");
                    break;
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }
    })
}

pub fn spawn_cache_sweeper(
    cache: TtlCache<CachedValue>,
    interval: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Cache sweeper shutting down");
                    break;
                }
                _ = tokio::time::sleep(interval) => {
                    let purged = cache.purge_expired().await;
                    if purged > 0 {
                        tracing::debug!("Cache sweep removed {} expired entries", purged);
                    }
                }
            }
        }
    })
}
