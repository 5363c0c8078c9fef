use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde_json::json;

use crate::db::PlanRepository;
use crate::error::{AppError, AppResult};
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/stats", get(stats))
        .route("/sync", post(trigger_sync))
        .route("/cache", delete(clear_cache))
        .route("/health", get(detailed_health))
        .route("/config", get(config))
}

/// Store aggregates plus sync and cache status.
async fn stats(State(state): State<Arc<AppState>>) -> AppResult<Json<serde_json::Value>> {
    let stats = state.search.stats().await?;
    let last_run = state.sync.last_report().await;
    let cache_entries = state.cache.len().await;

    Ok(Json(json!({
        "stats": stats,
        "sync": {
            "inProgress": state.sync.is_syncing(),
            "lastRun": last_run,
        },
        "cache": { "entries": cache_entries },
        "uptimeSeconds": state.started_at.elapsed().as_secs(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })))
}

/// Start a sync in the background. The slot is claimed before answering, so a
/// second caller gets a 409 rather than a silent no-op.
async fn trigger_sync(
    State(state): State<Arc<AppState>>,
) -> AppResult<(StatusCode, Json<serde_json::Value>)> {
    let permit = state
        .sync
        .try_begin()
        .ok_or_else(|| AppError::Conflict("Sync already in progress".to_string()))?;

    let sync = state.sync.clone();
    tokio::spawn(async move {
        if let Err(e) = sync.run(permit).await {
            tracing::warn!("Manual sync failed: {}", e);
        }
    });

    tracing::info!("Manual sync triggered");

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "message": "Sync started" })),
    ))
}

async fn clear_cache(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let cleared = state.cache.invalidate_all().await;

    Json(json!({
        "message": "Cache cleared",
        "entriesCleared": cleared,
    }))
}

/// Dependency status. The database is critical; the provider only degrades
/// the service since cached and stored data keep being served.
async fn detailed_health(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<serde_json::Value>) {
    let database_ok = match PlanRepository::ping(&state.db).await {
        Ok(()) => true,
        Err(e) => {
            tracing::error!("Database health check failed: {}", e);
            false
        }
    };
    let provider_ok = state.provider.health_check().await;

    let cache_entries = state.cache.len().await;
    let up_or_down = |ok: bool| if ok { "up" } else { "down" };

    let (status, code) = match (database_ok, provider_ok) {
        (false, _) => ("critical", StatusCode::SERVICE_UNAVAILABLE),
        (true, false) => ("degraded", StatusCode::OK),
        (true, true) => ("healthy", StatusCode::OK),
    };

    (
        code,
        Json(json!({
            "status": status,
            "checks": {
                "database": up_or_down(database_ok),
                "provider": up_or_down(provider_ok),
                "cache": { "status": "up", "entries": cache_entries },
            },
            "sync": { "inProgress": state.sync.is_syncing() },
            "uptimeSeconds": state.started_at.elapsed().as_secs(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        })),
    )
}

/// Non-sensitive configuration echo.
async fn config(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let config = &state.config;

    Json(json!({
        "provider": {
            "url": config.provider.url,
            "timeoutMs": config.provider.timeout_ms,
            "retries": config.provider.retries,
        },
        "sync": {
            "enabled": config.sync.enabled,
            "intervalSeconds": config.sync.interval_seconds,
        },
        "cache": {
            "searchTtlSeconds": config.cache.search_ttl_seconds,
            "statsTtlSeconds": config.cache.stats_ttl_seconds,
        },
        "rateLimit": {
            "perSecond": config.rate_limit.per_second,
            "burst": config.rate_limit.burst,
        },
    }))
}
