use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use crate::error::{AppError, AppResult};
use crate::services::search::SearchService;
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/", get(search))
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub starts_at: Option<String>,
    pub ends_at: Option<String>,
}

/// `GET /search?starts_at=..&ends_at=..`
async fn search(
    State(state): State<Arc<AppState>>,
    params: Result<Query<SearchParams>, QueryRejection>,
) -> AppResult<Json<serde_json::Value>> {
    let started = Instant::now();
    let Query(params) = params.map_err(|e| AppError::Validation(e.body_text()))?;

    let start = required_datetime("starts_at", params.starts_at.as_deref())?;
    let end = required_datetime("ends_at", params.ends_at.as_deref())?;
    SearchService::validate_range(&start, &end)?;

    let plans = state.search.search(&start, &end).await?;
    let elapsed = started.elapsed().as_millis();

    tracing::debug!(count = plans.len(), elapsed_ms = elapsed as u64, "Search served");

    Ok(Json(json!({
        "data": &*plans,
        "meta": {
            "count": plans.len(),
            "responseTime": format!("{}ms", elapsed),
        }
    })))
}

fn required_datetime(name: &str, value: Option<&str>) -> AppResult<DateTime<Utc>> {
    let raw = value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::Validation(format!("{} is required", name)))?;

    parse_query_datetime(raw).ok_or_else(|| {
        AppError::Validation(format!("{} must be an ISO-8601 date or datetime", name))
    })
}

/// RFC 3339, naive datetime (UTC), or a bare date (midnight UTC).
pub fn parse_query_datetime(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
