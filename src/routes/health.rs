use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use serde_json::json;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: String,
}

/// Liveness only; dependency checks live under `/admin/health`.
pub async fn health_check() -> impl IntoResponse {
    let response = HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    };

    (StatusCode::OK, Json(response))
}

pub async fn banner() -> Json<serde_json::Value> {
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "search": "GET /search?starts_at=<ISO-8601>&ends_at=<ISO-8601>",
            "health": "GET /health",
            "stats": "GET /admin/stats",
            "sync": "POST /admin/sync",
            "cache": "DELETE /admin/cache",
            "adminHealth": "GET /admin/health",
            "config": "GET /admin/config"
        }
    }))
}
