use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

use crate::error::AppError;
use crate::middleware;
use crate::AppState;

pub mod admin;
pub mod health;
pub mod search;

/// Application routes with state, security headers and request tracing.
/// CORS and rate limiting are layered on in `main`.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(health::banner))
        .route("/health", get(health::health_check))
        .nest("/search", search::router())
        .nest("/admin", admin::router())
        .fallback(not_found)
        .with_state(state)
        .layer(axum::middleware::from_fn(middleware::csp::csp_middleware))
        .layer(TraceLayer::new_for_http())
}

async fn not_found(uri: axum::http::Uri) -> AppError {
    AppError::NotFound(format!("No route for {}", uri.path()))
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use std::time::Duration;

    use axum::http::StatusCode;
    use tokio::sync::Notify;
    use tower::ServiceExt;

    async fn wait_for_idle(state: &AppState) {
        for _ in 0..100 {
            if !state.sync.is_syncing() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("sync did not finish");
    }

    #[tokio::test]
    async fn health_and_banner() {
        let app = router(state_with(StubFeed::default()).await);

        let res = app.clone().oneshot(get_request("/health")).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(json_body(res).await["status"], "ok");

        let res = app.oneshot(get_request("/")).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(json_body(res).await["name"], "plans-service");
    }

    #[tokio::test]
    async fn unknown_routes_are_json_404() {
        let app = router(state_with(StubFeed::default()).await);

        let res = app.oneshot(get_request("/plans")).await.unwrap();

        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(res).await["error"]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn search_returns_online_plans_in_window() {
        let state = state_with(StubFeed::default()).await;
        tokio_test::assert_ok!(state.sync.sync_now().await);
        let app = router(state);

        let res = app
            .oneshot(get_request(
                "/search?starts_at=2021-02-01T00:00:00Z&ends_at=2021-08-01",
            ))
            .await
            .unwrap();

        assert_eq!(res.status(), StatusCode::OK);
        let body = json_body(res).await;
        let data = body["data"].as_array().unwrap();

        // the offline Los Morancos plan is excluded
        assert_eq!(body["meta"]["count"], 3);
        assert_eq!(data.len(), 3);
        assert_eq!(data[0]["id"], "1642");
        assert_eq!(data[1]["id"], "1643");
        assert_eq!(data[2]["id"], "291");
        assert_eq!(data[2]["zones"][0]["name"], "A28");
        assert_eq!(data[2]["sellMode"], "online");
        assert!(body["meta"]["responseTime"].as_str().unwrap().ends_with("ms"));
    }

    #[tokio::test]
    async fn search_validation_errors_are_400() {
        let app = router(state_with(StubFeed::default()).await);

        for (uri, message) in [
            ("/search?ends_at=2021-08-01", "starts_at is required"),
            (
                "/search?starts_at=2030-01-01&ends_at=2020-01-01",
                "Start date must be before end date",
            ),
            (
                "/search?starts_at=1990-01-01&ends_at=1995-01-01",
                "End date too far in the past",
            ),
            (
                "/search?starts_at=2999-01-01&ends_at=2999-02-01",
                "Start date too far in the future",
            ),
        ] {
            let res = app.clone().oneshot(get_request(uri)).await.unwrap();
            assert_eq!(res.status(), StatusCode::BAD_REQUEST, "{}", uri);
            let body = json_body(res).await;
            assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
            assert_eq!(body["error"]["message"], message);
        }
    }

    #[tokio::test]
    async fn manual_sync_runs_in_background() {
        let state = state_with(StubFeed::default()).await;
        let app = router(state.clone());

        let res = app.oneshot(request("POST", "/admin/sync")).await.unwrap();
        assert_eq!(res.status(), StatusCode::ACCEPTED);

        wait_for_idle(&state).await;
        let report = state.sync.last_report().await.unwrap();
        assert_eq!(report.plans_processed, 4);
    }

    #[tokio::test]
    async fn manual_sync_conflicts_while_running() {
        let gate = Arc::new(Notify::new());
        let state = state_with(StubFeed {
            gate: Some(gate.clone()),
            ..Default::default()
        })
        .await;
        let app = router(state.clone());

        let first = app.clone().oneshot(request("POST", "/admin/sync")).await.unwrap();
        assert_eq!(first.status(), StatusCode::ACCEPTED);

        let second = app.oneshot(request("POST", "/admin/sync")).await.unwrap();
        assert_eq!(second.status(), StatusCode::CONFLICT);
        assert_eq!(json_body(second).await["error"]["code"], "CONFLICT");

        gate.notify_one();
        wait_for_idle(&state).await;
    }

    #[tokio::test]
    async fn stats_and_cache_clear() {
        let state = state_with(StubFeed::default()).await;
        state.sync.sync_now().await.unwrap();
        let app = router(state.clone());

        let res = app.clone().oneshot(get_request("/admin/stats")).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = json_body(res).await;
        assert_eq!(body["stats"]["totalPlans"], 4);
        assert_eq!(body["stats"]["onlinePlans"], 3);
        assert_eq!(body["stats"]["offlinePlans"], 1);
        assert_eq!(body["sync"]["inProgress"], false);
        assert_eq!(body["sync"]["lastRun"]["plansProcessed"], 4);
        assert_eq!(body["cache"]["entries"], 1);

        let res = app.oneshot(request("DELETE", "/admin/cache")).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(json_body(res).await["entriesCleared"], 1);
        assert!(state.cache.is_empty().await);
    }

    #[tokio::test]
    async fn detailed_health_reports_degraded_provider() {
        let app = router(state_with(StubFeed::default()).await);
        let res = app.oneshot(get_request("/admin/health")).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(json_body(res).await["status"], "healthy");

        let state = state_with(StubFeed {
            down: true,
            ..Default::default()
        })
        .await;
        let res = router(state.clone())
            .oneshot(get_request("/admin/health"))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = json_body(res).await;
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["checks"]["provider"], "down");
        assert_eq!(body["checks"]["database"], "up");
    }

    #[tokio::test]
    async fn detailed_health_is_critical_without_database() {
        let state = state_with(StubFeed::default()).await;
        state.db.close().await;

        let res = router(state).oneshot(get_request("/admin/health")).await.unwrap();
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json_body(res).await["status"], "critical");
    }

    #[tokio::test]
    async fn failed_sync_does_not_break_search() {
        let state = state_with(StubFeed {
            down: true,
            ..Default::default()
        })
        .await;
        assert!(state.sync.sync_now().await.is_err());
        assert!(!state.sync.is_syncing());

        let res = router(state)
            .oneshot(get_request("/search?starts_at=2021-01-01&ends_at=2022-01-01"))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(json_body(res).await["meta"]["count"], 0);
    }

    #[tokio::test]
    async fn config_echo_has_no_database_url() {
        let app = router(state_with(StubFeed::default()).await);
        let res = app.oneshot(get_request("/admin/config")).await.unwrap();
        let body = json_body(res).await;
        assert_eq!(body["provider"]["retries"], 3);
        assert!(body.get("database").is_none());
    }
}
