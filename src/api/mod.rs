//! REST API layer: route handlers, DTOs, and router composition.
//!
//! Resource endpoints are mounted under `/api/v1`; `/health` sits at the
//! root. With the `swagger-ui` feature the OpenAPI document is served at
//! `/api-docs/openapi.json` and browsable under `/swagger-ui`.

pub mod dto;
pub mod handlers;

use axum::Router;
use utoipa::OpenApi;

use crate::app_state::AppState;

/// OpenAPI document of the REST surface.
#[derive(Debug, OpenApi)]
#[openapi(
    info(
        title = "vantage-monitor",
        description = "Scheduled satellite change detection over areas of interest."
    ),
    paths(
        handlers::system::health_handler,
        handlers::scheduler::status,
        handlers::scheduler::start,
        handlers::scheduler::stop,
        handlers::scheduler::sweep,
        handlers::scheduler::trigger,
        handlers::aoi::update_schedule,
        handlers::aoi::cancel_schedule,
        handlers::aoi::create_baseline,
        handlers::aoi::list_results,
        handlers::tokens::get_tokens,
        handlers::tokens::grant_tokens,
        handlers::tokens::audit_tokens,
    ),
    tags(
        (name = "System", description = "Health"),
        (name = "Scheduler", description = "Orchestrator lifecycle and forced runs"),
        (name = "AOI", description = "Schedules, baselines and results"),
        (name = "Tokens", description = "Token accounts"),
    )
)]
pub struct ApiDoc;

/// Builds the complete API router with all REST endpoints.
pub fn build_router() -> Router<AppState> {
    let router = Router::new()
        .nest("/api/v1", handlers::routes())
        .merge(handlers::system::routes());
    with_docs(router)
}

#[cfg(feature = "swagger-ui")]
fn with_docs(router: Router<AppState>) -> Router<AppState> {
    router.merge(
        utoipa_swagger_ui::SwaggerUi::new("/swagger-ui")
            .url("/api-docs/openapi.json", ApiDoc::openapi()),
    )
}

#[cfg(not(feature = "swagger-ui"))]
fn with_docs(router: Router<AppState>) -> Router<AppState> {
    router
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::*;
    use crate::config::SchedulerConfig;
    use crate::persistence::Persistence;
    use crate::test_support::{Harness, ScriptedProvider, terrain};

    async fn app() -> (Router, Harness) {
        let harness = Harness::new(ScriptedProvider::returning(terrain(64, 64))).await;
        let orchestrator = harness.orchestrator(SchedulerConfig::default(), false);
        let state = AppState::new(orchestrator, Arc::clone(&harness.store) as Arc<dyn Persistence>);
        (build_router().with_state(state), harness)
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        };
        let Ok(request) = request else {
            panic!("request builds");
        };
        let Ok(response) = app.clone().oneshot(request).await else {
            panic!("router answers");
        };
        let status = response.status();
        let Ok(bytes) = axum::body::to_bytes(response.into_body(), usize::MAX).await else {
            panic!("body reads");
        };
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn health_reflects_store_reachability() {
        let (app, harness) = app().await;
        let (status, body) = send(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["scheduler_running"], false);

        harness.store.set_unavailable(true);
        let (status, body) = send(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["store_reachable"], false);
    }

    #[tokio::test]
    async fn trigger_runs_and_charges() {
        let (app, harness) = app().await;
        let (status, body) = send(&app, "POST", "/api/v1/scheduler/trigger/1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "success");
        assert_eq!(body["trigger"], "force");
        assert_eq!(harness.balance().await, Harness::STARTING_BALANCE - 1);

        let (status, results) = send(&app, "GET", "/api/v1/aoi/1/results", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(results.as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn trigger_unknown_aoi_is_404() {
        let (app, _harness) = app().await;
        let (status, body) = send(&app, "POST", "/api/v1/scheduler/trigger/99", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], 2001);
    }

    #[tokio::test]
    async fn schedule_validation() {
        let (app, _harness) = app().await;
        let uri = "/api/v1/aoi/1/schedule";

        let (status, _) = send(&app, "PUT", uri, Some(json!({ "frequency": "hourly" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&app, "PUT", uri, Some(json!({ "frequency": "once" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let past = json!({ "frequency": "daily", "scheduled_at": "2001-01-01T00:00:00Z" });
        let (status, _) = send(&app, "PUT", uri, Some(past)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(&app, "PUT", uri, Some(json!({ "frequency": "Monthly" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["frequency"], "monthly");
        assert_eq!(body["timer_armed"], false);
    }

    #[tokio::test]
    async fn disabling_clears_schedule() {
        let (app, harness) = app().await;
        let body = json!({ "frequency": "weekly", "enabled": false });
        let (status, response) = send(&app, "PUT", "/api/v1/aoi/1/schedule", Some(body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(response["frequency"], Value::Null);

        harness
            .update_aoi(|aoi| aoi.monitoring_frequency = Some(crate::domain::MonitoringFrequency::Daily))
            .await;
        let (status, _) = send(&app, "DELETE", "/api/v1/aoi/1/schedule", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let aoi = harness.aoi().await;
        assert!(aoi.monitoring_frequency.is_none());
        assert!(aoi.next_run_at.is_none());
    }

    #[tokio::test]
    async fn token_endpoints() {
        let (app, _harness) = app().await;

        let (status, body) = send(&app, "GET", "/api/v1/users/10/tokens", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["account"]["balance"], Harness::STARTING_BALANCE);

        let grant = json!({ "amount": 3, "admin_user_id": 1, "note": "pilot" });
        let (status, body) = send(&app, "POST", "/api/v1/users/10/tokens", Some(grant)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["new_balance"], Harness::STARTING_BALANCE + 3);

        let (status, _) = send(&app, "POST", "/api/v1/users/10/tokens", Some(json!({ "amount": 0 }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, audit) = send(&app, "GET", "/api/v1/users/10/tokens/audit", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(audit["chain_intact"], true);
        assert_eq!(audit["stored_balance"], Harness::STARTING_BALANCE + 3);

        let (status, _) = send(&app, "GET", "/api/v1/users/404/tokens", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn lifecycle_and_status() {
        let (app, _harness) = app().await;

        let (status, body) = send(&app, "GET", "/api/v1/scheduler/status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["is_running"], false);
        assert_eq!(body["scheduled_count"], 1);

        let (_, body) = send(&app, "POST", "/api/v1/scheduler/start", None).await;
        assert_eq!(body["changed"], true);
        let (_, body) = send(&app, "POST", "/api/v1/scheduler/start", None).await;
        assert_eq!(body["changed"], false);
        assert_eq!(body["is_running"], true);

        let (_, body) = send(&app, "POST", "/api/v1/scheduler/stop", None).await;
        assert_eq!(body["changed"], true);
        assert_eq!(body["is_running"], false);
    }

    #[tokio::test]
    async fn manual_sweep_dispatches_due_aoi() {
        let (app, _harness) = app().await;
        let (status, body) = send(&app, "POST", "/api/v1/scheduler/sweep", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["selected"], 1);
        assert_eq!(body["dispatched"], 1);
    }

    #[test]
    fn openapi_lists_every_route() {
        let doc = ApiDoc::openapi();
        for path in [
            "/health",
            "/api/v1/scheduler/status",
            "/api/v1/scheduler/trigger/{aoi_id}",
            "/api/v1/aoi/{aoi_id}/schedule",
            "/api/v1/users/{user_id}/tokens/audit",
        ] {
            assert!(doc.paths.paths.contains_key(path), "{path} missing");
        }
    }
}
