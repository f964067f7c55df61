//! System endpoints: liveness and store reachability.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::app_state::AppState;

/// Health of the service and its store.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// `healthy` or `degraded`.
    pub status: &'static str,
    /// Crate version.
    pub version: &'static str,
    /// Whether the sweep loop is running.
    pub scheduler_running: bool,
    /// Whether the store answered a trivial query.
    pub store_reachable: bool,
    /// Time of the check.
    pub timestamp: DateTime<Utc>,
}

/// `GET /health`: Service health.
///
/// Answers 503 while the store is unreachable so load balancers can drain
/// the instance.
#[utoipa::path(
    get,
    path = "/health",
    tag = "System",
    summary = "Health check",
    description = "Reports version, scheduler state and store reachability.",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
        (status = 503, description = "Store unreachable", body = HealthResponse),
    )
)]
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let store_reachable = state.store.count_scheduled().await.is_ok();
    let (code, status) = if store_reachable {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };
    let body = HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        scheduler_running: state.orchestrator.is_running(),
        store_reachable,
        timestamp: Utc::now(),
    };
    (code, Json(body))
}

/// Routes mounted at the root level (not under /api/v1).
pub fn routes() -> Router<AppState> {
    Router::new().route("/health", get(health_handler))
}
