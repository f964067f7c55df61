//! Scheduler lifecycle, sweep and forced-run handlers.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::api::dto::{LifecycleResponse, TriggerResponse};
use crate::app_state::AppState;
use crate::domain::{AoiId, JobOutcome, SkipReason};
use crate::error::{ErrorResponse, MonitorError};
use crate::service::{SchedulerStatus, SweepSummary};

/// `GET /scheduler/status`: Orchestrator status.
///
/// # Errors
///
/// Returns [`MonitorError::PersistenceError`] if the store is unreachable.
#[utoipa::path(
    get,
    path = "/api/v1/scheduler/status",
    tag = "Scheduler",
    summary = "Scheduler status",
    description = "Running flag, number of scheduled AOIs, in-flight jobs and armed timers.",
    responses(
        (status = 200, description = "Current status", body = SchedulerStatus),
        (status = 500, description = "Store unavailable", body = ErrorResponse),
    )
)]
pub async fn status(State(state): State<AppState>) -> Result<impl IntoResponse, MonitorError> {
    Ok(Json(state.orchestrator.status().await?))
}

/// `POST /scheduler/start`: Start the sweep loop.
#[utoipa::path(
    post,
    path = "/api/v1/scheduler/start",
    tag = "Scheduler",
    summary = "Start the scheduler",
    description = "Starts the periodic sweep. Starting a running scheduler is a no-op.",
    responses(
        (status = 200, description = "Scheduler running", body = LifecycleResponse),
    )
)]
pub async fn start(State(state): State<AppState>) -> impl IntoResponse {
    let changed = state.orchestrator.start();
    Json(LifecycleResponse {
        is_running: state.orchestrator.is_running(),
        changed,
    })
}

/// `POST /scheduler/stop`: Stop the sweep loop and drain jobs.
#[utoipa::path(
    post,
    path = "/api/v1/scheduler/stop",
    tag = "Scheduler",
    summary = "Stop the scheduler",
    description = "Cancels the sweep, disarms timers and waits for in-flight jobs up to the shutdown timeout.",
    responses(
        (status = 200, description = "Scheduler stopped", body = LifecycleResponse),
    )
)]
pub async fn stop(State(state): State<AppState>) -> impl IntoResponse {
    let changed = state.orchestrator.stop().await;
    Json(LifecycleResponse {
        is_running: state.orchestrator.is_running(),
        changed,
    })
}

/// `POST /scheduler/sweep`: Run one sweep now.
///
/// # Errors
///
/// Returns [`MonitorError::PersistenceError`] if due AOIs cannot be selected.
#[utoipa::path(
    post,
    path = "/api/v1/scheduler/sweep",
    tag = "Scheduler",
    summary = "Sweep now",
    description = "Selects due AOIs and dispatches them immediately, independent of the sweep interval.",
    responses(
        (status = 200, description = "Sweep summary", body = SweepSummary),
        (status = 500, description = "Store unavailable", body = ErrorResponse),
    )
)]
pub async fn sweep(State(state): State<AppState>) -> Result<impl IntoResponse, MonitorError> {
    Ok(Json(state.orchestrator.sweep_now().await?))
}

/// `POST /scheduler/trigger/{aoi_id}`: Force an analysis now.
///
/// # Errors
///
/// Returns [`MonitorError::AoiNotFound`] for an unknown AOI and
/// [`MonitorError::AlreadyInFlight`] if a job already holds it.
#[utoipa::path(
    post,
    path = "/api/v1/scheduler/trigger/{aoi_id}",
    tag = "Scheduler",
    summary = "Force analysis",
    description = "Runs one analysis of the AOI, bypassing the due check. Tokens are charged and the schedule advances as for a scheduled run.",
    params(
        ("aoi_id" = i64, Path, description = "AOI id"),
    ),
    responses(
        (status = 200, description = "Job report", body = TriggerResponse),
        (status = 404, description = "AOI not found", body = ErrorResponse),
        (status = 409, description = "Analysis already in flight", body = ErrorResponse),
    )
)]
pub async fn trigger(
    State(state): State<AppState>,
    Path(aoi_id): Path<i64>,
) -> Result<impl IntoResponse, MonitorError> {
    let aoi_id = AoiId::new(aoi_id);
    let report = state.orchestrator.force_analysis(aoi_id).await?;
    if matches!(
        report.outcome,
        JobOutcome::Skipped {
            reason: SkipReason::NotFound
        }
    ) {
        return Err(MonitorError::AoiNotFound(aoi_id));
    }
    Ok(Json(TriggerResponse::from(report)))
}

/// Scheduler routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/scheduler/status", get(status))
        .route("/scheduler/start", post(start))
        .route("/scheduler/stop", post(stop))
        .route("/scheduler/sweep", post(sweep))
        .route("/scheduler/trigger/{aoi_id}", post(trigger))
}
