//! Per-AOI handlers: schedule, baseline and results.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::Utc;

use crate::api::dto::{BaselineResponse, LimitParams, ScheduleRequest, ScheduleResponse};
use crate::app_state::AppState;
use crate::domain::{AnalysisResult, AoiId, MonitoringFrequency};
use crate::error::{ErrorResponse, MonitorError};

/// `PUT /aoi/{aoi_id}/schedule`: Set the monitoring schedule.
///
/// # Errors
///
/// Returns [`MonitorError::InvalidRequest`] for an unknown frequency, a
/// past `scheduled_at`, or `once` without `scheduled_at`, and
/// [`MonitorError::AoiNotFound`] for an unknown AOI.
#[utoipa::path(
    put,
    path = "/api/v1/aoi/{aoi_id}/schedule",
    tag = "AOI",
    summary = "Update schedule",
    description = "Sets the monitoring frequency. `scheduled_at` pins the next run to an exact time; `none` or `enabled: false` disables monitoring.",
    params(
        ("aoi_id" = i64, Path, description = "AOI id"),
    ),
    request_body = ScheduleRequest,
    responses(
        (status = 200, description = "Schedule updated", body = ScheduleResponse),
        (status = 400, description = "Invalid schedule", body = ErrorResponse),
        (status = 404, description = "AOI not found", body = ErrorResponse),
    )
)]
pub async fn update_schedule(
    State(state): State<AppState>,
    Path(aoi_id): Path<i64>,
    Json(req): Json<ScheduleRequest>,
) -> Result<impl IntoResponse, MonitorError> {
    let frequency = if req.enabled {
        MonitoringFrequency::parse_optional(&req.frequency).map_err(MonitorError::InvalidRequest)?
    } else {
        None
    };
    if frequency.is_some() && req.scheduled_at.is_some_and(|at| at <= Utc::now()) {
        return Err(MonitorError::InvalidRequest(
            "scheduled_at must be in the future".to_string(),
        ));
    }

    let update = state
        .orchestrator
        .update_schedule(AoiId::new(aoi_id), frequency, req.scheduled_at)
        .await?;
    Ok(Json(ScheduleResponse::from(update)))
}

/// `DELETE /aoi/{aoi_id}/schedule`: Disable monitoring.
///
/// # Errors
///
/// Returns [`MonitorError::AoiNotFound`] for an unknown AOI.
#[utoipa::path(
    delete,
    path = "/api/v1/aoi/{aoi_id}/schedule",
    tag = "AOI",
    summary = "Cancel schedule",
    description = "Clears the frequency and next run time and disarms any pending timer.",
    params(
        ("aoi_id" = i64, Path, description = "AOI id"),
    ),
    responses(
        (status = 204, description = "Schedule cancelled"),
        (status = 404, description = "AOI not found", body = ErrorResponse),
    )
)]
pub async fn cancel_schedule(
    State(state): State<AppState>,
    Path(aoi_id): Path<i64>,
) -> Result<impl IntoResponse, MonitorError> {
    state.orchestrator.cancel_schedule(AoiId::new(aoi_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /aoi/{aoi_id}/baseline`: Build the baseline image.
///
/// # Errors
///
/// Returns [`MonitorError::AoiNotFound`], [`MonitorError::NotEligible`],
/// [`MonitorError::AlreadyInFlight`], or the acquisition/storage failure.
#[utoipa::path(
    post,
    path = "/api/v1/aoi/{aoi_id}/baseline",
    tag = "AOI",
    summary = "Create baseline",
    description = "Acquires and stores the reference image later analyses compare against. No tokens are charged.",
    params(
        ("aoi_id" = i64, Path, description = "AOI id"),
    ),
    responses(
        (status = 201, description = "Baseline stored", body = BaselineResponse),
        (status = 404, description = "AOI not found", body = ErrorResponse),
        (status = 409, description = "AOI busy or inactive", body = ErrorResponse),
        (status = 502, description = "Imagery provider failed", body = ErrorResponse),
    )
)]
pub async fn create_baseline(
    State(state): State<AppState>,
    Path(aoi_id): Path<i64>,
) -> Result<impl IntoResponse, MonitorError> {
    let reference = state.orchestrator.create_baseline(AoiId::new(aoi_id)).await?;
    Ok((
        StatusCode::CREATED,
        Json(BaselineResponse { aoi_id, reference }),
    ))
}

/// `GET /aoi/{aoi_id}/results`: Most recent analysis results.
///
/// # Errors
///
/// Returns [`MonitorError::AoiNotFound`] for an unknown AOI.
#[utoipa::path(
    get,
    path = "/api/v1/aoi/{aoi_id}/results",
    tag = "AOI",
    summary = "List results",
    description = "Analysis results of the AOI, newest first.",
    params(
        ("aoi_id" = i64, Path, description = "AOI id"),
        LimitParams,
    ),
    responses(
        (status = 200, description = "Analysis results", body = Vec<AnalysisResult>),
        (status = 404, description = "AOI not found", body = ErrorResponse),
    )
)]
pub async fn list_results(
    State(state): State<AppState>,
    Path(aoi_id): Path<i64>,
    Query(params): Query<LimitParams>,
) -> Result<impl IntoResponse, MonitorError> {
    let aoi_id = AoiId::new(aoi_id);
    if state.store.load_aoi(aoi_id).await?.is_none() {
        return Err(MonitorError::AoiNotFound(aoi_id));
    }
    let results = state
        .store
        .results_for_aoi(aoi_id, params.clamped(20, 100))
        .await?;
    Ok(Json(results))
}

/// AOI routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/aoi/{aoi_id}/schedule",
            put(update_schedule).delete(cancel_schedule),
        )
        .route("/aoi/{aoi_id}/baseline", post(create_baseline))
        .route("/aoi/{aoi_id}/results", get(list_results))
}
