//! Token account handlers.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};

use crate::api::dto::{GrantRequest, LimitParams, TokensResponse};
use crate::app_state::AppState;
use crate::domain::{CreditRequest, UserId};
use crate::error::{ErrorResponse, MonitorError};
use crate::service::{LedgerAudit, LedgerEntry};

/// `GET /users/{user_id}/tokens`: Balance and recent transactions.
///
/// # Errors
///
/// Returns [`MonitorError::AccountNotFound`] if the user has no account.
#[utoipa::path(
    get,
    path = "/api/v1/users/{user_id}/tokens",
    tag = "Tokens",
    summary = "Token account",
    description = "Current balance, lifetime usage and the most recent transactions.",
    params(
        ("user_id" = i64, Path, description = "User id"),
        LimitParams,
    ),
    responses(
        (status = 200, description = "Account state", body = TokensResponse),
        (status = 404, description = "Account not found", body = ErrorResponse),
    )
)]
pub async fn get_tokens(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Query(params): Query<LimitParams>,
) -> Result<impl IntoResponse, MonitorError> {
    let user = UserId::new(user_id);
    let account = state.ledger.account(user).await?;
    let transactions = state.ledger.history(user, params.clamped(50, 500)).await?;
    Ok(Json(TokensResponse {
        account,
        transactions,
    }))
}

/// `POST /users/{user_id}/tokens`: Administrative grant.
///
/// # Errors
///
/// Returns [`MonitorError::InvalidRequest`] for a non-positive amount.
#[utoipa::path(
    post,
    path = "/api/v1/users/{user_id}/tokens",
    tag = "Tokens",
    summary = "Grant tokens",
    description = "Credits tokens as an `admin_grant` transaction. The account is created on first credit.",
    params(
        ("user_id" = i64, Path, description = "User id"),
    ),
    request_body = GrantRequest,
    responses(
        (status = 201, description = "Tokens credited", body = LedgerEntry),
        (status = 400, description = "Invalid amount", body = ErrorResponse),
    )
)]
pub async fn grant_tokens(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Json(req): Json<GrantRequest>,
) -> Result<impl IntoResponse, MonitorError> {
    let entry = state
        .ledger
        .credit(
            UserId::new(user_id),
            CreditRequest::admin_grant(req.amount, req.admin_user_id, req.note),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

/// `GET /users/{user_id}/tokens/audit`: Replay the transaction log.
///
/// # Errors
///
/// Returns [`MonitorError::AccountNotFound`] if the user has no account.
#[utoipa::path(
    get,
    path = "/api/v1/users/{user_id}/tokens/audit",
    tag = "Tokens",
    summary = "Audit ledger",
    description = "Replays every transaction and compares the result with the stored balance and lifetime usage.",
    params(
        ("user_id" = i64, Path, description = "User id"),
    ),
    responses(
        (status = 200, description = "Audit result", body = LedgerAudit),
        (status = 404, description = "Account not found", body = ErrorResponse),
    )
)]
pub async fn audit_tokens(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<impl IntoResponse, MonitorError> {
    Ok(Json(state.ledger.audit(UserId::new(user_id)).await?))
}

/// Token routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/users/{user_id}/tokens", get(get_tokens).post(grant_tokens))
        .route("/users/{user_id}/tokens/audit", get(audit_tokens))
}
