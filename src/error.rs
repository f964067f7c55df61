//! Service error types with HTTP status code mapping.
//!
//! [`MonitorError`] is the central error type for the monitoring service.
//! Each variant maps to a specific HTTP status code and structured JSON
//! error response. Job-level failures never surface here: they are folded
//! into a [`crate::domain::JobOutcome`] instead.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

use crate::artifacts::ArtifactError;
use crate::domain::{AoiId, UserId};
use crate::provider::AcquisitionError;

/// Structured JSON error response body.
///
/// All error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 4001,
///     "message": "insufficient tokens for user 7: balance 0, requested 1",
///     "details": null
///   }
/// }
/// ```
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Numeric error code.
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Server-side error enum with HTTP status code mapping.
///
/// # Error Code Ranges
///
/// | Range     | Category        | HTTP Status                  |
/// |-----------|-----------------|------------------------------|
/// | 1000–1999 | Validation      | 400 Bad Request              |
/// | 2000–2999 | State/Not Found | 404 Not Found / 409 Conflict |
/// | 3000–3999 | Server          | 500 / 502 / 504              |
/// | 4000–4999 | Ledger          | 422 Unprocessable Entity     |
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    /// AOI with the given ID was not found.
    #[error("aoi not found: {0}")]
    AoiNotFound(AoiId),

    /// Token account for the given user was not found.
    #[error("token account not found for user {0}")]
    AccountNotFound(UserId),

    /// Request validation failed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// AOI is not in a state that allows the operation.
    #[error("aoi {0} is not eligible: {1}")]
    NotEligible(AoiId, String),

    /// Balance cannot cover the requested debit.
    #[error("insufficient tokens for user {user_id}: balance {balance}, requested {requested}")]
    InsufficientFunds {
        /// Account owner.
        user_id: UserId,
        /// Balance at the time of the attempt.
        balance: i64,
        /// Requested debit.
        requested: i64,
    },

    /// Another execution already holds the in-flight marker for this AOI.
    #[error("analysis already in flight for aoi {0}")]
    AlreadyInFlight(AoiId),

    /// Orchestrator is not running.
    #[error("scheduler is not running")]
    NotRunning,

    /// Imagery provider failure.
    #[error(transparent)]
    Acquisition(#[from] AcquisitionError),

    /// Artifact store failure.
    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    /// Persistence layer failure.
    #[error("persistence error: {0}")]
    PersistenceError(String),

    /// Operation exceeded its time budget.
    #[error("operation timed out after {0} s")]
    Timeout(u64),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl MonitorError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::InvalidRequest(_) => 1001,
            Self::AoiNotFound(_) => 2001,
            Self::AccountNotFound(_) => 2002,
            Self::AlreadyInFlight(_) => 2003,
            Self::NotEligible(..) => 2004,
            Self::NotRunning => 2005,
            Self::Internal(_) => 3000,
            Self::PersistenceError(_) => 3001,
            Self::Artifact(_) => 3002,
            Self::Acquisition(_) => 3003,
            Self::Timeout(_) => 3004,
            Self::InsufficientFunds { .. } => 4001,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::AoiNotFound(_) | Self::AccountNotFound(_) => StatusCode::NOT_FOUND,
            Self::AlreadyInFlight(_) | Self::NotEligible(..) | Self::NotRunning => {
                StatusCode::CONFLICT
            }
            Self::InsufficientFunds { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Acquisition(_) => StatusCode::BAD_GATEWAY,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::PersistenceError(_) | Self::Artifact(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for MonitorError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
                details: None,
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_flight_maps_to_conflict() {
        let err = MonitorError::AlreadyInFlight(AoiId::new(4));
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(err.error_code(), 2003);
    }

    #[test]
    fn insufficient_funds_message_carries_amounts() {
        let err = MonitorError::InsufficientFunds {
            user_id: UserId::new(7),
            balance: 0,
            requested: 1,
        };
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            err.to_string(),
            "insufficient tokens for user 7: balance 0, requested 1"
        );
    }
}
