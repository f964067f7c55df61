//! Shared DTO types used across multiple endpoints.

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

/// `?limit=` query parameter of list endpoints.
#[derive(Debug, Clone, Copy, Default, Deserialize, IntoParams)]
pub struct LimitParams {
    /// Maximum number of items to return.
    pub limit: Option<usize>,
}

impl LimitParams {
    /// Requested limit, or `default`, clamped to `1..=max`.
    #[must_use]
    pub fn clamped(self, default: usize, max: usize) -> usize {
        self.limit.unwrap_or(default).clamp(1, max)
    }
}

/// Acknowledgement of a lifecycle command.
#[derive(Debug, Clone, Copy, Serialize, ToSchema)]
pub struct LifecycleResponse {
    /// Whether the orchestrator is running after the command.
    pub is_running: bool,
    /// Whether the command changed the lifecycle state.
    pub changed: bool,
}
