//! REST endpoint handlers organized by resource.

pub mod aoi;
pub mod scheduler;
pub mod system;
pub mod tokens;

use axum::Router;

use crate::app_state::AppState;

/// Composes all resource routes under `/api/v1`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .merge(scheduler::routes())
        .merge(aoi::routes())
        .merge(tokens::routes())
}
