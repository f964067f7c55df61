//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use crate::domain::EventBus;
use crate::persistence::Persistence;
use crate::service::{MonitoringOrchestrator, TokenLedger};

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Scheduler lifecycle, sweeps, forced runs and schedule edits.
    pub orchestrator: Arc<MonitoringOrchestrator>,
    /// Token accounts and their transaction log.
    pub ledger: TokenLedger,
    /// Event bus for WebSocket subscriptions.
    pub event_bus: EventBus,
    /// Read access to AOIs and analysis results.
    pub store: Arc<dyn Persistence>,
}

impl AppState {
    /// Builds the state around an orchestrator, sharing its ledger and bus.
    #[must_use]
    pub fn new(orchestrator: Arc<MonitoringOrchestrator>, store: Arc<dyn Persistence>) -> Self {
        Self {
            ledger: orchestrator.ledger().clone(),
            event_bus: orchestrator.event_bus().clone(),
            orchestrator,
            store,
        }
    }
}
