//! Service layer: the monitoring core.
//!
//! [`MonitoringOrchestrator`] composes the [`SchedulingEngine`], the
//! [`JobExecutor`], the [`BaselineBuilder`] and the [`TokenLedger`], and
//! emits events through the [`super::domain::EventBus`].

pub mod baseline;
pub mod job_executor;
pub mod orchestrator;
pub mod scheduler;
pub mod token_ledger;

pub use baseline::BaselineBuilder;
pub use job_executor::JobExecutor;
pub use orchestrator::{MonitoringOrchestrator, ScheduleUpdate, SchedulerStatus, SweepSummary};
pub use scheduler::{InFlightGuard, InFlightRegistry, JobSlot, ScheduleChange, SchedulingEngine};
pub use token_ledger::{LedgerAudit, LedgerEntry, TokenLedger};
