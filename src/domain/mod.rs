//! Domain layer: core types and the event system.
//!
//! This module contains the server-side domain model including AOI
//! identity and scheduling state, the token ledger records, analysis
//! results, job outcomes, and the event bus for broadcasting state changes.

pub mod analysis;
pub mod aoi;
pub mod date_window;
pub mod event_bus;
pub mod ids;
pub mod job;
pub mod monitoring_event;
pub mod tokens;

pub use analysis::{AnalysisMetadata, AnalysisResult, ArtifactRefs, NewAnalysisResult, QualityFlag};
pub use aoi::{Aoi, BaselineStatus, BoundingBox, DueAoi, MonitoringFrequency};
pub use date_window::DateWindow;
pub use event_bus::EventBus;
pub use ids::{AoiId, ProcessId, UserId};
pub use job::{FailureReason, JobOutcome, JobReport, ScheduledJob, SkipReason, Trigger};
pub use monitoring_event::MonitoringEvent;
pub use tokens::{CreditRequest, TokenAccount, TokenTransaction, TransactionType};
