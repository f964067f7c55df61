//! # vantage-monitor
//!
//! Scheduled change detection over satellite imagery of user-defined
//! areas of interest (AOIs).
//!
//! The orchestrator periodically sweeps for AOIs whose next run is due,
//! charges the owner's token account, acquires a current image, compares
//! it against the stored baseline, persists the result and computes the
//! next run. Exact-time timers and forced runs share the same pipeline and
//! the same per-AOI in-flight marker, so an AOI is never analysed twice
//! concurrently.
//!
//! ## Architecture
//!
//! ```text
//! Clients (HTTP, WebSocket)
//!     │
//!     ├── REST Handlers (api/)
//!     ├── WS Handler (ws/)
//!     │
//!     ├── MonitoringOrchestrator (service/)
//!     │     ├── SchedulingEngine   sweep, timers, in-flight markers, slots
//!     │     ├── JobExecutor        debit → acquire → compare → persist
//!     │     ├── BaselineBuilder
//!     │     └── TokenLedger
//!     ├── EventBus (domain/)
//!     │
//!     ├── ChangeDetector (detection/)
//!     ├── ImageProvider (provider/)      Sentinel Hub
//!     ├── ArtifactStore (artifacts/)     local filesystem
//!     └── Persistence (persistence/)     PostgreSQL or in-memory
//! ```

pub mod api;
pub mod app_state;
pub mod artifacts;
pub mod config;
pub mod detection;
pub mod domain;
pub mod error;
pub mod persistence;
pub mod provider;
pub mod service;
pub mod ws;

#[cfg(test)]
pub(crate) mod test_support;
