//! Live event feed at `/ws`.
//!
//! Clients subscribe to AOI ids (or `"*"`) and receive the matching
//! [`MonitoringEvent`](crate::domain::MonitoringEvent)s as JSON frames.
//! `get_status` returns the same snapshot as the REST status endpoint.

pub mod connection;
pub mod handler;
pub mod messages;
pub mod subscription;
