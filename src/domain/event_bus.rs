//! Broadcast channel for monitoring events.
//!
//! [`EventBus`] wraps a [`tokio::sync::broadcast`] channel. The orchestrator
//! publishes a [`MonitoringEvent`] for every job transition, and every
//! WebSocket connection subscribes to receive filtered events.

use tokio::sync::broadcast;

use super::MonitoringEvent;

/// Broadcast bus for [`MonitoringEvent`]s. Publishing never blocks; a
/// receiver that falls more than `capacity` events behind loses the oldest.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<MonitoringEvent>,
}

impl EventBus {
    /// Bus whose receivers may fall `capacity` events behind.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes an event and returns how many receivers got it. Without
    /// receivers the event is dropped.
    pub fn publish(&self, event: MonitoringEvent) -> usize {
        let kind = event.event_type_str();
        let aoi_id = event.aoi_id();
        let delivered = self.sender.send(event).unwrap_or(0);
        tracing::trace!(event = kind, ?aoi_id, delivered, "monitoring event published");
        delivered
    }

    /// Receiver for events published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<MonitoringEvent> {
        self.sender.subscribe()
    }

    /// Open receivers, one per live WebSocket plus any internal listeners.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
