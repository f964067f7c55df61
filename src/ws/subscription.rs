//! AOI filter kept by each WebSocket connection.
//!
//! Tracks which AOIs a WebSocket client follows and filters events
//! server-side.

use std::collections::HashSet;

use crate::domain::{AoiId, MonitoringEvent};

/// Manages the set of AOI subscriptions for a single WebSocket connection.
#[derive(Debug, Default)]
pub struct SubscriptionManager {
    /// Subscribed AOI ids. Ignored while `subscribe_all` is set.
    aoi_ids: HashSet<AoiId>,
    /// Wildcard `"*"` subscription.
    subscribe_all: bool,
}

impl SubscriptionManager {
    /// Filter that lets nothing through.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds AOI ids to the subscription set, optionally enabling the wildcard.
    pub fn subscribe(&mut self, ids: &[AoiId], wildcard: bool) {
        if wildcard {
            self.subscribe_all = true;
        }
        self.aoi_ids.extend(ids.iter().copied());
    }

    /// Removes AOI ids from the subscription set.
    pub fn unsubscribe(&mut self, ids: &[AoiId]) {
        for id in ids {
            self.aoi_ids.remove(id);
        }
    }

    /// Returns `true` if `event` should be forwarded. Events without an
    /// AOI reach wildcard subscribers only.
    #[must_use]
    pub fn matches(&self, event: &MonitoringEvent) -> bool {
        if self.subscribe_all {
            return true;
        }
        event.aoi_id().is_some_and(|id| self.aoi_ids.contains(&id))
    }

    /// Returns the number of explicitly subscribed AOIs.
    #[must_use]
    pub fn count(&self) -> usize {
        self.aoi_ids.len()
    }

    /// Whether the connection asked for every AOI with `"*"`.
    #[must_use]
    pub fn is_subscribed_all(&self) -> bool {
        self.subscribe_all
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn rescheduled(id: i64) -> MonitoringEvent {
        MonitoringEvent::Rescheduled {
            aoi_id: AoiId::new(id),
            next_run_at: None,
            timestamp: Utc::now(),
        }
    }

    fn sweep() -> MonitoringEvent {
        MonitoringEvent::SweepCompleted {
            selected: 0,
            dispatched: 0,
            skipped_in_flight: 0,
            deferred: 0,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn fresh_connection_receives_nothing() {
        let mgr = SubscriptionManager::new();
        assert!(!mgr.matches(&rescheduled(1)));
    }

    #[test]
    fn specific_aoi_filters_others_and_sweeps() {
        let mut mgr = SubscriptionManager::new();
        mgr.subscribe(&[AoiId::new(1)], false);
        assert!(mgr.matches(&rescheduled(1)));
        assert!(!mgr.matches(&rescheduled(2)));
        assert!(!mgr.matches(&sweep()));
    }

    #[test]
    fn wildcard_receives_sweep_and_aoi_events() {
        let mut mgr = SubscriptionManager::new();
        mgr.subscribe(&[], true);
        assert!(mgr.matches(&rescheduled(9)));
        assert!(mgr.matches(&sweep()));
    }

    #[test]
    fn unsubscribe_removes_aoi() {
        let mut mgr = SubscriptionManager::new();
        mgr.subscribe(&[AoiId::new(3), AoiId::new(4)], false);
        assert_eq!(mgr.count(), 2);
        mgr.unsubscribe(&[AoiId::new(3)]);
        assert!(!mgr.matches(&rescheduled(3)));
        assert_eq!(mgr.count(), 1);
    }
}
