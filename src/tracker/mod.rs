//! # Event Tracker
//!
//! Single owner of the pipeline state that outlives one loop pass: the
//! seen-event registry (and through it the store guard), the display queue
//! and the outbound relay staging queue. Everything is mutated from the
//! station's control loop only.
//!
//! An event is recorded as seen when it is *delivered* (dequeued for display),
//! not when it is queued; an event evicted from a full queue before it was
//! shown can therefore come back on a later fetch.

pub mod queue;
pub mod registry;

use log::{debug, info, warn};

use crate::event::CanonicalEvent;
use crate::logutil::escape_log;
use crate::mesh::relay::{format_summary, RelayFramer};
use crate::mesh::MeshLink;
use crate::metrics;
use crate::storage::guard::SaveOutcome;
use crate::system::Watchdog;
use queue::DisplayQueue;
use registry::SeenRegistry;

pub struct EventTracker {
    registry: SeenRegistry,
    queue: DisplayQueue,
    relay: RelayFramer,
}

impl EventTracker {
    pub fn new(registry: SeenRegistry, queue: DisplayQueue, relay: RelayFramer) -> Self {
        Self {
            registry,
            queue,
            relay,
        }
    }

    pub fn registry(&self) -> &SeenRegistry {
        &self.registry
    }

    pub fn queue(&self) -> &DisplayQueue {
        &self.queue
    }

    pub fn relay(&self) -> &RelayFramer {
        &self.relay
    }

    pub fn is_seen(&self, id: &str) -> bool {
        self.registry.is_seen(id)
    }

    pub fn seen_count(&self) -> usize {
        self.registry.len()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Queue an event unless it has already been delivered or is already
    /// waiting. On success the event is flagged fresh and its summary is
    /// staged for relay.
    pub fn enqueue(&mut self, mut event: CanonicalEvent) -> bool {
        if event.id.is_empty() || self.registry.is_seen(&event.id) {
            return false;
        }
        if self.queue.contains(&event.id) {
            debug!("[TRACKER] {} already queued", event.id);
            return false;
        }
        event.freshly_observed = true;
        let summary = format_summary(&event);
        info!(
            "[TRACKER] queued {} {} ({}) queue {}/{}",
            event.kind_name(),
            escape_log(&event.title),
            event.alert_level,
            self.queue.len() + 1,
            self.queue.capacity()
        );
        if let Some(evicted) = self.queue.push(event) {
            warn!("[TRACKER] display queue full, dropped oldest: {}", evicted.id);
            metrics::inc_queue_evictions();
        }
        metrics::inc_events_queued();
        self.relay.stage(&summary);
        true
    }

    /// Take the next event for display and record it as seen.
    pub fn dequeue(&mut self) -> Option<CanonicalEvent> {
        let event = self.queue.pop()?;
        self.registry.mark_seen(&event.id);
        Some(event)
    }

    /// Start of a fetch cycle: anything still staged from a previous cycle is
    /// discarded.
    pub fn begin_cycle(&mut self) {
        if !self.relay.is_empty() {
            debug!("[TRACKER] discarding {} stale relay lines", self.relay.len());
        }
        self.relay.clear();
    }

    /// Stage an arbitrary line (e.g. a test message).
    pub fn stage_relay(&mut self, text: &str) -> bool {
        self.relay.stage(text)
    }

    pub async fn flush_relay(&mut self, link: &mut MeshLink, watchdog: &dyn Watchdog) -> usize {
        self.relay.flush(link, watchdog).await
    }

    /// Forget all delivered ids and drop anything waiting.
    pub fn clear_history(&mut self) -> SaveOutcome {
        self.queue.clear();
        self.relay.clear();
        self.registry.clear_all()
    }

    /// Offer unsaved registry marks to the store (shutdown path).
    pub fn flush_registry(&mut self) -> Option<SaveOutcome> {
        self.registry.flush()
    }

    /// One-line report for the console write-count command.
    pub fn write_report(&self) -> String {
        format!(
            "{}; seen {}/{}",
            self.registry.guard().report(),
            self.registry.len(),
            self.registry.capacity()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::AlertLevel;
    use crate::mesh::relay::RelayConfig;
    use crate::storage::guard::{GuardPolicy, StoreGuard};
    use crate::storage::{MemoryStore, StoreLayout, DEFAULT_STORE_SIZE};
    use crate::system::ManualClock;
    use std::sync::Arc;

    fn tracker() -> EventTracker {
        let clock = ManualClock::default();
        let guard = StoreGuard::open(
            Box::new(MemoryStore::new(DEFAULT_STORE_SIZE)),
            StoreLayout::new(DEFAULT_STORE_SIZE, 50).unwrap(),
            GuardPolicy::default(),
            Arc::new(clock),
        );
        EventTracker::new(
            SeenRegistry::load(guard, registry::DEFAULT_PERSIST_EVERY),
            DisplayQueue::new(5),
            RelayFramer::new(RelayConfig::default()),
        )
    }

    fn ev(id: &str) -> CanonicalEvent {
        CanonicalEvent::new(id, "EQ", "Tokyo", "Japan", 7.2, AlertLevel::Red).unwrap()
    }

    #[test]
    fn enqueue_flags_fresh_and_stages_summary() {
        let mut t = tracker();
        assert!(t.enqueue(ev("usgs_a")));
        assert!(t.queue().iter().all(|e| e.freshly_observed));
        assert_eq!(t.relay().pending(), ["QUAKE M7.2 Tokyo".to_string()]);
    }

    #[test]
    fn duplicate_pending_event_is_not_requeued() {
        let mut t = tracker();
        assert!(t.enqueue(ev("usgs_a")));
        assert!(!t.enqueue(ev("usgs_a")));
        assert_eq!(t.queue_len(), 1);
        assert_eq!(t.relay().len(), 1);
    }

    #[test]
    fn seen_is_recorded_at_delivery() {
        let mut t = tracker();
        t.enqueue(ev("usgs_a"));
        assert!(!t.is_seen("usgs_a"));
        assert_eq!(t.dequeue().unwrap().id.as_str(), "usgs_a");
        assert!(t.is_seen("usgs_a"));
        assert!(!t.enqueue(ev("usgs_a")));
        assert!(t.dequeue().is_none());
    }

    #[test]
    fn clear_history_empties_everything() {
        let mut t = tracker();
        t.enqueue(ev("usgs_a"));
        t.dequeue();
        t.enqueue(ev("usgs_b"));
        assert!(t.clear_history().is_saved());
        assert_eq!(t.seen_count(), 0);
        assert_eq!(t.queue_len(), 0);
        assert!(t.relay().is_empty());
    }
}
