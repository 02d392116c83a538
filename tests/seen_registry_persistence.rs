//! Seen registry capacity, FIFO overwrite and persistence across restarts.

mod common;

use std::sync::Arc;

use common::memory_tracker;
use disaster_alert::config::Config;
use disaster_alert::event::{AlertLevel, CanonicalEvent};
use disaster_alert::station::build_tracker;
use disaster_alert::storage::guard::{GuardPolicy, StoreGuard};
use disaster_alert::storage::{FileStore, MemoryStore, StoreLayout, DEFAULT_STORE_SIZE};
use disaster_alert::system::ManualClock;
use disaster_alert::tracker::registry::SeenRegistry;
use tempfile::tempdir;

fn registry(store: &MemoryStore, clock: &ManualClock, persist_every: u32) -> SeenRegistry {
    let guard = StoreGuard::open(
        Box::new(store.reopen()),
        StoreLayout::new(DEFAULT_STORE_SIZE, 50).unwrap(),
        GuardPolicy::default(),
        Arc::new(clock.clone()),
    );
    SeenRegistry::load(guard, persist_every)
}

#[test]
fn test_registry_never_exceeds_capacity() {
    let store = MemoryStore::new(DEFAULT_STORE_SIZE);
    let clock = ManualClock::default();
    let mut reg = registry(&store, &clock, 5);

    for i in 0..120 {
        let id = format!("gdacs_{i}");
        reg.mark_seen(&id);
        assert!(reg.len() <= reg.capacity());
        assert!(reg.is_seen(&id), "{id} must be a member right after marking");
    }
    assert_eq!(reg.len(), 50);
    // Oldest 70 have been overwritten in insertion order.
    assert!(!reg.is_seen("gdacs_69"));
    assert!(reg.is_seen("gdacs_70"));
}

#[test]
fn test_fifty_first_id_evicts_first() {
    let store = MemoryStore::new(DEFAULT_STORE_SIZE);
    let clock = ManualClock::default();
    let mut reg = registry(&store, &clock, 5);
    for i in 0..50 {
        reg.mark_seen(&format!("usgs_{i}"));
    }
    assert!(reg.is_seen("usgs_0"));
    reg.mark_seen("usgs_50");
    assert!(!reg.is_seen("usgs_0"));
    assert!(reg.is_seen("usgs_1"));
    assert_eq!(reg.len(), 50);
}

#[test]
fn test_history_survives_reboot_when_saved() {
    let store = MemoryStore::new(DEFAULT_STORE_SIZE);
    let clock = ManualClock::default();
    {
        let mut reg = registry(&store, &clock, 5);
        for i in 0..5 {
            reg.mark_seen(&format!("eonet_{i}"));
        }
        assert_eq!(reg.guard().budget().lifetime_write_count, 1);
        // Sixth mark stays in memory only.
        reg.mark_seen("eonet_5");
    }
    let reg = registry(&store, &clock, 5);
    assert_eq!(reg.len(), 5);
    assert!(reg.is_seen("eonet_4"));
    assert!(!reg.is_seen("eonet_5"));
    assert_eq!(reg.guard().budget().lifetime_write_count, 1);
}

#[test]
fn test_rapid_batches_are_rate_limited() {
    let store = MemoryStore::new(DEFAULT_STORE_SIZE);
    let clock = ManualClock::default();
    let mut reg = registry(&store, &clock, 5);
    for i in 0..10 {
        reg.mark_seen(&format!("noaa_{i}"));
    }
    // Second save came within the minimum interval and was refused.
    assert_eq!(reg.guard().budget().lifetime_write_count, 1);

    clock.advance_secs(30);
    assert!(reg.flush().unwrap().is_saved());
    assert_eq!(reg.guard().budget().lifetime_write_count, 2);
    assert!(reg.flush().is_none());
}

#[test]
fn test_corrupted_block_starts_fresh() {
    let store = MemoryStore::new(DEFAULT_STORE_SIZE);
    let clock = ManualClock::default();
    {
        let mut reg = registry(&store, &clock, 1);
        reg.mark_seen("usgs_a");
    }
    // Flip a byte inside the first slot.
    store.poke(7, b"X");
    let reg = registry(&store, &clock, 1);
    assert!(reg.is_empty());
    assert!(reg.persistence_valid());
}

#[tokio::test]
async fn test_file_store_round_trip_through_tracker() {
    let dir = tempdir().unwrap();
    let mut config = Config::default();
    config.storage.path = dir.path().join("alert.store").display().to_string();
    config.storage.persist_every = 1;
    let clock = ManualClock::default();

    {
        let store = FileStore::open(&config.storage.path, config.storage.size).unwrap();
        let mut tracker =
            build_tracker(&config, Box::new(store), Arc::new(clock.clone())).unwrap();
        let ev = CanonicalEvent::new("usgs_file", "EQ", "Tokyo", "Japan", 7.2, AlertLevel::Red)
            .unwrap();
        assert!(tracker.enqueue(ev));
        tracker.dequeue().unwrap();
    }

    let store = FileStore::open(&config.storage.path, config.storage.size).unwrap();
    let tracker = build_tracker(&config, Box::new(store), Arc::new(clock)).unwrap();
    assert!(tracker.is_seen("usgs_file"));
    assert_eq!(tracker.registry().guard().budget().lifetime_write_count, 1);
}

#[test]
fn test_clear_history_is_persisted() {
    let config = Config::default();
    let store = MemoryStore::new(config.storage.size);
    let clock = ManualClock::default();
    {
        let mut reg = registry(&store, &clock, 1);
        reg.mark_seen("usgs_a");
    }
    {
        let mut tracker = memory_tracker(&config, &store, &clock);
        assert!(tracker.is_seen("usgs_a"));
        assert!(tracker.clear_history().is_saved());
    }
    let tracker = memory_tracker(&config, &store, &clock);
    assert_eq!(tracker.seen_count(), 0);
}
