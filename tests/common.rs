//! Test utilities & fixtures shared by the integration tests.

use std::sync::Arc;

use disaster_alert::config::Config;
use disaster_alert::feeds::CannedFeeds;
use disaster_alert::mesh::health::LinkHealth;
use disaster_alert::mesh::{MeshLink, MockTransport};
use disaster_alert::station::{build_tracker, Station};
use disaster_alert::storage::MemoryStore;
use disaster_alert::system::{FixedMemory, ManualClock, MemoryGuard, SharedClock};
use disaster_alert::tracker::EventTracker;
use serde_json::{json, Value};

/// Default configuration with only the USGS source enabled and no startup
/// announcement, so relay output is exactly what a fetch produced.
#[allow(dead_code)]
pub fn usgs_only_config() -> Config {
    let mut config = Config::default();
    config.feeds.gdacs.enabled = false;
    config.feeds.eonet.enabled = false;
    config.feeds.noaa.enabled = false;
    config.station.announce = false;
    config
}

/// USGS GeoJSON document with one feature per `(id, mag, place)`.
#[allow(dead_code)]
pub fn usgs_doc(records: &[(&str, f64, &str)]) -> Value {
    let features: Vec<Value> = records
        .iter()
        .map(|(id, mag, place)| json!({ "id": id, "properties": { "mag": mag, "place": place } }))
        .collect();
    json!({ "type": "FeatureCollection", "features": features })
}

/// Tracker over an in-memory store; clone `store` first to reopen it later.
#[allow(dead_code)]
pub fn memory_tracker(config: &Config, store: &MemoryStore, clock: &ManualClock) -> EventTracker {
    build_tracker(config, Box::new(store.reopen()), Arc::new(clock.clone())).unwrap()
}

pub struct Rig {
    pub station: Station<CannedFeeds>,
    pub transport: MockTransport,
    pub clock: ManualClock,
    pub store: MemoryStore,
}

/// A station over in-memory collaborators with plenty of memory.
#[allow(dead_code)]
pub fn station_rig(config: &Config, feeds: CannedFeeds) -> Rig {
    let clock = ManualClock::default();
    let shared: SharedClock = Arc::new(clock.clone());
    let store = MemoryStore::new(config.storage.size);
    let tracker = memory_tracker(config, &store, &clock);
    let transport = MockTransport::new();
    let link = MeshLink::new(
        Box::new(transport.clone()),
        LinkHealth::new(config.link.health_config(), shared.clone()),
    );
    let station = Station::new(config, tracker, link, feeds, shared).with_memory(MemoryGuard::new(
        Box::new(FixedMemory::new(u64::MAX)),
        config.memory.low_bytes,
        config.memory.critical_bytes,
    ));
    Rig {
        station,
        transport,
        clock,
        store,
    }
}
