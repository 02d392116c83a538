//! A strong quake travels normalizer -> queue -> display -> registry, and the
//! same record fetched again is not shown twice.

mod common;

use common::{station_rig, usgs_doc, usgs_only_config};
use disaster_alert::display::Screen;
use disaster_alert::event::AlertLevel;
use disaster_alert::feeds::{usgs, CannedFeeds, Source, UsgsSource};

#[test]
fn test_tokyo_record_normalizes_to_red() {
    let doc = usgs_doc(&[("us7000m9g4", 7.2, "10km SW of Tokyo")]);
    let src = UsgsSource::default();
    let records = src.records(&doc);
    let ev = src.normalize(records[0]).unwrap();
    assert_eq!(ev.alert_level, AlertLevel::Red);
    assert_eq!(ev.title.as_str(), "Tokyo");
    assert_eq!(ev.id.as_str(), "usgs_us7000m9g4");
}

#[tokio::test(start_paused = true)]
async fn test_delivered_event_is_not_refetched() {
    let config = usgs_only_config();
    let mut feeds = CannedFeeds::new();
    feeds.insert(
        usgs::DEFAULT_URL,
        usgs_doc(&[("us7000m9g4", 7.2, "10km SW of Tokyo")]),
    );
    let mut rig = station_rig(&config, feeds);

    // First pass fetches, queues and immediately shows the alert.
    assert!(rig.station.tick().await.is_none());
    match rig.station.screen() {
        Screen::Alert(ev) => {
            assert_eq!(ev.title.as_str(), "Tokyo");
            assert!(ev.freshly_observed);
        }
        other => panic!("expected alert screen, got {}", other.name()),
    }
    assert!(rig.station.tracker().is_seen("usgs_us7000m9g4"));
    assert_eq!(rig.transport.sent(), vec!["QUAKE M7.2 Tokyo".to_string()]);

    // Next cycle with the identical document yields nothing new.
    let report = rig.station.fetch_cycle().await;
    assert_eq!(report.sources_ok, 1);
    assert_eq!(report.new_events, 0);
    assert_eq!(report.relayed, 0);
    assert_eq!(rig.station.tracker().queue_len(), 0);
    assert_eq!(rig.transport.sent().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_next_fetch_waits_for_interval() {
    let config = usgs_only_config();
    let mut feeds = CannedFeeds::new();
    feeds.insert(usgs::DEFAULT_URL, usgs_doc(&[("a", 5.0, "Fiji region")]));
    let mut rig = station_rig(&config, feeds);

    rig.station.tick().await;
    assert_eq!(rig.station.feeds().requests().len(), 1);

    rig.clock.advance_secs(config.station.fetch_interval_secs as i64 - 1);
    rig.station.tick().await;
    assert_eq!(rig.station.feeds().requests().len(), 1);

    rig.clock.advance_secs(1);
    rig.station.tick().await;
    assert_eq!(rig.station.feeds().requests().len(), 2);
}
