//! A full fetch cycle over all four sources: fixed order, per-source record
//! cap, failure isolation and one relay flush at the end.

mod common;

use common::{station_rig, usgs_doc};
use disaster_alert::config::Config;
use disaster_alert::feeds::{eonet, gdacs, noaa, usgs, CannedFeeds};
use serde_json::json;

fn all_sources_config() -> Config {
    let mut config = Config::default();
    config.station.announce = false;
    config.relay.queue_capacity = 10;
    config
}

fn canned_feeds() -> CannedFeeds {
    let mut feeds = CannedFeeds::new();
    feeds.insert(
        usgs::DEFAULT_URL,
        usgs_doc(&[
            ("q1", 7.2, "10km SW of Tokyo"),
            ("q2", 5.6, "45 km NNE of Hualien City, Taiwan"),
        ]),
    );
    feeds.insert(
        gdacs::DEFAULT_URL,
        json!({ "features": [{ "properties": {
            "eventid": 1001234,
            "eventtype": "TC",
            "name": "Cyclone Mocha",
            "country": "Myanmar",
            "alertlevel": "Red",
            "severitydata": { "severity": 250.0 }
        }}]}),
    );
    feeds.insert(
        eonet::DEFAULT_URL,
        json!({ "events": [{
            "id": "EONET_6543",
            "title": "Bush Fire, Queensland",
            "categories": [{ "id": "wildfires", "title": "Wildfires" }]
        }]}),
    );
    feeds.insert(
        noaa::DEFAULT_URL,
        json!([{
            "product_id": "K07A",
            "issue_datetime": "2024-05-10 17:02:15.513",
            "message": "ALERT: Geomagnetic K-index of 7\r\nNOAA Scale: G3 - Strong"
        }]),
    );
    feeds
}

#[tokio::test(start_paused = true)]
async fn test_sources_are_fetched_in_fixed_order() {
    let config = all_sources_config();
    let mut rig = station_rig(&config, canned_feeds());

    let report = rig.station.fetch_cycle().await;
    assert_eq!(report.sources_ok, 4);
    assert_eq!(report.new_events, 5);
    assert_eq!(
        rig.station.feeds().requests(),
        [
            usgs::DEFAULT_URL.to_string(),
            gdacs::DEFAULT_URL.to_string(),
            eonet::DEFAULT_URL.to_string(),
            noaa::DEFAULT_URL.to_string(),
        ]
    );

    let ids: Vec<&str> = rig
        .station
        .tracker()
        .queue()
        .iter()
        .map(|e| e.id.as_str())
        .collect();
    assert_eq!(
        ids,
        vec![
            "usgs_q1",
            "usgs_q2",
            "gdacs_1001234",
            "eonet_EONET_6543",
            "noaa_K07A_20240510170215513",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_relay_lines_are_flushed_once_per_cycle() {
    let config = all_sources_config();
    let mut rig = station_rig(&config, canned_feeds());

    let report = rig.station.fetch_cycle().await;
    assert_eq!(report.relayed, 5);
    let sent = rig.transport.sent();
    assert_eq!(sent[0], "QUAKE M7.2 Tokyo");
    assert_eq!(sent[1], "QUAKE M5.6 Hualien City Taiwan");
    assert!(sent[2].starts_with("CYCLONE"));
    assert_eq!(sent[3], "FIRE Bush Fire Queensland");
    assert!(sent.iter().all(|line| line.len() <= 79));
    assert!(rig.station.tracker().relay().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_failed_source_does_not_stop_the_cycle() {
    let config = all_sources_config();
    let mut feeds = canned_feeds();
    feeds.remove(gdacs::DEFAULT_URL);
    feeds.insert(eonet::DEFAULT_URL, json!("not an object"));
    let mut rig = station_rig(&config, feeds);

    let report = rig.station.fetch_cycle().await;
    assert_eq!(report.sources_failed, 1);
    assert_eq!(report.sources_ok, 3);
    // usgs (2) + noaa (1); the eonet document had no records.
    assert_eq!(report.new_events, 3);
}

#[tokio::test(start_paused = true)]
async fn test_records_beyond_cap_are_ignored() {
    let config = all_sources_config();
    let mut feeds = CannedFeeds::new();
    let many: Vec<(String, f64, String)> = (0..8)
        .map(|i| (format!("q{i}"), 4.5 + i as f64 / 10.0, format!("Place {i}")))
        .collect();
    let records: Vec<(&str, f64, &str)> = many
        .iter()
        .map(|(id, mag, place)| (id.as_str(), *mag, place.as_str()))
        .collect();
    feeds.insert(usgs::DEFAULT_URL, usgs_doc(&records));
    let mut rig = station_rig(&config, feeds);

    let report = rig.station.fetch_cycle().await;
    assert_eq!(report.new_events, 5);
    assert!(!rig.station.tracker().queue().contains("usgs_q5"));
    assert_eq!(report.sources_failed, 3);
}

#[tokio::test(start_paused = true)]
async fn test_disabled_source_is_not_requested() {
    let mut config = all_sources_config();
    config.feeds.noaa.enabled = false;
    let mut rig = station_rig(&config, canned_feeds());
    rig.station.fetch_cycle().await;
    assert_eq!(rig.station.feeds().requests().len(), 3);
    assert!(!rig.station.tracker().queue().iter().any(|e| e.id.starts_with("noaa_")));
}
