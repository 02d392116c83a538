//! Buttons and console commands driven through the station loop: short
//! presses, the long-hold emergency clear and the single-letter commands.

mod common;

use std::time::Duration;

use common::{memory_tracker, station_rig, usgs_doc, usgs_only_config, Rig};
use disaster_alert::config::Config;
use disaster_alert::controls::{Button, ConsoleCommand, ScriptedButtons};
use disaster_alert::display::Screen;
use disaster_alert::feeds::{usgs, CannedFeeds};
use disaster_alert::mesh::health::HealthState;
use disaster_alert::station::RestartReason;
use tokio::sync::mpsc;

fn tokyo_feeds() -> CannedFeeds {
    let mut feeds = CannedFeeds::new();
    feeds.insert(usgs::DEFAULT_URL, usgs_doc(&[("q1", 7.2, "10km SW of Tokyo")]));
    feeds
}

/// Every delivered id is saved right away.
fn eager_config() -> Config {
    let mut config = usgs_only_config();
    config.storage.persist_every = 1;
    config
}

fn rig_with_buttons(config: &Config, feeds: CannedFeeds) -> (Rig, ScriptedButtons) {
    let buttons = ScriptedButtons::new();
    let mut rig = station_rig(config, feeds);
    rig.station = rig.station.with_buttons(Box::new(buttons.clone()));
    (rig, buttons)
}

fn count_sent(rig: &Rig, line: &str) -> usize {
    rig.transport.sent().iter().filter(|l| l.as_str() == line).count()
}

#[tokio::test(start_paused = true)]
async fn test_primary_short_press_sends_test_line() {
    let (mut rig, buttons) = rig_with_buttons(&usgs_only_config(), CannedFeeds::new());
    rig.station.tick().await;

    buttons.set(Button::Primary, true);
    assert!(rig.station.tick().await.is_none());
    rig.clock.advance_secs(1);
    buttons.set(Button::Primary, false);
    assert!(rig.station.tick().await.is_none());

    assert_eq!(rig.transport.sent(), vec!["TEST Disaster Alert".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_secondary_short_press_clears_and_refetches() {
    let (mut rig, buttons) = rig_with_buttons(&eager_config(), tokyo_feeds());
    rig.station.tick().await;
    assert!(rig.station.tracker().is_seen("usgs_q1"));
    rig.clock.advance_secs(60);

    buttons.set(Button::Secondary, true);
    rig.station.tick().await;
    rig.clock.advance_secs(1);
    buttons.set(Button::Secondary, false);
    assert!(rig.station.tick().await.is_none());

    assert_eq!(rig.station.feeds().requests().len(), 2);
    assert_eq!(count_sent(&rig, "QUAKE M7.2 Tokyo"), 2);
    assert!(matches!(rig.station.screen(), Screen::Alert(e) if e.title.as_str() == "Tokyo"));
}

#[tokio::test(start_paused = true)]
async fn test_long_hold_waits_for_store_then_restarts() {
    let config = eager_config();
    let (mut rig, buttons) = rig_with_buttons(&config, tokyo_feeds());

    // Delivering q1 saves the registry now, so the clear below lands inside
    // the minimum save interval.
    rig.station.tick().await;
    assert!(memory_tracker(&config, &rig.store, &rig.clock).is_seen("usgs_q1"));

    buttons.set(Button::Primary, true);
    rig.station.tick().await;
    rig.clock.advance_secs(3);

    let clock = rig.clock.clone();
    let (restart, _) = tokio::join!(rig.station.tick(), async {
        tokio::time::sleep(Duration::from_secs(1)).await;
        clock.advance_secs(60);
    });
    assert_eq!(restart, Some(RestartReason::EmergencyClear));

    let rebooted = memory_tracker(&config, &rig.store, &rig.clock);
    assert!(!rebooted.is_seen("usgs_q1"));
    assert_eq!(rebooted.seen_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unpersisted_emergency_clear_does_not_restart() {
    let config = eager_config();
    let (mut rig, buttons) = rig_with_buttons(&config, tokyo_feeds());
    rig.station.tick().await;

    buttons.set(Button::Secondary, true);
    rig.station.tick().await;
    rig.clock.advance_secs(3);

    // The wall clock never moves past the save interval.
    assert!(rig.station.tick().await.is_none());
    assert_eq!(rig.station.screen().name(), "error");
    assert!(memory_tracker(&config, &rig.store, &rig.clock).is_seen("usgs_q1"));
}

#[tokio::test(start_paused = true)]
async fn test_reset_command_restores_disabled_link() {
    let mut rig = station_rig(&usgs_only_config(), CannedFeeds::new());
    for _ in 0..3 {
        rig.transport.push_inbound(&[0x00; 32]);
        rig.station.tick().await;
    }
    assert_eq!(rig.station.link().state(), HealthState::Disabled);
    assert!(!rig.station.send_test_line());

    rig.station.handle_command(ConsoleCommand::Reset).await;
    assert_eq!(rig.station.link().state(), HealthState::Healthy);
    assert!(rig.station.send_test_line());
    assert_eq!(rig.transport.sent(), vec!["TEST Disaster Alert".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_clear_command_requeues_delivered_event() {
    let mut rig = station_rig(&eager_config(), tokyo_feeds());
    rig.station.tick().await;
    assert!(rig.station.tracker().is_seen("usgs_q1"));
    assert_eq!(rig.station.tracker().queue_len(), 0);

    rig.station.handle_command(ConsoleCommand::Clear).await;
    assert!(!rig.station.tracker().is_seen("usgs_q1"));
    assert!(rig.station.tracker().queue().contains("usgs_q1"));
    assert_eq!(count_sent(&rig, "QUAKE M7.2 Tokyo"), 2);
}

#[tokio::test(start_paused = true)]
async fn test_console_channel_commands_run_on_tick() {
    let (tx, rx) = mpsc::channel(4);
    let mut rig = station_rig(&usgs_only_config(), CannedFeeds::new());
    rig.station = rig.station.with_console(rx);

    tx.try_send(ConsoleCommand::parse('t').unwrap()).unwrap();
    tx.try_send(ConsoleCommand::parse('W').unwrap()).unwrap();
    assert!(rig.station.tick().await.is_none());
    assert_eq!(rig.transport.sent(), vec!["TEST Disaster Alert".to_string()]);
}
