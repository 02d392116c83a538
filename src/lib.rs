//! # Disaster Alert - Hazard Feed Station for Meshtastic Networks
//!
//! Disaster Alert polls public hazard feeds (USGS earthquakes, GDACS
//! multi-hazard alerts, NASA EONET natural events, NOAA SWPC space weather),
//! deduplicates what it has already shown, presents new events on a small
//! display, and relays one-line summaries over a Meshtastic radio attached by
//! serial.
//!
//! ## Features
//!
//! - **Canonical Events**: every feed record becomes one bounded [`event::CanonicalEvent`] with a source-prefixed id and a Green/Orange/Red alert level.
//! - **Bounded Dedup Registry**: the last 50 delivered ids, persisted with a CRC-protected block.
//! - **Wear-Limited Persistence**: all store writes go through a guard enforcing a minimum interval, an hourly cap and a lifetime budget.
//! - **Paced Relay**: summaries are batched per fetch cycle and sent as short ASCII lines with pacing between them.
//! - **Noise Filtering**: inbound serial bytes pass a health state machine so line noise never reaches the display.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use disaster_alert::config::Config;
//! use disaster_alert::feeds::CannedFeeds;
//! use disaster_alert::mesh::{health::LinkHealth, LogTransport, MeshLink};
//! use disaster_alert::station::{build_tracker, Station};
//! use disaster_alert::storage::FileStore;
//! use disaster_alert::system::{SharedClock, SystemClock};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     let clock: SharedClock = Arc::new(SystemClock);
//!     let store = FileStore::open(&config.storage.path, config.storage.size)?;
//!     let tracker = build_tracker(&config, Box::new(store), clock.clone())?;
//!     let link = MeshLink::new(
//!         Box::new(LogTransport),
//!         LinkHealth::new(config.link.health_config(), clock.clone()),
//!     );
//!     let mut station = Station::new(&config, tracker, link, CannedFeeds::new(), clock);
//!     station.run().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`event`] - canonical event model and bounded strings
//! - [`feeds`] - per-source normalizers and the HTTPS fetcher
//! - [`tracker`] - seen registry, display queue and the coordinating tracker
//! - [`storage`] - byte-cell store collaborators and the write guard
//! - [`mesh`] - radio transport, inbound noise filter and outbound relay framer
//! - [`display`] - screen layouts as draw commands
//! - [`controls`] - buttons and console commands
//! - [`station`] - the control loop
//! - [`config`] - TOML configuration
//! - [`system`] - clock, watchdog and memory probes
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌──────────────┐
//! │  Feeds   │ → │ EventTracker │ → │ Display      │
//! └──────────┘   │  registry    │   └──────────────┘
//!                │  queue       │   ┌──────────────┐
//!                │  relay       │ → │ MeshLink     │ ← inbound chat
//!                └──────────────┘   └──────────────┘
//!                       │
//!                ┌──────────────┐
//!                │ StoreGuard   │ → ByteStore
//!                └──────────────┘
//! ```

pub mod config;
pub mod controls;
pub mod display;
pub mod event;
pub mod feeds;
pub mod logutil;
pub mod mesh;
pub mod metrics;
pub mod station;
pub mod storage;
pub mod system;
pub mod tracker;
