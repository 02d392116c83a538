//! # Configuration
//!
//! Station configuration is a TOML file (default `config.toml`). Every
//! section has defaults, so a partial file (or an empty one) is valid.
//!
//! ```toml
//! [station]
//! name = "Disaster Alert"
//! fetch_interval_secs = 300
//!
//! [feeds.usgs]
//! enabled = true
//! url = "https://earthquake.usgs.gov/earthquakes/feed/v1.0/summary/4.5_day.geojson"
//!
//! [storage]
//! path = "data/alert.store"
//! rated_endurance = 100000
//!
//! [relay]
//! port = "/dev/ttyUSB0"
//! baud_rate = 9600
//! ```
//!
//! Sections:
//! - [`StationConfig`] - loop timing
//! - [`FeedsConfig`] - per-source switches and URLs, HTTP limits
//! - [`StorageConfig`] - store file, registry size and write budget
//! - [`DisplayConfig`] - display queue size
//! - [`RadioConfig`] - serial port and relay pacing (`[relay]`)
//! - [`LinkConfig`] - inbound noise filter
//! - [`MemoryConfig`] - low and critical memory thresholds
//! - [`LoggingConfig`] - level and optional log file

use anyhow::{anyhow, Result};
use chrono::Duration as ChronoDuration;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::fs;

use crate::feeds::{eonet, gdacs, noaa, usgs, MAX_RECORDS_PER_SOURCE};
use crate::mesh::health::HealthConfig;
use crate::mesh::relay::RelayConfig;
use crate::storage::guard::GuardPolicy;
use crate::storage::{StoreLayout, DEFAULT_STORE_SIZE};
use crate::tracker::queue::{MAX_QUEUE_CAPACITY, MIN_QUEUE_CAPACITY};
use crate::tracker::registry::{DEFAULT_PERSIST_EVERY, MAX_REGISTRY_CAPACITY};

/// Largest second count a chrono duration holds.
const MAX_DURATION_SECS: i64 = i64::MAX / 1000;

/// Seconds from a config value, saturating instead of overflowing.
pub fn seconds(secs: u64) -> ChronoDuration {
    let secs = i64::try_from(secs).unwrap_or(MAX_DURATION_SECS).min(MAX_DURATION_SECS);
    ChronoDuration::seconds(secs)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub station: StationConfig,
    #[serde(default)]
    pub feeds: FeedsConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub relay: RadioConfig,
    #[serde(default)]
    pub link: LinkConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StationConfig {
    pub name: String,
    /// Seconds between fetch cycles.
    pub fetch_interval_secs: u64,
    /// How long each alert stays on screen.
    pub display_duration_secs: u64,
    /// Redraw period of the idle screen.
    pub idle_refresh_secs: u64,
    /// How long an inbound chat message stays on screen.
    pub chat_display_secs: u64,
    /// Control loop pass period.
    pub loop_tick_ms: u64,
    /// Send an "online" line over the relay at startup.
    pub announce: bool,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            name: "Disaster Alert".to_string(),
            fetch_interval_secs: 300,
            display_duration_secs: 8,
            idle_refresh_secs: 5,
            chat_display_secs: 5,
            loop_tick_ms: 20,
            announce: true,
        }
    }
}

/// One feed switch. An empty or missing `url` means the source's built-in URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedSourceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub url: String,
}

fn default_true() -> bool {
    true
}

impl FeedSourceConfig {
    fn enabled(url: &str) -> Self {
        Self {
            enabled: true,
            url: url.to_string(),
        }
    }

    /// Configured URL, or `fallback` when none is set.
    pub fn url_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        let url = self.url.trim();
        if url.is_empty() {
            fallback
        } else {
            url
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedsConfig {
    pub usgs: FeedSourceConfig,
    pub gdacs: FeedSourceConfig,
    pub eonet: FeedSourceConfig,
    pub noaa: FeedSourceConfig,
    /// Records taken per source per cycle (capped at 5).
    pub max_records_per_source: usize,
    /// Pause between sources within one cycle.
    pub source_pause_ms: u64,
    pub http_timeout_secs: u64,
    /// Larger bodies are discarded unparsed.
    pub max_body_bytes: u64,
    /// Minimum gap between two HTTP requests.
    pub min_request_gap_ms: u64,
}

impl Default for FeedsConfig {
    fn default() -> Self {
        Self {
            usgs: FeedSourceConfig::enabled(usgs::DEFAULT_URL),
            gdacs: FeedSourceConfig::enabled(gdacs::DEFAULT_URL),
            eonet: FeedSourceConfig::enabled(eonet::DEFAULT_URL),
            noaa: FeedSourceConfig::enabled(noaa::DEFAULT_URL),
            max_records_per_source: MAX_RECORDS_PER_SOURCE,
            source_pause_ms: 2000,
            http_timeout_secs: 15,
            max_body_bytes: 1024 * 1024,
            min_request_gap_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// File emulating the byte-cell store.
    pub path: String,
    pub size: usize,
    pub registry_capacity: usize,
    /// Offer a save every N newly seen events.
    pub persist_every: u32,
    /// Rated write endurance of the medium.
    pub rated_endurance: u32,
    pub min_save_interval_secs: u64,
    pub max_saves_per_hour: u16,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: "data/alert.store".to_string(),
            size: DEFAULT_STORE_SIZE,
            registry_capacity: MAX_REGISTRY_CAPACITY,
            persist_every: DEFAULT_PERSIST_EVERY,
            rated_endurance: 100_000,
            min_save_interval_secs: 30,
            max_saves_per_hour: 20,
        }
    }
}

impl StorageConfig {
    pub fn guard_policy(&self) -> GuardPolicy {
        GuardPolicy {
            // Never below the 30 s floor.
            min_save_interval: seconds(self.min_save_interval_secs.max(30)),
            max_saves_per_hour: self.max_saves_per_hour.clamp(1, 20),
            rated_endurance: self.rated_endurance.max(1),
        }
    }

    pub fn layout(&self) -> Result<StoreLayout> {
        StoreLayout::new(
            self.size,
            self.registry_capacity.clamp(1, MAX_REGISTRY_CAPACITY),
        )
        .map_err(|e| anyhow!("Invalid [storage] settings: {}", e))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Clamped to 5..=10.
    pub queue_capacity: usize,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            queue_capacity: MIN_QUEUE_CAPACITY,
        }
    }
}

impl DisplayConfig {
    pub fn effective_capacity(&self) -> usize {
        self.queue_capacity
            .clamp(MIN_QUEUE_CAPACITY, MAX_QUEUE_CAPACITY)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    /// Serial device of the radio node; empty runs without a radio.
    pub port: String,
    pub baud_rate: u32,
    pub queue_capacity: usize,
    pub max_line_bytes: usize,
    pub pacing_ms: u64,
    pub settle_ms: u64,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: 9600,
            queue_capacity: 5,
            max_line_bytes: 79,
            pacing_ms: 500,
            settle_ms: 200,
        }
    }
}

impl RadioConfig {
    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            capacity: self.queue_capacity.max(1),
            max_line_bytes: self.max_line_bytes.max(1),
            pacing: Duration::from_millis(self.pacing_ms),
            settle: Duration::from_millis(self.settle_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub inactivity_timeout_ms: u64,
    pub max_message_bytes: usize,
    pub min_printable_percent: u8,
    pub extreme_run: usize,
    pub noise_threshold: u32,
    pub disable_multiplier: u32,
    pub decay_window_secs: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        let d = HealthConfig::default();
        Self {
            inactivity_timeout_ms: d.inactivity_timeout.as_millis() as u64,
            max_message_bytes: d.max_message_bytes,
            min_printable_percent: d.min_printable_percent,
            extreme_run: d.extreme_run,
            noise_threshold: d.noise_threshold,
            disable_multiplier: d.disable_multiplier,
            decay_window_secs: d.decay_window.num_seconds() as u64,
        }
    }
}

impl LinkConfig {
    pub fn health_config(&self) -> HealthConfig {
        HealthConfig {
            inactivity_timeout: Duration::from_millis(self.inactivity_timeout_ms),
            max_message_bytes: self.max_message_bytes.max(1),
            min_printable_percent: self.min_printable_percent.min(100),
            extreme_run: self.extreme_run.max(2),
            noise_threshold: self.noise_threshold.max(1),
            disable_multiplier: self.disable_multiplier.max(1),
            decay_window: seconds(self.decay_window_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Below this, fetch and parse work is skipped.
    pub low_bytes: u64,
    /// Below this, the station restarts.
    pub critical_bytes: u64,
    pub check_interval_secs: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            low_bytes: 64 * 1024 * 1024,
            critical_bytes: 16 * 1024 * 1024,
            check_interval_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: Some("disaster-alert.log".to_string()),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        config.validate()?;
        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    /// Reject settings that cannot work at all. Out-of-range values that have
    /// a sensible nearest setting are clamped where they are used instead.
    pub fn validate(&self) -> Result<()> {
        self.storage.layout()?;
        if self.storage.path.trim().is_empty() {
            return Err(anyhow!("[storage] path must not be empty"));
        }
        if self.memory.critical_bytes > self.memory.low_bytes {
            return Err(anyhow!(
                "[memory] critical_bytes ({}) must not exceed low_bytes ({})",
                self.memory.critical_bytes,
                self.memory.low_bytes
            ));
        }
        if self.station.fetch_interval_secs == 0 {
            return Err(anyhow!("[station] fetch_interval_secs must be positive"));
        }
        Ok(())
    }
}
