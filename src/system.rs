//! Host-side stand-ins for the appliance's system services: wall clock,
//! liveness watchdog and free-memory probe.

use chrono::{DateTime, Duration, Utc};
use log::{debug, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Source of wall-clock time. Injected so rate limits and decay windows can be
/// driven deterministically.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub type SharedClock = Arc<dyn Clock>;

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock; clones share the same instant.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut guard) = self.now.lock() {
            *guard += by;
        }
    }

    pub fn advance_secs(&self, secs: i64) {
        self.advance(Duration::seconds(secs));
    }

    pub fn set(&self, to: DateTime<Utc>) {
        if let Ok(mut guard) = self.now.lock() {
            *guard = to;
        }
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Liveness signal emitted from inside any loop that may run long.
pub trait Watchdog {
    fn feed(&self);
}

/// Watchdog that counts feeds; a supervisor (or a test) inspects the count.
#[derive(Debug, Default)]
pub struct Heartbeat {
    feeds: AtomicU64,
}

impl Heartbeat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feeds(&self) -> u64 {
        self.feeds.load(Ordering::Relaxed)
    }
}

impl Watchdog for Heartbeat {
    fn feed(&self) {
        self.feeds.fetch_add(1, Ordering::Relaxed);
    }
}

/// Reports currently available memory in bytes, when known.
pub trait MemoryProbe {
    fn available_bytes(&self) -> Option<u64>;
}

/// Reads `MemAvailable` from `/proc/meminfo` (Linux hosts).
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcMeminfo;

impl MemoryProbe for ProcMeminfo {
    fn available_bytes(&self) -> Option<u64> {
        let content = std::fs::read_to_string("/proc/meminfo").ok()?;
        parse_meminfo_available(&content)
    }
}

fn parse_meminfo_available(content: &str) -> Option<u64> {
    content
        .lines()
        .find(|line| line.starts_with("MemAvailable:"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|kib| kib.parse::<u64>().ok())
        .map(|kib| kib * 1024)
}

/// Probe returning a settable value; shared between clones.
#[derive(Debug, Clone, Default)]
pub struct FixedMemory {
    bytes: Arc<AtomicU64>,
}

impl FixedMemory {
    pub fn new(bytes: u64) -> Self {
        Self {
            bytes: Arc::new(AtomicU64::new(bytes)),
        }
    }

    pub fn set(&self, bytes: u64) {
        self.bytes.store(bytes, Ordering::Relaxed);
    }
}

impl MemoryProbe for FixedMemory {
    fn available_bytes(&self) -> Option<u64> {
        Some(self.bytes.load(Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryStatus {
    Healthy,
    /// Skip fetch/parse work this cycle.
    Low,
    /// Unsafe to continue; restart.
    Critical,
}

pub struct MemoryGuard {
    probe: Box<dyn MemoryProbe>,
    low_bytes: u64,
    critical_bytes: u64,
    min_seen: Option<u64>,
}

impl MemoryGuard {
    pub fn new(probe: Box<dyn MemoryProbe>, low_bytes: u64, critical_bytes: u64) -> Self {
        // critical must sit below low
        let critical_bytes = critical_bytes.min(low_bytes);
        Self {
            probe,
            low_bytes,
            critical_bytes,
            min_seen: None,
        }
    }

    pub fn status(&mut self) -> MemoryStatus {
        let Some(available) = self.probe.available_bytes() else {
            return MemoryStatus::Healthy;
        };
        self.min_seen = Some(self.min_seen.map_or(available, |m| m.min(available)));
        if available < self.critical_bytes {
            warn!("[MEMORY] critical: {} bytes available", available);
            MemoryStatus::Critical
        } else if available < self.low_bytes {
            warn!("[MEMORY] low: {} bytes available", available);
            MemoryStatus::Low
        } else {
            debug!("[MEMORY] {} bytes available", available);
            MemoryStatus::Healthy
        }
    }

    /// One-line report for the console `M` command.
    pub fn report(&self) -> String {
        match self.probe.available_bytes() {
            Some(available) => format!(
                "Free: {} bytes, Min: {} bytes, Low: {}, Critical: {}",
                available,
                self.min_seen.unwrap_or(available),
                self.low_bytes,
                self.critical_bytes
            ),
            None => "Free: unknown".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = ManualClock::default();
        let other = clock.clone();
        let start = clock.now();
        other.advance_secs(31);
        assert_eq!(clock.now() - start, Duration::seconds(31));
    }

    #[test]
    fn meminfo_parsing() {
        let sample = "MemTotal:       16000000 kB\nMemFree:         100 kB\nMemAvailable:    2048 kB\n";
        assert_eq!(parse_meminfo_available(sample), Some(2048 * 1024));
        assert_eq!(parse_meminfo_available("MemTotal: 1 kB\n"), None);
    }

    #[test]
    fn memory_thresholds() {
        let probe = FixedMemory::new(50_000);
        let mut guard = MemoryGuard::new(Box::new(probe.clone()), 20_000, 10_000);
        assert_eq!(guard.status(), MemoryStatus::Healthy);
        probe.set(15_000);
        assert_eq!(guard.status(), MemoryStatus::Low);
        probe.set(9_999);
        assert_eq!(guard.status(), MemoryStatus::Critical);
        assert!(guard.report().contains("Min: 9999"));
    }

    #[test]
    fn heartbeat_counts_feeds() {
        let hb = Heartbeat::new();
        hb.feed();
        hb.feed();
        assert_eq!(hb.feeds(), 2);
    }
}
