//! Process-wide runtime counters.
//!
//! Plain relaxed atomics; read back through [`snapshot`] for the console
//! memory report and tests.
use std::sync::atomic::{AtomicU64, Ordering};

static FETCH_OK: AtomicU64 = AtomicU64::new(0);
static FETCH_FAILED: AtomicU64 = AtomicU64::new(0);
static RECORDS_SKIPPED: AtomicU64 = AtomicU64::new(0);
static EVENTS_QUEUED: AtomicU64 = AtomicU64::new(0);
static QUEUE_EVICTIONS: AtomicU64 = AtomicU64::new(0);
static RELAY_SENT: AtomicU64 = AtomicU64::new(0);
static RELAY_DROPPED: AtomicU64 = AtomicU64::new(0);
static CHAT_ACCEPTED: AtomicU64 = AtomicU64::new(0);
static GARBAGE_MESSAGES: AtomicU64 = AtomicU64::new(0);
static NOISE_BURSTS: AtomicU64 = AtomicU64::new(0);

pub fn inc_fetch_ok() {
    FETCH_OK.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_fetch_failed() {
    FETCH_FAILED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_records_skipped() {
    RECORDS_SKIPPED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_events_queued() {
    EVENTS_QUEUED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_queue_evictions() {
    QUEUE_EVICTIONS.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_relay_sent() {
    RELAY_SENT.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_relay_dropped() {
    RELAY_DROPPED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_chat_accepted() {
    CHAT_ACCEPTED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_garbage_messages() {
    GARBAGE_MESSAGES.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_noise_bursts() {
    NOISE_BURSTS.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub fetch_ok: u64,
    pub fetch_failed: u64,
    pub records_skipped: u64,
    pub events_queued: u64,
    pub queue_evictions: u64,
    pub relay_sent: u64,
    pub relay_dropped: u64,
    pub chat_accepted: u64,
    pub garbage_messages: u64,
    pub noise_bursts: u64,
}

impl Snapshot {
    /// Compact single-line form for the console.
    pub fn summary(&self) -> String {
        format!(
            "fetch ok/fail {}/{} skipped {} queued {} evicted {} relay sent/dropped {}/{} chat {} garbage {} bursts {}",
            self.fetch_ok,
            self.fetch_failed,
            self.records_skipped,
            self.events_queued,
            self.queue_evictions,
            self.relay_sent,
            self.relay_dropped,
            self.chat_accepted,
            self.garbage_messages,
            self.noise_bursts
        )
    }
}

pub fn snapshot() -> Snapshot {
    Snapshot {
        fetch_ok: FETCH_OK.load(Ordering::Relaxed),
        fetch_failed: FETCH_FAILED.load(Ordering::Relaxed),
        records_skipped: RECORDS_SKIPPED.load(Ordering::Relaxed),
        events_queued: EVENTS_QUEUED.load(Ordering::Relaxed),
        queue_evictions: QUEUE_EVICTIONS.load(Ordering::Relaxed),
        relay_sent: RELAY_SENT.load(Ordering::Relaxed),
        relay_dropped: RELAY_DROPPED.load(Ordering::Relaxed),
        chat_accepted: CHAT_ACCEPTED.load(Ordering::Relaxed),
        garbage_messages: GARBAGE_MESSAGES.load(Ordering::Relaxed),
        noise_bursts: NOISE_BURSTS.load(Ordering::Relaxed),
    }
}
