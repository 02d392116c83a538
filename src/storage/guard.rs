//! Write-budget guard for the wear-limited store.
//!
//! Every persist goes through [`StoreGuard::save`], which refuses (rather
//! than errors) when:
//! - the lifetime write count has passed 90% of the rated endurance,
//! - less than the minimum inter-save interval has elapsed,
//! - the hourly save allowance is used up.
//!
//! Each allowed save bumps a lifetime counter kept in the last four bytes of
//! the store and committed together with the payload.

use chrono::{DateTime, Duration, Utc};
use log::{debug, error, info, warn};
use std::fmt;

use super::{ByteStore, StoreError, StoreLayout};
use crate::system::SharedClock;

/// Tunables for the guard.
#[derive(Debug, Clone)]
pub struct GuardPolicy {
    /// Minimum gap between two saves.
    pub min_save_interval: Duration,
    pub max_saves_per_hour: u16,
    /// Rated write-cycle endurance of the medium.
    pub rated_endurance: u32,
}

impl Default for GuardPolicy {
    fn default() -> Self {
        Self {
            min_save_interval: Duration::seconds(30),
            max_saves_per_hour: 20,
            rated_endurance: 100_000,
        }
    }
}

impl GuardPolicy {
    /// Writes are disabled once the count exceeds this.
    pub fn disable_threshold(&self) -> u32 {
        ((self.rated_endurance as u64 * 9) / 10) as u32
    }

    /// Persisted counts above this are treated as corrupt reads.
    pub fn sanity_limit(&self) -> u64 {
        self.rated_endurance as u64 * 2
    }
}

/// Wear accounting state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteBudget {
    pub lifetime_write_count: u32,
    pub saves_this_hour: u16,
    pub hour_window_start: DateTime<Utc>,
    pub last_save_timestamp: Option<DateTime<Utc>>,
    pub writes_disabled: bool,
}

/// Why a save was not allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refusal {
    Exhausted,
    RateLimited { wait: Duration },
    HourlyCap,
}

impl fmt::Display for Refusal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Refusal::Exhausted => write!(f, "write budget exhausted"),
            Refusal::RateLimited { wait } => {
                write!(f, "rate limited, next save in {}s", wait.num_seconds().max(1))
            }
            Refusal::HourlyCap => write!(f, "hourly save allowance used"),
        }
    }
}

/// Result of a persist attempt. Callers treat persistence as fire-and-forget;
/// the outcome exists for logging and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved { lifetime_writes: u32 },
    Refused(Refusal),
    /// The medium rejected the write or commit. Budget is still charged.
    Failed(String),
}

impl SaveOutcome {
    pub fn is_saved(&self) -> bool {
        matches!(self, SaveOutcome::Saved { .. })
    }
}

/// Sole writer to the persistent store.
pub struct StoreGuard {
    store: Box<dyn ByteStore>,
    layout: StoreLayout,
    policy: GuardPolicy,
    budget: WriteBudget,
    clock: SharedClock,
}

impl StoreGuard {
    /// Wrap a store, loading and sanity-checking the lifetime counter.
    pub fn open(
        store: Box<dyn ByteStore>,
        layout: StoreLayout,
        policy: GuardPolicy,
        clock: SharedClock,
    ) -> Self {
        let now = clock.now();
        let lifetime = match store.read(layout.counter_offset(), 4) {
            Ok(bytes) => {
                let raw = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                if raw as u64 > policy.sanity_limit() {
                    warn!(
                        "[GUARD] lifetime write count {} exceeds sanity limit {}, resetting to 0",
                        raw,
                        policy.sanity_limit()
                    );
                    0
                } else {
                    raw
                }
            }
            Err(e) => {
                warn!("[GUARD] could not read write counter: {}", e);
                0
            }
        };
        let writes_disabled = lifetime > policy.disable_threshold();
        if writes_disabled {
            error!(
                "[GUARD] lifetime writes {} past 90% of rated {}; persistence disabled",
                lifetime, policy.rated_endurance
            );
        } else {
            info!(
                "[GUARD] lifetime writes {} of rated {}",
                lifetime, policy.rated_endurance
            );
        }
        Self {
            store,
            layout,
            policy,
            budget: WriteBudget {
                lifetime_write_count: lifetime,
                saves_this_hour: 0,
                hour_window_start: now,
                last_save_timestamp: None,
                writes_disabled,
            },
            clock,
        }
    }

    pub fn layout(&self) -> StoreLayout {
        self.layout
    }

    pub fn budget(&self) -> &WriteBudget {
        &self.budget
    }

    pub fn policy(&self) -> &GuardPolicy {
        &self.policy
    }

    /// Reads are not wear-limited and bypass the budget.
    pub fn read(&self, offset: usize, len: usize) -> Result<Vec<u8>, StoreError> {
        self.store.read(offset, len)
    }

    fn window_expired(&self, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.budget.hour_window_start) >= Duration::hours(1)
    }

    /// Check whether a save would be allowed right now.
    pub fn check(&self) -> Result<(), Refusal> {
        let now = self.clock.now();
        if self.budget.writes_disabled {
            return Err(Refusal::Exhausted);
        }
        if let Some(last) = self.budget.last_save_timestamp {
            let elapsed = now.signed_duration_since(last);
            if elapsed < self.policy.min_save_interval {
                return Err(Refusal::RateLimited {
                    wait: self.policy.min_save_interval - elapsed,
                });
            }
        }
        if !self.window_expired(now) && self.budget.saves_this_hour >= self.policy.max_saves_per_hour
        {
            return Err(Refusal::HourlyCap);
        }
        Ok(())
    }

    pub fn can_save(&self) -> bool {
        self.check().is_ok()
    }

    /// Write each `(offset, bytes)` region plus the bumped lifetime counter and
    /// commit, if the budget allows.
    pub fn save(&mut self, regions: &[(usize, &[u8])]) -> SaveOutcome {
        if let Err(refusal) = self.check() {
            debug!("[GUARD] save refused: {}", refusal);
            return SaveOutcome::Refused(refusal);
        }
        let now = self.clock.now();
        if self.window_expired(now) {
            self.budget.hour_window_start = now;
            self.budget.saves_this_hour = 0;
        }

        // Charged up front: a failed commit still costs a write cycle.
        self.budget.lifetime_write_count = self.budget.lifetime_write_count.saturating_add(1);
        self.budget.saves_this_hour = self.budget.saves_this_hour.saturating_add(1);
        self.budget.last_save_timestamp = Some(now);
        if self.budget.lifetime_write_count > self.policy.disable_threshold() {
            error!(
                "[GUARD] lifetime writes {} past 90% of rated {}; disabling further saves",
                self.budget.lifetime_write_count, self.policy.rated_endurance
            );
            self.budget.writes_disabled = true;
        }

        let counter = self.budget.lifetime_write_count.to_le_bytes();
        let result = regions
            .iter()
            .try_for_each(|(offset, bytes)| self.store.write(*offset, bytes))
            .and_then(|_| self.store.write(self.layout.counter_offset(), &counter))
            .and_then(|_| self.store.commit());

        match result {
            Ok(()) => {
                debug!(
                    "[GUARD] saved (lifetime {}, {} this hour)",
                    self.budget.lifetime_write_count, self.budget.saves_this_hour
                );
                SaveOutcome::Saved {
                    lifetime_writes: self.budget.lifetime_write_count,
                }
            }
            Err(e) => {
                error!("[GUARD] commit failed: {}", e);
                SaveOutcome::Failed(e.to_string())
            }
        }
    }

    /// One-line report for the console `W` command.
    pub fn report(&self) -> String {
        let state = match self.check() {
            Ok(()) => "ready".to_string(),
            Err(r) => r.to_string(),
        };
        format!(
            "Writes: {} lifetime / {} rated, {} this hour (max {}), {}",
            self.budget.lifetime_write_count,
            self.policy.rated_endurance,
            self.budget.saves_this_hour,
            self.policy.max_saves_per_hour,
            state
        )
    }
}
