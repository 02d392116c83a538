//! Bounded, persisted set of already-delivered event ids.
//!
//! The registry is a ring of at most [`MAX_REGISTRY_CAPACITY`] slots with an
//! insertion cursor. Inserting into a full ring overwrites the oldest id.
//! State is loaded once from the store at construction; any inconsistency in
//! the persisted block (magic, version, count/cursor bounds, checksum, slot
//! encoding) means "no history" rather than an error.

use crc::{Crc, CRC_32_ISO_HDLC};
use log::{debug, error, info, warn};

use crate::event::{EventId, MAX_ID_BYTES};
use crate::storage::guard::{SaveOutcome, StoreGuard};
use crate::storage::{StoreLayout, HEADER_BYTES, SLOT_BYTES, STORE_MAGIC, STORE_VERSION};

pub const MAX_REGISTRY_CAPACITY: usize = 50;
pub const DEFAULT_PERSIST_EVERY: u32 = 5;

const BLOCK_CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

pub(crate) fn block_checksum(block: &[u8]) -> u32 {
    BLOCK_CRC.checksum(block)
}

/// Why a persisted block was not accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
enum LoadRejection {
    Blank,
    BadBounds { count: usize, cursor: usize },
    Checksum { stored: u32, computed: u32 },
    BadSlot(usize),
}

struct Loaded {
    slots: Vec<EventId>,
    count: usize,
    cursor: usize,
}

pub struct SeenRegistry {
    guard: StoreGuard,
    slots: Vec<EventId>,
    count: usize,
    cursor: usize,
    persist_every: u32,
    marks_since_persist: u32,
    valid: bool,
    dirty: bool,
}

impl SeenRegistry {
    /// Load history from the guarded store. Capacity comes from the store layout.
    pub fn load(guard: StoreGuard, persist_every: u32) -> Self {
        let layout = guard.layout();
        let capacity = layout.capacity.clamp(1, MAX_REGISTRY_CAPACITY);
        let mut registry = Self {
            guard,
            slots: vec![EventId::default(); capacity],
            count: 0,
            cursor: 0,
            persist_every: persist_every.max(1),
            marks_since_persist: 0,
            valid: true,
            dirty: false,
        };

        let block = match registry.guard.read(0, layout.block_len()).and_then(|block| {
            let stored = registry.guard.read(layout.checksum_offset(), 4)?;
            Ok((block, stored))
        }) {
            Ok(read) => read,
            Err(e) => {
                error!("[REGISTRY] store read failed, persistence disabled for this run: {}", e);
                registry.valid = false;
                return registry;
            }
        };

        match decode_block(&block.0, &block.1, layout, capacity) {
            Ok(loaded) => {
                registry.slots = loaded.slots;
                registry.count = loaded.count;
                registry.cursor = loaded.cursor;
                info!("[REGISTRY] loaded {} seen events", registry.count);
            }
            Err(LoadRejection::Blank) => {
                info!("[REGISTRY] no valid history in store, starting fresh");
            }
            Err(reason) => {
                warn!("[REGISTRY] persisted history rejected ({:?}), starting fresh", reason);
            }
        }
        registry
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// False after a store read failure at boot; marks are then ignored.
    pub fn persistence_valid(&self) -> bool {
        self.valid
    }

    pub fn guard(&self) -> &StoreGuard {
        &self.guard
    }

    /// Ids currently held, in slot order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.slots[..self.count].iter().map(|id| id.as_str())
    }

    /// Empty ids count as seen so they can never enter the pipeline.
    pub fn is_seen(&self, id: &str) -> bool {
        if id.is_empty() {
            return true;
        }
        let key = EventId::new(id);
        self.slots[..self.count].iter().any(|slot| *slot == key)
    }

    /// Record `id` as delivered. Every `persist_every` insertions a save is
    /// offered to the guard; the outcome never reaches the caller.
    pub fn mark_seen(&mut self, id: &str) {
        if !self.valid || self.is_seen(id) {
            return;
        }
        let capacity = self.capacity();
        self.slots[self.cursor] = EventId::new(id);
        self.cursor = (self.cursor + 1) % capacity;
        if self.count < capacity {
            self.count += 1;
        }
        self.dirty = true;
        debug!(
            "[REGISTRY] marked seen: {} (total {})",
            crate::logutil::escape_log(id),
            self.count
        );

        self.marks_since_persist += 1;
        if self.marks_since_persist >= self.persist_every {
            self.marks_since_persist = 0;
            self.persist();
        }
    }

    /// Forget all history and try to persist the empty state right away.
    pub fn clear_all(&mut self) -> SaveOutcome {
        self.slots.iter_mut().for_each(|slot| *slot = EventId::default());
        self.count = 0;
        self.cursor = 0;
        self.marks_since_persist = 0;
        self.valid = true;
        self.dirty = true;
        info!("[REGISTRY] cleared all seen events");
        self.persist()
    }

    /// Offer unsaved marks to the guard (used on shutdown).
    pub fn flush(&mut self) -> Option<SaveOutcome> {
        if !self.dirty || !self.valid {
            return None;
        }
        Some(self.persist())
    }

    fn persist(&mut self) -> SaveOutcome {
        let layout = self.guard.layout();
        let block = encode_block(&self.slots, self.count, self.cursor);
        let checksum = block_checksum(&block).to_le_bytes();
        let outcome = self
            .guard
            .save(&[(0, &block), (layout.checksum_offset(), &checksum)]);
        match &outcome {
            SaveOutcome::Saved { .. } => {
                self.dirty = false;
                info!("[REGISTRY] saved {} events", self.count);
            }
            SaveOutcome::Refused(reason) => {
                debug!("[REGISTRY] save deferred: {}", reason);
            }
            SaveOutcome::Failed(_) => {}
        }
        outcome
    }
}

fn encode_block(slots: &[EventId], count: usize, cursor: usize) -> Vec<u8> {
    let mut block = vec![0u8; HEADER_BYTES + slots.len() * SLOT_BYTES];
    block[0] = STORE_MAGIC;
    block[1] = STORE_VERSION;
    block[2..4].copy_from_slice(&(count as u16).to_le_bytes());
    block[4..6].copy_from_slice(&(cursor as u16).to_le_bytes());
    for (i, slot) in slots.iter().enumerate().take(count) {
        let start = HEADER_BYTES + i * SLOT_BYTES;
        let bytes = slot.as_bytes();
        block[start..start + bytes.len()].copy_from_slice(bytes);
    }
    block
}

fn decode_block(
    block: &[u8],
    stored_checksum: &[u8],
    layout: StoreLayout,
    capacity: usize,
) -> Result<Loaded, LoadRejection> {
    if block.len() < layout.block_len() || block[0] != STORE_MAGIC || block[1] != STORE_VERSION {
        return Err(LoadRejection::Blank);
    }
    let count = u16::from_le_bytes([block[2], block[3]]) as usize;
    let cursor = u16::from_le_bytes([block[4], block[5]]) as usize;
    // A partially filled ring always has its cursor at the fill level.
    if count > capacity || cursor >= capacity || (count < capacity && cursor != count) {
        return Err(LoadRejection::BadBounds { count, cursor });
    }

    let stored = match stored_checksum {
        [a, b, c, d] => u32::from_le_bytes([*a, *b, *c, *d]),
        _ => 0,
    };
    let computed = block_checksum(&block[..layout.block_len()]);
    if stored != computed {
        return Err(LoadRejection::Checksum { stored, computed });
    }

    let mut slots = vec![EventId::default(); capacity];
    for (i, slot) in slots.iter_mut().enumerate().take(count) {
        let start = HEADER_BYTES + i * SLOT_BYTES;
        let raw = &block[start..start + SLOT_BYTES];
        let end = raw.iter().position(|b| *b == 0).unwrap_or(MAX_ID_BYTES);
        let text = std::str::from_utf8(&raw[..end]).map_err(|_| LoadRejection::BadSlot(i))?;
        *slot = EventId::new(text);
    }
    Ok(Loaded {
        slots,
        count,
        cursor,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::guard::GuardPolicy;
    use crate::storage::{MemoryStore, DEFAULT_STORE_SIZE};
    use crate::system::ManualClock;
    use std::sync::Arc;

    fn registry(store: &MemoryStore, capacity: usize, clock: &ManualClock) -> SeenRegistry {
        let layout = StoreLayout::new(DEFAULT_STORE_SIZE, capacity).unwrap();
        let guard = StoreGuard::open(
            Box::new(store.reopen()),
            layout,
            GuardPolicy::default(),
            Arc::new(clock.clone()),
        );
        SeenRegistry::load(guard, DEFAULT_PERSIST_EVERY)
    }

    #[test]
    fn empty_id_is_always_seen() {
        let store = MemoryStore::new(DEFAULT_STORE_SIZE);
        let reg = registry(&store, 50, &ManualClock::default());
        assert!(reg.is_seen(""));
        assert!(!reg.is_seen("usgs_a"));
    }

    #[test]
    fn fifo_overwrite_keeps_capacity() {
        let store = MemoryStore::new(DEFAULT_STORE_SIZE);
        let mut reg = registry(&store, 3, &ManualClock::default());
        for id in ["a", "b", "c", "d"] {
            reg.mark_seen(id);
            assert!(reg.is_seen(id));
            assert!(reg.len() <= 3);
        }
        assert!(!reg.is_seen("a"));
        assert!(reg.is_seen("b"));
    }

    #[test]
    fn every_fifth_mark_persists() {
        let store = MemoryStore::new(DEFAULT_STORE_SIZE);
        let clock = ManualClock::default();
        let mut reg = registry(&store, 50, &clock);
        for i in 0..4 {
            reg.mark_seen(&format!("usgs_{i}"));
        }
        assert_eq!(registry(&store, 50, &clock).len(), 0);
        reg.mark_seen("usgs_4");
        let reloaded = registry(&store, 50, &clock);
        assert_eq!(reloaded.len(), 5);
        assert!(reloaded.is_seen("usgs_0"));
    }

    #[test]
    fn checksum_mismatch_starts_fresh() {
        let store = MemoryStore::new(DEFAULT_STORE_SIZE);
        let clock = ManualClock::default();
        let mut reg = registry(&store, 50, &clock);
        for i in 0..5 {
            reg.mark_seen(&format!("gdacs_{i}"));
        }
        // Flip a byte inside the first slot.
        store.poke(HEADER_BYTES, b"X");
        assert!(registry(&store, 50, &clock).is_empty());
    }

    #[test]
    fn out_of_range_count_starts_fresh() {
        let store = MemoryStore::new(DEFAULT_STORE_SIZE);
        let mut header = vec![STORE_MAGIC, STORE_VERSION];
        header.extend_from_slice(&99u16.to_le_bytes());
        header.extend_from_slice(&0u16.to_le_bytes());
        store.poke(0, &header);
        let reg = registry(&store, 50, &ManualClock::default());
        assert!(reg.is_empty());
        assert!(reg.persistence_valid());
    }

    #[test]
    fn clear_all_persists_empty_state() {
        let store = MemoryStore::new(DEFAULT_STORE_SIZE);
        let clock = ManualClock::default();
        let mut reg = registry(&store, 50, &clock);
        for i in 0..5 {
            reg.mark_seen(&format!("eonet_{i}"));
        }
        clock.advance_secs(31);
        assert!(reg.clear_all().is_saved());
        assert!(registry(&store, 50, &clock).is_empty());
    }

    #[test]
    fn flush_saves_pending_marks_once() {
        let store = MemoryStore::new(DEFAULT_STORE_SIZE);
        let clock = ManualClock::default();
        let mut reg = registry(&store, 50, &clock);
        reg.mark_seen("noaa_1");
        assert!(matches!(reg.flush(), Some(SaveOutcome::Saved { .. })));
        assert!(reg.flush().is_none());
        assert!(registry(&store, 50, &clock).is_seen("noaa_1"));
    }
}
