//! # Persistent Byte Store
//!
//! The appliance keeps its dedup history in a small wear-limited byte-cell store
//! (EEPROM-class). This module defines the store collaborator and its on-media
//! layout; [`guard`] holds the write-budget policy that is the only path to
//! `write`/`commit`.
//!
//! ## Layout
//!
//! ```text
//! offset 0        magic tag (0xDA)
//! offset 1        format version
//! offset 2..4     registry count   (u16 LE)
//! offset 4..6     registry cursor  (u16 LE)
//! offset 6..      id slots, SLOT_BYTES each, NUL padded
//! size-8..size-4  CRC-32 of bytes 0..6+slots
//! size-4..size    lifetime write counter (u32 LE)
//! ```
//!
//! Two implementations are provided: [`FileStore`] emulates the cell array on
//! a host file and [`MemoryStore`] keeps it in RAM for tests.

pub mod guard;

use fs2::FileExt;
use log::{debug, warn};
use std::fs::{self as sfs, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;

use crate::event::MAX_ID_BYTES;

pub const STORE_MAGIC: u8 = 0xDA;
pub const STORE_VERSION: u8 = 1;
/// One id plus its NUL terminator.
pub const SLOT_BYTES: usize = MAX_ID_BYTES + 1;
pub const HEADER_BYTES: usize = 6;
pub const CHECKSUM_BYTES: usize = 4;
pub const COUNTER_BYTES: usize = 4;
/// Default emulated store size.
pub const DEFAULT_STORE_SIZE: usize = 4096;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("access out of bounds: offset {offset} + {len} exceeds store size {size}")]
    OutOfBounds {
        offset: usize,
        len: usize,
        size: usize,
    },

    #[error("store layout does not fit: need {needed} bytes, store has {size}")]
    LayoutTooLarge { needed: usize, size: usize },

    #[error("store is locked by another process: {0}")]
    Locked(String),
}

/// Byte-addressable persistent store with explicit commit.
pub trait ByteStore: Send {
    fn size(&self) -> usize;
    fn read(&self, offset: usize, len: usize) -> Result<Vec<u8>, StoreError>;
    /// Stage bytes; nothing is durable until [`ByteStore::commit`].
    fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<(), StoreError>;
    fn commit(&mut self) -> Result<(), StoreError>;
}

fn check_bounds(offset: usize, len: usize, size: usize) -> Result<(), StoreError> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(()),
        _ => Err(StoreError::OutOfBounds { offset, len, size }),
    }
}

/// Offsets derived from the store size and registry capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreLayout {
    pub size: usize,
    pub capacity: usize,
}

impl StoreLayout {
    pub fn new(size: usize, capacity: usize) -> Result<Self, StoreError> {
        let layout = Self { size, capacity };
        let needed = HEADER_BYTES + capacity * SLOT_BYTES + CHECKSUM_BYTES + COUNTER_BYTES;
        if needed > size {
            return Err(StoreError::LayoutTooLarge { needed, size });
        }
        Ok(layout)
    }

    pub fn slots_offset(&self) -> usize {
        HEADER_BYTES
    }

    pub fn slot_offset(&self, index: usize) -> usize {
        HEADER_BYTES + index * SLOT_BYTES
    }

    /// Bytes covered by the checksum: header plus every slot.
    pub fn block_len(&self) -> usize {
        HEADER_BYTES + self.capacity * SLOT_BYTES
    }

    pub fn checksum_offset(&self) -> usize {
        self.size - COUNTER_BYTES - CHECKSUM_BYTES
    }

    pub fn counter_offset(&self) -> usize {
        self.size - COUNTER_BYTES
    }
}

/// In-memory store. Clones share the same committed cells so a test can
/// "reboot" by building a new registry over a clone.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    committed: Arc<Mutex<Vec<u8>>>,
    staged: Vec<u8>,
    fail_commits: bool,
}

impl MemoryStore {
    pub fn new(size: usize) -> Self {
        Self {
            committed: Arc::new(Mutex::new(vec![0xFF; size])),
            staged: vec![0xFF; size],
            fail_commits: false,
        }
    }

    /// Make every subsequent commit fail (simulates a flaky medium).
    pub fn set_fail_commits(&mut self, fail: bool) {
        self.fail_commits = fail;
    }

    /// Corrupt committed bytes directly, bypassing any policy.
    pub fn poke(&self, offset: usize, bytes: &[u8]) {
        if let Ok(mut cells) = self.committed.lock() {
            if check_bounds(offset, bytes.len(), cells.len()).is_ok() {
                cells[offset..offset + bytes.len()].copy_from_slice(bytes);
            }
        }
    }

    pub fn snapshot(&self) -> Vec<u8> {
        self.committed
            .lock()
            .map(|cells| cells.clone())
            .unwrap_or_default()
    }

    /// A fresh handle that sees only committed state.
    pub fn reopen(&self) -> Self {
        let staged = self.snapshot();
        Self {
            committed: Arc::clone(&self.committed),
            staged,
            fail_commits: false,
        }
    }
}

impl ByteStore for MemoryStore {
    fn size(&self) -> usize {
        self.staged.len()
    }

    fn read(&self, offset: usize, len: usize) -> Result<Vec<u8>, StoreError> {
        check_bounds(offset, len, self.staged.len())?;
        Ok(self.staged[offset..offset + len].to_vec())
    }

    fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<(), StoreError> {
        check_bounds(offset, bytes.len(), self.staged.len())?;
        self.staged[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        if self.fail_commits {
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "simulated commit failure",
            )));
        }
        if let Ok(mut cells) = self.committed.lock() {
            cells.copy_from_slice(&self.staged);
        }
        Ok(())
    }
}

/// Store emulated on a host file. The file is held under an exclusive lock
/// for the lifetime of the handle; commits go through a temp file and rename.
pub struct FileStore {
    path: PathBuf,
    cells: Vec<u8>,
    _lock: File,
}

impl FileStore {
    pub fn open<P: AsRef<Path>>(path: P, size: usize) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                sfs::create_dir_all(parent)?;
            }
        }
        let lock_path = path.with_extension("lock");
        let lock = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)?;
        lock.try_lock_exclusive()
            .map_err(|_| StoreError::Locked(lock_path.display().to_string()))?;

        // Erased cells read as 0xFF, like a blank EEPROM.
        let mut cells = vec![0xFF; size];
        match File::open(&path) {
            Ok(mut file) => {
                let mut existing = Vec::new();
                file.read_to_end(&mut existing)?;
                if existing.len() != size {
                    warn!(
                        "[STORE] {} is {} bytes, expected {}; using what fits",
                        path.display(),
                        existing.len(),
                        size
                    );
                }
                let n = existing.len().min(size);
                cells[..n].copy_from_slice(&existing[..n]);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("[STORE] no store file at {}, starting blank", path.display());
            }
            Err(e) => return Err(e.into()),
        }
        Ok(Self {
            path,
            cells,
            _lock: lock,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ByteStore for FileStore {
    fn size(&self) -> usize {
        self.cells.len()
    }

    fn read(&self, offset: usize, len: usize) -> Result<Vec<u8>, StoreError> {
        check_bounds(offset, len, self.cells.len())?;
        Ok(self.cells[offset..offset + len].to_vec())
    }

    fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<(), StoreError> {
        check_bounds(offset, bytes.len(), self.cells.len())?;
        self.cells[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let dir = if dir.as_os_str().is_empty() {
            Path::new(".")
        } else {
            dir
        };
        let base = self
            .path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("store.bin");
        let tmp_path = dir.join(format!(".{}.tmp-{}", base, std::process::id()));
        {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(&self.cells)?;
            tmp.flush()?;
            let _ = tmp.sync_all();
        }
        sfs::rename(&tmp_path, &self.path)?;
        if let Ok(dir_file) = File::open(dir) {
            let _ = dir_file.sync_all();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_rejects_oversized_capacity() {
        assert!(StoreLayout::new(512, 50).is_err());
        let layout = StoreLayout::new(DEFAULT_STORE_SIZE, 50).unwrap();
        assert_eq!(layout.slot_offset(1), HEADER_BYTES + SLOT_BYTES);
        assert_eq!(layout.counter_offset(), DEFAULT_STORE_SIZE - 4);
        assert!(layout.block_len() <= layout.checksum_offset());
    }

    #[test]
    fn memory_store_only_exposes_committed_bytes_after_reopen() {
        let mut store = MemoryStore::new(64);
        store.write(0, &[1, 2, 3]).unwrap();
        assert_eq!(store.reopen().read(0, 3).unwrap(), vec![0xFF, 0xFF, 0xFF]);
        store.commit().unwrap();
        assert_eq!(store.reopen().read(0, 3).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn out_of_bounds_access_is_an_error() {
        let mut store = MemoryStore::new(8);
        assert!(matches!(store.read(6, 4), Err(StoreError::OutOfBounds { .. })));
        assert!(store.write(usize::MAX, &[1]).is_err());
    }

    #[test]
    fn file_store_round_trips_through_commit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alert.store");
        {
            let mut store = FileStore::open(&path, 32).unwrap();
            assert_eq!(store.read(0, 2).unwrap(), vec![0xFF, 0xFF]);
            store.write(0, &[STORE_MAGIC, STORE_VERSION]).unwrap();
            store.commit().unwrap();
        }
        let store = FileStore::open(&path, 32).unwrap();
        assert_eq!(store.read(0, 2).unwrap(), vec![STORE_MAGIC, STORE_VERSION]);
    }

    #[test]
    fn file_store_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alert.store");
        let _first = FileStore::open(&path, 32).unwrap();
        assert!(matches!(
            FileStore::open(&path, 32),
            Err(StoreError::Locked(_))
        ));
    }
}
