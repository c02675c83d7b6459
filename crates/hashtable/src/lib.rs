//! # Hashtable — headless index arithmetic
//!
//! The hash table over a server's slot array is *headless*: it keeps no
//! metadata of its own — no occupancy counts, no version chains, no
//! allocation bitmap. A table "instance" is therefore nothing but address
//! arithmetic: a key fingerprint names a home slot (`fp mod capacity`) and a
//! bounded linear-probe window names the only other slots the key may occupy.
//! Any actual knowledge about the table is obtained by reading slots.
//!
//! Two views live here:
//!
//! - [`HeadlessTable`] — the pure arithmetic shared by every client and
//!   server: home index, probe window, slot addresses.
//! - [`LocalTable`] — the same table over a locally mapped byte region, used
//!   where the slots *are* local: formatting a region on the server and
//!   inspecting placement in tests. Clients never use it; their probes go
//!   over the wire.

use slot::{SlotError, SLOT_LEN};
use thiserror::Error;

/// Default bounded linear-probe window.
pub const DEFAULT_PROBE_WINDOW: usize = 5;

#[derive(Debug, Error)]
pub enum TableError {
    #[error("table capacity must be positive")]
    ZeroCapacity,

    #[error("probe window must be positive")]
    ZeroWindow,

    #[error("region length {0} is not a whole number of slots")]
    UnalignedRegion(usize),

    /// No match and no free slot inside the probe window.
    #[error("probe window exhausted")]
    NoSpace,

    #[error(transparent)]
    Slot(#[from] SlotError),
}

/// Address arithmetic over a slot array of fixed capacity.
#[derive(Debug, Clone, Copy)]
pub struct HeadlessTable {
    capacity: u64,
    window: usize,
}

impl HeadlessTable {
    pub fn new(capacity: u64, window: usize) -> Result<Self, TableError> {
        if capacity == 0 {
            return Err(TableError::ZeroCapacity);
        }
        if window == 0 {
            return Err(TableError::ZeroWindow);
        }
        Ok(Self { capacity, window })
    }

    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Probe window length, clamped so a tiny table is not probed twice.
    #[must_use]
    pub fn window(&self) -> usize {
        (self.window as u64).min(self.capacity) as usize
    }

    /// Home slot index of a key fingerprint.
    #[must_use]
    pub fn slot_index(&self, fingerprint: u32) -> u64 {
        u64::from(fingerprint) % self.capacity
    }

    /// The slot indices a key may occupy, home first.
    pub fn probe_window(&self, fingerprint: u32) -> impl Iterator<Item = u64> + '_ {
        let home = self.slot_index(fingerprint);
        (0..self.window() as u64).map(move |i| (home + i) % self.capacity)
    }

    /// Index at probe offset `off` from the home slot.
    #[must_use]
    pub fn probe_index(&self, fingerprint: u32, off: usize) -> u64 {
        (self.slot_index(fingerprint) + off as u64) % self.capacity
    }

    /// Byte address of slot `index` in a region starting at `base`.
    #[must_use]
    pub fn slot_addr(&self, base: u64, index: u64) -> u64 {
        base + index * SLOT_LEN as u64
    }
}

/// A headless table over a locally mapped slot region.
pub struct LocalTable<'a> {
    mem: &'a mut [u8],
    shape: HeadlessTable,
}

impl<'a> LocalTable<'a> {
    /// Wraps a raw region. The region must be a whole number of slots.
    pub fn new(mem: &'a mut [u8], window: usize) -> Result<Self, TableError> {
        if mem.len() % SLOT_LEN != 0 {
            return Err(TableError::UnalignedRegion(mem.len()));
        }
        let shape = HeadlessTable::new((mem.len() / SLOT_LEN) as u64, window)?;
        Ok(Self { mem, shape })
    }

    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.shape.capacity()
    }

    #[must_use]
    pub fn shape(&self) -> HeadlessTable {
        self.shape
    }

    #[must_use]
    pub fn slot(&self, index: u64) -> &[u8] {
        let off = index as usize * SLOT_LEN;
        &self.mem[off..off + SLOT_LEN]
    }

    pub fn slot_mut(&mut self, index: u64) -> &mut [u8] {
        let off = index as usize * SLOT_LEN;
        &mut self.mem[off..off + SLOT_LEN]
    }

    /// Invalidates every slot. Used when formatting a recycled region.
    pub fn clear(&mut self) {
        self.mem.fill(0);
    }

    /// Probes for `key`, returning its slot index.
    ///
    /// A slot counts as a match when its valid bit is set and its key field
    /// equals `key` — an in-flight overwrite (stale checksum, lock bit) is
    /// still that key's slot.
    #[must_use]
    pub fn lookup(&self, key: &str) -> Option<u64> {
        let fp = slot::key_fingerprint(key);
        self.shape.probe_window(fp).find(|&i| {
            let s = self.slot(i);
            slot::word_is_valid(slot::read_word(s))
                && slot::key_bytes(s) == Some(key.as_bytes())
        })
    }

    /// Inserts or overwrites `(key, value)` at its probed position.
    ///
    /// # Errors
    ///
    /// [`TableError::NoSpace`] when the probe window holds neither the key
    /// nor a free slot; shape errors from the slot codec.
    pub fn insert(&mut self, key: &str, value: &[u8]) -> Result<u64, TableError> {
        let fp = slot::key_fingerprint(key);
        let mut target = self.lookup(key);
        if target.is_none() {
            target = self
                .shape
                .probe_window(fp)
                .find(|&i| slot::state_of(self.slot(i)) == slot::SlotState::Empty);
        }
        let index = target.ok_or(TableError::NoSpace)?;
        slot::encode_into(self.slot_mut(index), key, value)?;
        Ok(index)
    }

    /// Fraction of slots holding committed data. O(capacity).
    #[must_use]
    pub fn load_factor(&self) -> f64 {
        let valid = (0..self.capacity())
            .filter(|&i| slot::word_is_valid(slot::read_word(self.slot(i))))
            .count();
        valid as f64 / self.capacity() as f64
    }

    /// Probe distance of `key` from its home slot, if present.
    #[must_use]
    pub fn access_distance(&self, key: &str) -> Option<usize> {
        let fp = slot::key_fingerprint(key);
        let home = self.shape.slot_index(fp);
        self.lookup(key).map(|i| {
            ((i + self.capacity() - home) % self.capacity()) as usize
        })
    }
}

#[cfg(test)]
mod tests;
