//! The engine's locator caches.
//!
//! Three LRU maps keyed by the key string:
//!
//! - `normal_placements` — keys last observed at their calculated home slot;
//!   presence alone lets the engine skip the probe read.
//! - `abnormal_placements` — keys justified to a probe-window position other
//!   than the home slot, with the concrete per-replica slot addresses.
//! - `collisions` — keys that failed placement justification entirely;
//!   short-circuits repeat puts to `NoSpace` without touching the network.
//!
//! A key lives in at most one of the first two maps at a time.

use crate::{PlacementError, ServerId};
use lru::LruCache;
use std::num::NonZeroUsize;

/// Sized so a fully populated cache stays in the tens of megabytes even with
/// near-max-length keys.
pub const DEFAULT_LOCATOR_CACHE_SIZE: usize = 10_000_000;
pub const DEFAULT_REDIRECTION_CACHE_SIZE: usize = 1_000_000;
pub const DEFAULT_COLLISION_SET_SIZE: usize = 10_000;

/// One replica's concrete slot location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicaSlot {
    pub server: ServerId,
    pub addr: u64,
}

/// Outcome of a cache lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlacementHit {
    /// The key was last seen at its calculated home slot.
    Normal,
    /// The key was justified to a redirected position; these are its
    /// per-replica addresses.
    Abnormal(Vec<ReplicaSlot>),
    Miss,
}

/// Occupancy counters for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub normal: usize,
    pub abnormal: usize,
    pub collisions: usize,
}

pub struct LocatorCaches {
    normal: LruCache<String, ()>,
    abnormal: LruCache<String, Vec<ReplicaSlot>>,
    collisions: LruCache<String, ()>,
}

impl LocatorCaches {
    /// # Errors
    ///
    /// [`PlacementError::ZeroCacheSize`] if any capacity is zero.
    pub fn new(
        locator_size: usize,
        redirection_size: usize,
        collision_size: usize,
    ) -> Result<Self, PlacementError> {
        let cap = |n: usize| NonZeroUsize::new(n).ok_or(PlacementError::ZeroCacheSize);
        Ok(Self {
            normal: LruCache::new(cap(locator_size)?),
            abnormal: LruCache::new(cap(redirection_size)?),
            collisions: LruCache::new(cap(collision_size)?),
        })
    }

    /// Looks a key up, preferring the redirected location (it is the precise
    /// one). Touches the LRU order of whichever map hits.
    pub fn lookup(&mut self, key: &str) -> PlacementHit {
        if let Some(slots) = self.abnormal.get(key) {
            return PlacementHit::Abnormal(slots.clone());
        }
        if self.normal.get(key).is_some() {
            return PlacementHit::Normal;
        }
        PlacementHit::Miss
    }

    /// Records a key observed at its home slot.
    pub fn note_normal(&mut self, key: &str) {
        self.abnormal.pop(key);
        self.normal.put(key.to_owned(), ());
    }

    /// Records a key justified to a redirected position.
    pub fn note_abnormal(&mut self, key: &str, slots: Vec<ReplicaSlot>) {
        self.normal.pop(key);
        self.abnormal.put(key.to_owned(), slots);
    }

    /// Drops both placement hints for a key.
    pub fn invalidate(&mut self, key: &str) {
        self.normal.pop(key);
        self.abnormal.pop(key);
    }

    /// Remembers that this key could not be placed.
    pub fn mark_collision(&mut self, key: &str) {
        self.collisions.put(key.to_owned(), ());
    }

    /// Whether this key is known unplaceable. Touches the LRU order.
    pub fn is_collision(&mut self, key: &str) -> bool {
        self.collisions.get(key).is_some()
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            normal: self.normal.len(),
            abnormal: self.abnormal.len(),
            collisions: self.collisions.len(),
        }
    }
}
