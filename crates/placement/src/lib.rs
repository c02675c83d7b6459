//! # Placement — key → replica-set mapping and locator caches
//!
//! Placement is calculated, never negotiated: every client derives the same
//! ordered replica set for a key from nothing but the key's fingerprint and
//! the (immutable per session) server list fetched from the monitor at
//! startup. The first replica is the *primary*, the rest are secondaries.
//!
//! The walk starts at rank `fingerprint mod |servers|` over the id-sorted
//! list and proceeds upward modulo the list length, skipping servers marked
//! down, until the requested replica count is collected. Sorting by id is
//! what makes the result identical on every client regardless of the order
//! the monitor returned the listing.
//!
//! [`LocatorCaches`] holds the engine's three per-key hints: keys observed at
//! their calculated home slot, keys redirected to another probe-window
//! position (with the concrete per-replica addresses), and keys known to have
//! no placeable slot at all. Cache entries are hints — every consumer still
//! has to handle a fingerprint mismatch from the slot itself.

mod cache;

pub use cache::{
    CacheStats, LocatorCaches, PlacementHit, ReplicaSlot, DEFAULT_COLLISION_SET_SIZE,
    DEFAULT_LOCATOR_CACHE_SIZE, DEFAULT_REDIRECTION_CACHE_SIZE,
};

use thiserror::Error;

pub type ServerId = u32;

#[derive(Debug, Error)]
pub enum PlacementError {
    #[error("server list is empty")]
    NoServers,

    #[error("duplicate server id {0} in listing")]
    DuplicateServer(ServerId),

    #[error("cache capacity must be positive")]
    ZeroCacheSize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerStatus {
    Up,
    Down,
}

#[derive(Debug, Clone)]
pub struct ServerNode {
    pub id: ServerId,
    pub addr: String,
    pub status: ServerStatus,
}

/// Deterministic key → ordered replica set mapper.
#[derive(Debug)]
pub struct Mapper {
    /// Sorted by id ascending; order never changes while a client is
    /// connected.
    servers: Vec<ServerNode>,
}

impl Mapper {
    /// Builds a mapper from a monitor listing. All servers start `Up`.
    ///
    /// # Errors
    ///
    /// [`PlacementError::NoServers`] on an empty listing,
    /// [`PlacementError::DuplicateServer`] if an id repeats.
    pub fn new(listing: Vec<(ServerId, String)>) -> Result<Self, PlacementError> {
        if listing.is_empty() {
            return Err(PlacementError::NoServers);
        }
        let mut servers: Vec<ServerNode> = listing
            .into_iter()
            .map(|(id, addr)| ServerNode {
                id,
                addr,
                status: ServerStatus::Up,
            })
            .collect();
        servers.sort_by_key(|s| s.id);
        for pair in servers.windows(2) {
            if pair[0].id == pair[1].id {
                return Err(PlacementError::DuplicateServer(pair[0].id));
            }
        }
        Ok(Self { servers })
    }

    /// The ordered replica set for a fingerprint: up to `r` distinct live
    /// servers, primary first. Shorter than `r` when fewer servers are up.
    #[must_use]
    pub fn map(&self, fingerprint: u32, r: usize) -> Vec<ServerId> {
        let n = self.servers.len();
        let start = fingerprint as usize % n;
        let mut out = Vec::with_capacity(r);
        for off in 0..n {
            if out.len() == r {
                break;
            }
            let node = &self.servers[(start + off) % n];
            if node.status == ServerStatus::Up {
                out.push(node.id);
            }
        }
        out
    }

    /// Marks a server down; it will be skipped by every later `map`.
    pub fn mark_down(&mut self, id: ServerId) {
        if let Some(node) = self.servers.iter_mut().find(|s| s.id == id) {
            node.status = ServerStatus::Down;
        }
    }

    #[must_use]
    pub fn is_up(&self, id: ServerId) -> bool {
        self.get(id)
            .map(|s| s.status == ServerStatus::Up)
            .unwrap_or(false)
    }

    #[must_use]
    pub fn get(&self, id: ServerId) -> Option<&ServerNode> {
        self.servers.iter().find(|s| s.id == id)
    }

    /// All servers, id ascending.
    #[must_use]
    pub fn servers(&self) -> &[ServerNode] {
        &self.servers
    }

    #[must_use]
    pub fn up_count(&self) -> usize {
        self.servers
            .iter()
            .filter(|s| s.status == ServerStatus::Up)
            .count()
    }
}

#[cfg(test)]
mod tests;
