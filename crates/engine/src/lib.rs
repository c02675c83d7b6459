//! # Engine — the client-side KV engine
//!
//! The store is client-driven: servers expose passive slot regions and
//! everything else — placement, probing, locking, replication, persistence,
//! integrity checking — runs here, composed from the lower crates.
//!
//! ## Architecture
//!
//! ```text
//! Caller
//!   |
//!   v
//! ┌──────────────────────────────────────────────────────┐
//! │                      CLIENT                          │
//! │                                                      │
//! │ locate: caches ─or─ placement::Mapper + session pool │
//! │    |                                                 │
//! │    v                                                 │
//! │ read.rs  → ReadOp (probe window / single slot)       │
//! │            → bufferlist validity → payload           │
//! │                                                      │
//! │ write.rs → probe justification → LockOp(primary)     │
//! │            → PersistedWriteOp(all replicas)          │
//! │            → UnlockOp(primary)                       │
//! └──────────────────────────────────────────────────────┘
//!   one-sided read / write / CAS             (rmem fabric)
//! ```
//!
//! ## Module responsibilities
//!
//! | Module     | Purpose                                              |
//! |------------|------------------------------------------------------|
//! | `lib.rs`   | `Client` struct, config, errors, construction,       |
//! |            | `locate` + probe machinery, teardown                 |
//! | `read.rs`  | `get()`                                              |
//! | `write.rs` | `put()`                                              |
//!
//! ## Concurrency model
//!
//! A `Client` is single-threaded by design; run several instances for
//! parallelism. Mutual exclusion between clients exists *only* in the slots'
//! atomic words — there is no other coordination point anywhere in the
//! system. Locator caches are hints: every path that consumes one still
//! handles the slot disagreeing.

mod read;
mod write;

use bufferlist::BufferListError;
use hashtable::HeadlessTable;
use monitor::{MonitorClient, MonitorError};
use ops::{LockOp, OpError, PersistedWriteOp, ReadOp, UnlockOp};
use placement::{
    CacheStats, LocatorCaches, Mapper, PlacementError, PlacementHit, ReplicaSlot, ServerId,
    DEFAULT_COLLISION_SET_SIZE, DEFAULT_LOCATOR_CACHE_SIZE, DEFAULT_REDIRECTION_CACHE_SIZE,
};
use serde::Deserialize;
use session::{SessionError, SessionPool};
use slot::SlotError;
use std::fmt::Write as _;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Default slots in an operation buffer; bounds the largest value one
/// operation can stage.
pub const DEFAULT_OP_BUFFER_SLOTS: usize = 100;

/// Errors and terminal outcomes of client operations.
///
/// `NoSpace`, `TooLarge` and `Busy` are normal protocol outcomes surfaced as
/// typed variants; `Busy` is the retryable one. Transport and session
/// variants report infrastructure failures.
#[derive(Debug, Error)]
pub enum KvError {
    /// The key cannot be placed within the primary's probe window.
    #[error("no space in probe window")]
    NoSpace,

    /// The value does not fit a single-slot operation.
    #[error("value too large")]
    TooLarge,

    /// A writer holds the slot; retry later.
    #[error("slot busy, retry")]
    Busy,

    #[error("key too long: {0} bytes (max {})", slot::MAX_KEY_LEN)]
    KeyTooLong(usize),

    /// A malformed argument or configuration value, rejected synchronously.
    #[error("configuration: {0}")]
    Configuration(&'static str),

    /// The replica set maps to a server this client has no session for.
    #[error("server {0} unavailable")]
    ServerUnavailable(ServerId),

    /// No live server remains for the key's replica set.
    #[error("no live servers")]
    NoLiveServers,

    #[error(transparent)]
    Transport(#[from] OpError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Monitor(#[from] MonitorError),

    #[error(transparent)]
    Placement(#[from] PlacementError),

    #[error(transparent)]
    Buffer(#[from] BufferListError),

    #[error(transparent)]
    Slot(#[from] SlotError),
}

/// Client configuration. Field names follow the cluster config file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub monitor_address: String,
    /// Replication factor R; the first replica is the primary.
    pub num_replicas: usize,
    pub locator_cache_size: usize,
    pub redirection_cache_size: usize,
    pub collision_set_size: usize,
    /// Linear-probe window W.
    pub probe_window: usize,
    /// Slots per operation buffer.
    pub op_buffer_slots: usize,
    /// Control-plane socket timeout.
    pub rpc_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            monitor_address: "127.0.0.1:9100".into(),
            num_replicas: 3,
            locator_cache_size: DEFAULT_LOCATOR_CACHE_SIZE,
            redirection_cache_size: DEFAULT_REDIRECTION_CACHE_SIZE,
            collision_set_size: DEFAULT_COLLISION_SET_SIZE,
            probe_window: hashtable::DEFAULT_PROBE_WINDOW,
            op_buffer_slots: DEFAULT_OP_BUFFER_SLOTS,
            rpc_timeout_ms: 2_000,
        }
    }
}

impl ClientConfig {
    fn validate(&self) -> Result<(), KvError> {
        if self.num_replicas == 0 {
            return Err(KvError::Configuration("num_replicas must be positive"));
        }
        if self.probe_window == 0 {
            return Err(KvError::Configuration("probe_window must be positive"));
        }
        if self.op_buffer_slots < self.probe_window {
            return Err(KvError::Configuration(
                "op_buffer_slots must cover the probe window",
            ));
        }
        Ok(())
    }

    fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }
}

/// Data-plane operation counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpStats {
    pub reads: u64,
    pub writes: u64,
    pub cas: u64,
}

/// Outcome of a probe over the primary's window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProbeResult {
    /// The key sits at this window offset.
    Found(usize),
    /// The key is absent; this is the first free window offset.
    FirstFree(usize),
    /// Neither the key nor a free slot within the window.
    Exhausted,
}

/// One logical client instance. Not safe for concurrent use.
pub struct Client {
    id: u32,
    cfg: ClientConfig,
    mapper: Mapper,
    pool: SessionPool,
    caches: LocatorCaches,
    read_op: ReadOp,
    write_op: PersistedWriteOp,
    lock_op: LockOp,
    unlock_op: UnlockOp,
    stats: OpStats,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("num_replicas", &self.cfg.num_replicas)
            .field("sessions", &self.pool.len())
            .field("stats", &self.stats)
            .finish()
    }
}

impl Client {
    /// Builds a client: fetches the server list from the monitor, connects a
    /// session to every reachable server, and sizes the caches and operation
    /// buffers.
    pub fn connect(id: u32, cfg: ClientConfig) -> Result<Self, KvError> {
        cfg.validate()?;

        let listing =
            MonitorClient::new(cfg.monitor_address.as_str(), cfg.rpc_timeout()).get_servers()?;
        let mut mapper = Mapper::new(listing.into_iter().map(|s| (s.id, s.addr)).collect())?;
        let pool = SessionPool::connect(id, &mut mapper, cfg.rpc_timeout())?;
        let caches = LocatorCaches::new(
            cfg.locator_cache_size,
            cfg.redirection_cache_size,
            cfg.collision_set_size,
        )?;

        info!(
            client_id = id,
            servers = mapper.servers().len(),
            sessions = pool.len(),
            "client connected"
        );
        Ok(Self {
            id,
            read_op: ReadOp::new(cfg.op_buffer_slots),
            write_op: PersistedWriteOp::new(cfg.op_buffer_slots),
            lock_op: LockOp,
            unlock_op: UnlockOp,
            caches,
            mapper,
            pool,
            stats: OpStats::default(),
            cfg,
        })
    }

    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    #[must_use]
    pub fn stats(&self) -> OpStats {
        self.stats
    }

    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.caches.stats()
    }

    /// Human-readable cluster map, for diagnostics.
    #[must_use]
    pub fn dump_clustermap(&self) -> String {
        let mut out = String::new();
        for s in self.mapper.servers() {
            let session = if self.pool.session(s.id).is_some() {
                "session"
            } else {
                "-"
            };
            let _ = writeln!(
                out,
                "server {:>3}  {:<21} {:?} {}",
                s.id, s.addr, s.status, session
            );
        }
        out
    }

    /// Severs the session to one server and marks it down, as when the
    /// server fails mid-operation. Later operations skip it.
    pub fn disconnect_server(&mut self, id: ServerId) {
        self.pool.drop_session(id);
        self.mapper.mark_down(id);
        warn!(server_id = id, "server disconnected, marked down");
    }

    /// Strict teardown: disconnects every session. Prefer this over drop —
    /// a leaked session pins the server's region registration.
    pub fn close(self) -> Result<(), KvError> {
        self.pool.close()?;
        Ok(())
    }

    // ---- placement -----------------------------------------------------

    /// Per-replica slot locations for `fingerprint` at probe-window offset
    /// `offset`. Replicas whose server has no session are skipped.
    fn replica_slots_at(
        &self,
        fingerprint: u32,
        offset: usize,
    ) -> Result<Vec<ReplicaSlot>, KvError> {
        let ids = self.mapper.map(fingerprint, self.cfg.num_replicas);
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(sess) = self.pool.session(id) else {
                continue;
            };
            let slots = sess.slot_count();
            if slots == 0 {
                continue;
            }
            let home = u64::from(fingerprint) % slots;
            let index = (home + offset as u64) % slots;
            out.push(ReplicaSlot {
                server: id,
                addr: sess.base() + index * slot::SLOT_LEN as u64,
            });
        }
        if out.is_empty() {
            return Err(KvError::NoLiveServers);
        }
        Ok(out)
    }

    /// Resolves a key to its replica locations and whether a probe is still
    /// required: a redirection-cache hit yields the exact slots, a locator
    /// hit trusts the calculated position, anything else must probe.
    fn locate(
        &mut self,
        key: &str,
        fingerprint: u32,
    ) -> Result<(Vec<ReplicaSlot>, bool), KvError> {
        match self.caches.lookup(key) {
            PlacementHit::Abnormal(slots) => Ok((slots, false)),
            hit => {
                let need_probe = !matches!(hit, PlacementHit::Normal);
                Ok((self.replica_slots_at(fingerprint, 0)?, need_probe))
            }
        }
    }

    /// Records a justified placement in the caches.
    fn record_placement(&mut self, key: &str, offset: usize, slots: &[ReplicaSlot]) {
        if offset == 0 {
            self.caches.note_normal(key);
        } else {
            self.caches.note_abnormal(key, slots.to_vec());
        }
    }

    // ---- probing -------------------------------------------------------

    /// Reads the primary's probe window and searches it for `key`.
    ///
    /// The window is fetched with one read in the common case; only a window
    /// that wraps the end of the slot array costs a second read. The fetched
    /// slots stay in `read_op.buf`, and `Found`'s offset indexes the window
    /// (not the buffer) — [`window_slot`](Self::window_slot) maps it back.
    fn probe_window(&mut self, key: &str, fingerprint: u32) -> Result<ProbeResult, KvError> {
        let primary = self.primary_server(fingerprint)?;
        let sess = self
            .pool
            .session(primary)
            .ok_or(KvError::ServerUnavailable(primary))?;

        let table = HeadlessTable::new(sess.slot_count(), self.cfg.probe_window)
            .map_err(|_| KvError::Configuration("server region holds no slots"))?;
        let home = table.slot_index(fingerprint);
        let window = table.window();
        let contiguous = window.min((table.capacity() - home) as usize);

        let t = sess.target(table.slot_addr(sess.base(), home));
        self.stats.reads += 1;
        self.read_op.perform(&t, contiguous)?;

        let mut first_free = None;
        if let Some(r) = scan_slots(&self.read_op.buf, contiguous, 0, key, &mut first_free) {
            return Ok(r);
        }

        if contiguous < window {
            // The window wraps: fetch the remainder from the array start.
            let sess = self.pool.session(primary).expect("session vanished mid-probe");
            let t = sess.target(table.slot_addr(sess.base(), 0));
            self.stats.reads += 1;
            self.read_op.perform(&t, window - contiguous)?;
            if let Some(r) = scan_slots(
                &self.read_op.buf,
                window - contiguous,
                contiguous,
                key,
                &mut first_free,
            ) {
                return Ok(r);
            }
        }

        Ok(match first_free {
            Some(off) => ProbeResult::FirstFree(off),
            None => ProbeResult::Exhausted,
        })
    }

    /// Buffer index of window offset `off` after [`probe_window`]. When the
    /// window wrapped, the buffer holds the wrapped tail, re-based at zero.
    fn window_slot(&self, fingerprint: u32, off: usize) -> Result<usize, KvError> {
        let primary = self.primary_server(fingerprint)?;
        let sess = self
            .pool
            .session(primary)
            .ok_or(KvError::ServerUnavailable(primary))?;
        let capacity = sess.slot_count();
        let home = u64::from(fingerprint) % capacity;
        let contiguous = ((capacity - home) as usize).min(self.cfg.probe_window);
        Ok(if off < contiguous { off } else { off - contiguous })
    }

    fn primary_server(&self, fingerprint: u32) -> Result<ServerId, KvError> {
        self.mapper
            .map(fingerprint, self.cfg.num_replicas)
            .first()
            .copied()
            .ok_or(KvError::NoLiveServers)
    }

    fn check_key(key: &str) -> Result<(), KvError> {
        if key.is_empty() {
            return Err(KvError::Configuration("key must not be empty"));
        }
        if key.len() > slot::MAX_KEY_LEN {
            return Err(KvError::KeyTooLong(key.len()));
        }
        if key.as_bytes().contains(&0) {
            return Err(KvError::Configuration("key must not contain NUL"));
        }
        Ok(())
    }
}

/// Scans `n` fetched slots for `key`, tracking the first free slot. Offsets
/// are window offsets (`base_off` re-bases a wrapped tail). A slot counts as
/// the key's slot on valid bit + key equality alone, so an in-flight
/// overwrite is still found (and later classified busy) rather than the
/// probe claiming a second slot for the key.
fn scan_slots(
    buf: &bufferlist::BufferList,
    n: usize,
    base_off: usize,
    key: &str,
    first_free: &mut Option<usize>,
) -> Option<ProbeResult> {
    for i in 0..n {
        let s = buf.slot(i);
        let word = slot::read_word(s);
        if slot::word_is_valid(word) && slot::key_bytes(s) == Some(key.as_bytes()) {
            return Some(ProbeResult::Found(base_off + i));
        }
        if first_free.is_none() && slot::state_of(s) == slot::SlotState::Empty {
            *first_free = Some(base_off + i);
        }
    }
    None
}

#[cfg(test)]
mod tests;
