//! Write path: `put()`.
//!
//! A put justifies the key's placement on the primary (probe window), takes
//! the slot's lock with one CAS, fans a persisted write out to every replica,
//! and unlocks. The primary stays locked until every other replica has been
//! written and persisted, so a torn replica set is never observable: any
//! reader either sees the primary locked (retry) or a fully committed value.
//!
//! With `R = 1` the single replica is written with the lock bit already
//! clear — one round trip, no unlock step.

use crate::{Client, KvError, ProbeResult};
use ops::LockOutcome;
use placement::ReplicaSlot;
use session::Target;
use slot::PAYLOAD_LEN;
use tracing::{debug, warn};

impl Client {
    /// Stores `value` under `key`.
    ///
    /// `Err(NoSpace)` is the authoritative "cannot place this key" outcome;
    /// the key also enters the collision set so repeat puts short-circuit
    /// without network traffic. `Err(Busy)` means another writer holds the
    /// slot — retry. Values above one payload segment are rejected with
    /// `Err(TooLarge)` (multi-slot writes are out of scope), as are values
    /// above the operation buffer outright.
    pub fn put(&mut self, key: &str, value: &[u8]) -> Result<(), KvError> {
        Self::check_key(key)?;
        if value.is_empty() {
            return Err(KvError::Configuration("value must not be empty"));
        }
        if value.len() > self.write_op.buf.max_value_len() || value.len() > PAYLOAD_LEN {
            return Err(KvError::TooLarge);
        }
        if self.caches.is_collision(key) {
            debug!(key, "known collision, short-circuiting");
            return Err(KvError::NoSpace);
        }

        let fp = slot::key_fingerprint(key);

        // Placement: cached, or justified by probing the primary's window.
        let (locs, need_probe) = self.locate(key, fp)?;
        let locs = if need_probe {
            match self.probe_window(key, fp)? {
                ProbeResult::Found(off) | ProbeResult::FirstFree(off) => {
                    let locs = self.replica_slots_at(fp, off)?;
                    self.record_placement(key, off, &locs);
                    locs
                }
                ProbeResult::Exhausted => {
                    self.caches.mark_collision(key);
                    return Err(KvError::NoSpace);
                }
            }
        } else {
            locs
        };

        // Lock the primary slot (or find it vacant: the insert path).
        let primary = locs[0];
        let Some(sess) = self.pool.session(primary.server) else {
            self.caches.invalidate(key);
            self.mapper.mark_down(primary.server);
            return Err(KvError::ServerUnavailable(primary.server));
        };
        self.stats.cas += 1;
        let outcome = match self.lock_op.perform(&sess.target(primary.addr), fp) {
            Ok(o) => o,
            Err(e) => {
                self.caches.invalidate(key);
                return Err(e.into());
            }
        };
        match outcome {
            LockOutcome::Acquired | LockOutcome::Vacant => {}
            LockOutcome::Busy => return Err(KvError::Busy),
            LockOutcome::KeyMismatch => {
                self.caches.mark_collision(key);
                self.caches.invalidate(key);
                return Err(KvError::NoSpace);
            }
        }

        // Stage the slot image and fan it out. The primary keeps the lock
        // bit through the fanout whenever secondaries exist.
        self.write_op.buf.set(key, value)?;

        let mut live: Vec<ReplicaSlot> = Vec::with_capacity(locs.len());
        let mut lost: Vec<ReplicaSlot> = Vec::new();
        for l in &locs {
            if self.pool.session(l.server).is_some() {
                live.push(*l);
            } else {
                lost.push(*l);
            }
        }
        let leave_locked = live.len() > 1;

        let targets: Vec<Target<'_>> = live
            .iter()
            .map(|l| self.pool.session(l.server).expect("live session").target(l.addr))
            .collect();
        self.stats.writes += targets.len() as u64;
        let results = self.write_op.perform(&targets, leave_locked);
        drop(targets);

        for l in lost {
            warn!(key, server_id = l.server, "secondary lost before fanout");
            self.mapper.mark_down(l.server);
        }

        let mut fanout_iter = live.iter().zip(results);
        // The primary's write must land; without it nothing was committed.
        let (_, primary_result) = fanout_iter.next().expect("primary target");
        if let Err(e) = primary_result {
            self.caches.invalidate(key);
            warn!(key, server_id = primary.server, error = %e, "primary write failed");
            return Err(e.into());
        }
        // Failed secondaries shrink the surviving replica set but do not
        // fail the put; the object still meets its durability floor on the
        // primary side.
        for (l, r) in fanout_iter {
            if let Err(e) = r {
                warn!(key, server_id = l.server, error = %e, "secondary write failed");
                self.mapper.mark_down(l.server);
                self.pool.drop_session(l.server);
            }
        }

        // Release the primary: the final CAS makes the new value visible.
        if leave_locked {
            self.stats.cas += 1;
            let sess = self
                .pool
                .session(primary.server)
                .ok_or(KvError::ServerUnavailable(primary.server))?;
            if let Err(e) = self.unlock_op.perform(&sess.target(primary.addr), fp) {
                self.caches.invalidate(key);
                return Err(e.into());
            }
        }
        Ok(())
    }
}
