//! Read path: `get()`.
//!
//! A get resolves the key's primary slot (caches first, probe otherwise),
//! pulls the slot with one one-sided read, and judges what it fetched. The
//! server contributes nothing; a committed value is recognized purely by the
//! slot's own integrity fields, and anything inconsistent is a writer in
//! flight — reported as retryable, never returned.

use crate::{Client, KvError, ProbeResult};
use bufferlist::BufferValidity;
use slot::PAYLOAD_LEN;
use tracing::debug;

impl Client {
    /// Looks up a key.
    ///
    /// Returns `Ok(None)` for an absent key. A value spanning more than the
    /// single-slot read this cut supports comes back as
    /// [`KvError::TooLarge`]; a slot mid-overwrite comes back as
    /// [`KvError::Busy`] for the caller's retry policy.
    pub fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        Self::check_key(key)?;
        let fp = slot::key_fingerprint(key);

        let (locs, need_probe) = self.locate(key, fp)?;
        if need_probe {
            return self.probed_get(key, fp);
        }

        // Cached placement: one single-slot read at the primary.
        let primary = locs[0];
        let Some(sess) = self.pool.session(primary.server) else {
            self.caches.invalidate(key);
            self.mapper.mark_down(primary.server);
            return Err(KvError::ServerUnavailable(primary.server));
        };
        let t = sess.target(primary.addr);
        self.stats.reads += 1;
        self.read_op.perform(&t, 1)?;

        match self.read_op.buf.validity(key) {
            BufferValidity::Ok => {
                let len = self.read_op.buf.value_len() as usize;
                Ok(Some(self.read_op.buf.take(0, len)?))
            }
            BufferValidity::Empty => {
                self.caches.invalidate(key);
                Ok(None)
            }
            BufferValidity::Locked | BufferValidity::ChecksumMismatch => Err(KvError::Busy),
            BufferValidity::PartialRemote | BufferValidity::TooLarge => Err(KvError::TooLarge),
            BufferValidity::KeyMismatch => {
                // The hint went stale underneath us; fall back to a probe.
                debug!(key, "cached placement mismatched, re-probing");
                self.caches.invalidate(key);
                self.probed_get(key, fp)
            }
        }
    }

    /// Get via a probe-window read on the primary.
    fn probed_get(&mut self, key: &str, fp: u32) -> Result<Option<Vec<u8>>, KvError> {
        let offset = match self.probe_window(key, fp)? {
            ProbeResult::Found(off) => off,
            ProbeResult::FirstFree(_) | ProbeResult::Exhausted => return Ok(None),
        };

        let locs = self.replica_slots_at(fp, offset)?;
        self.record_placement(key, offset, &locs);

        let idx = self.window_slot(fp, offset)?;
        let s = self.read_op.buf.slot(idx);
        match slot::validate(s, key) {
            slot::Validity::Ok => {
                let len = slot::length_of(s) as usize;
                if len == 0 || len > PAYLOAD_LEN {
                    // Head of a spanning value (or a continuation slot):
                    // beyond the single-slot cut.
                    return Err(KvError::TooLarge);
                }
                Ok(Some(slot::payload_of(s)[..len].to_vec()))
            }
            // The probe matched on key bytes, so anything short of Ok here
            // is an overwrite in flight.
            _ => Err(KvError::Busy),
        }
    }
}
