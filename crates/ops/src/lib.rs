//! # Ops — typed one-sided operations
//!
//! Four primitives cover everything the engine ever asks of a region, each
//! owning its buffer and performing one submit-and-complete cycle against a
//! target. Retry and back-off policy live above, in the engine; an op either
//! completes or reports a typed failure.
//!
//! - [`ReadOp`] — pull a span of slots (one slot, a probe window, a value
//!   span) into an owned bufferlist.
//! - [`LockOp`] — claim a slot with a compare-and-swap on its atomic word,
//!   classifying the prior word on failure.
//! - [`UnlockOp`] — the inverse swap; failing it means the caller did not
//!   hold the lock it thought it held, which is a protocol error.
//! - [`PersistedWriteOp`] — write the buffered slots to one or more targets
//!   so that completion implies durability at the producer: payload bytes
//!   land first, the atomic word lands last (release store), the range is
//!   flushed, and a one-byte read-back on the same region closes the loop.
//!
//! For the primary target of a replicated write the head slot's word is
//! emitted with the lock bit held, so the slot stays locked through the
//! fanout; secondary targets get the word with the lock bit clear and are
//! readable the instant their write completes.

use bufferlist::BufferList;
use rmem::RmemError;
use session::Target;
use slot::{SLOT_LEN, WORD_OFFSET};
use thiserror::Error;

/// Failure taxonomy of the one-sided transport.
#[derive(Debug, Error)]
pub enum OpError {
    /// The request never took off: bad address range, bad capability,
    /// misaligned atomic.
    #[error("transport submit failed: {0}")]
    Submit(RmemError),

    /// The fabric reported an error completing the operation.
    #[error("transport completion failed: {0}")]
    Poll(RmemError),

    /// Completion wait exceeded its bound. Never produced by the mapped
    /// fabric (operations complete synchronously); kept for queued backends.
    #[error("transport wait exceeded bound")]
    Timeout,

    /// A CAS the protocol required to succeed observed a foreign prior word.
    #[error("unexpected CAS prior word {prior:#018x}")]
    CasUnexpected { prior: u64 },
}

impl From<RmemError> for OpError {
    fn from(e: RmemError) -> Self {
        match e {
            RmemError::Io(_) => OpError::Poll(e),
            _ => OpError::Submit(e),
        }
    }
}

/// Classified outcome of a lock attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    /// The slot held the expected key and is now locked by us.
    Acquired,
    /// The slot is uninitialized — the insert path proceeds without a lock,
    /// the write itself will initialize and validate it.
    Vacant,
    /// Another writer holds the lock.
    Busy,
    /// The slot holds a different key's fingerprint.
    KeyMismatch,
}

/// Address of a slot's atomic word.
fn word_addr(slot_addr: u64) -> u64 {
    slot_addr + WORD_OFFSET as u64
}

/// One-sided span read into an owned bufferlist.
pub struct ReadOp {
    pub buf: BufferList,
}

impl ReadOp {
    #[must_use]
    pub fn new(capacity_slots: usize) -> Self {
        Self {
            buf: BufferList::new(capacity_slots),
        }
    }

    /// Pulls `nr_slots` consecutive slots starting at `t.addr`.
    ///
    /// The bulk copy may tear an atomic word that is being CASed
    /// concurrently, so each slot's word is re-read through the atomic view
    /// afterwards; a torn *payload* is caught later by its checksum.
    pub fn perform(&mut self, t: &Target<'_>, nr_slots: usize) -> Result<(), OpError> {
        let bytes = self.buf.prepare_fetch(nr_slots);
        t.region.read(t.rkey, t.addr, bytes)?;
        for i in 0..nr_slots {
            let slot_addr = t.addr + (i * SLOT_LEN) as u64;
            let word = t.region.load_u64(t.rkey, word_addr(slot_addr))?;
            slot::write_word(self.buf.slot_mut(i), word);
        }
        Ok(())
    }
}

/// Lock CAS: `{fp, VALID, unlocked}` → `{fp, VALID, locked}`.
pub struct LockOp;

impl LockOp {
    /// `t.addr` is the slot's base address; the word offset is applied here.
    pub fn perform(&self, t: &Target<'_>, fingerprint: u32) -> Result<LockOutcome, OpError> {
        let expected = slot::unlocked_word(fingerprint);
        let locked = slot::locked_word(fingerprint);
        let prior = t
            .region
            .cas_u64(t.rkey, word_addr(t.addr), expected, locked)?;

        if prior == expected {
            return Ok(LockOutcome::Acquired);
        }
        if !slot::word_is_valid(prior) {
            return Ok(LockOutcome::Vacant);
        }
        if slot::word_is_locked(prior) {
            return Ok(LockOutcome::Busy);
        }
        if slot::word_fingerprint(prior) != fingerprint {
            return Ok(LockOutcome::KeyMismatch);
        }
        // Valid, unlocked, same fingerprint, yet not the expected word:
        // reserved bits were dirtied by something foreign.
        Err(OpError::CasUnexpected { prior })
    }
}

/// Unlock CAS: `{fp, VALID, locked}` → `{fp, VALID, unlocked}`.
pub struct UnlockOp;

impl UnlockOp {
    /// Any prior word other than our locked word means the engine's lock
    /// discipline was violated.
    pub fn perform(&self, t: &Target<'_>, fingerprint: u32) -> Result<(), OpError> {
        let locked = slot::locked_word(fingerprint);
        let unlocked = slot::unlocked_word(fingerprint);
        let prior = t
            .region
            .cas_u64(t.rkey, word_addr(t.addr), locked, unlocked)?;
        if prior == locked {
            Ok(())
        } else {
            Err(OpError::CasUnexpected { prior })
        }
    }
}

/// Durable write of the buffered slots, fanned out to replica targets.
pub struct PersistedWriteOp {
    pub buf: BufferList,
}

impl PersistedWriteOp {
    #[must_use]
    pub fn new(capacity_slots: usize) -> Self {
        Self {
            buf: BufferList::new(capacity_slots),
        }
    }

    /// Writes the buffer to every target. When `primary_leaves_locked` is
    /// set, the first target's head slot is emitted with the lock bit held.
    ///
    /// Results are index-aligned with `targets`; a failed secondary does not
    /// stop the fanout.
    pub fn perform(
        &mut self,
        targets: &[Target<'_>],
        primary_leaves_locked: bool,
    ) -> Vec<Result<(), OpError>> {
        targets
            .iter()
            .enumerate()
            .map(|(i, t)| self.write_one(t, primary_leaves_locked && i == 0))
            .collect()
    }

    fn write_one(&self, t: &Target<'_>, leave_locked: bool) -> Result<(), OpError> {
        let nr = self.buf.fetched();
        assert!(nr > 0, "persisted write with an empty buffer");

        for j in 0..nr {
            let s = self.buf.slot(j);
            let slot_addr = t.addr + (j * SLOT_LEN) as u64;

            // Data first, word last: a reader that sees the word sees the
            // bytes it covers.
            t.region.write(t.rkey, slot_addr, &s[..WORD_OFFSET])?;
            let mut word = slot::read_word(s);
            if j == 0 && leave_locked {
                word |= slot::WORD_LOCK;
            }
            t.region.store_u64(t.rkey, word_addr(slot_addr), word)?;
        }

        // Flush to the persistence domain, then a short read on the same
        // region: completion now implies durability at the producer.
        t.region.persist(t.rkey, t.addr, nr * SLOT_LEN)?;
        let mut probe = [0u8; 1];
        t.region.read(t.rkey, t.addr, &mut probe)?;
        Ok(())
    }
}
