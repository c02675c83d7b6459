//! # Bufferlist — multi-slot payload assembly
//!
//! A slot holds at most one payload segment, so a value larger than one
//! segment spans consecutive slots. The bufferlist is the staging area for
//! one operation: a contiguous run of slots that a write lays out before
//! emission and a read fills before validation. Keeping the slots contiguous
//! is what lets an operation move a whole span with a single one-sided copy.
//!
//! Layout rule for a spanning value: every slot carries the same key and its
//! own payload checksum; only the *head* slot records the total value length,
//! continuation slots record zero. A reader that lands on a slot with
//! `length = 0` therefore knows it is looking at the middle of some value and
//! must re-locate the head.
//!
//! ```text
//! set("k", 10000 bytes), 4096-byte segments:
//!
//!   ┌─ head ─────────┐ ┌─ continuation ─┐ ┌─ continuation ─┐
//!   │ 4096 B, len=10000│ │ 4096 B, len=0 │ │ 1808 B+0s, len=0│
//!   └────────────────┘ └────────────────┘ └────────────────┘
//! ```

use slot::{SlotError, Validity, PAYLOAD_LEN, SLOT_LEN};
use thiserror::Error;

/// Errors raised by bufferlist operations.
#[derive(Debug, Error)]
pub enum BufferListError {
    /// The value cannot fit this bufferlist.
    #[error("value too large for bufferlist: {0} bytes")]
    TooLarge(usize),

    /// The requested byte range lies outside the stored value.
    #[error("range out of bounds: offset {offset} + len {len}")]
    OutOfRange { offset: usize, len: usize },

    /// A constituent slot of the range failed validation.
    #[error("slot {index} in range is not valid")]
    InvalidSlot { index: usize },

    #[error(transparent)]
    Slot(#[from] SlotError),
}

/// Outcome of [`BufferList::validity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferValidity {
    /// Head and every slot the value spans are committed and consistent.
    Ok,
    /// The head slot is unused.
    Empty,
    /// The head slot is write-locked.
    Locked,
    /// The value's reported length exceeds what this bufferlist can hold.
    TooLarge,
    /// Part of the value is still remote: the span extends past the fetched
    /// slots, a continuation slot is inconsistent, or the head itself is a
    /// continuation slot (`length = 0`).
    PartialRemote,
    /// The head slot stores a different key.
    KeyMismatch,
    /// A checksum disagrees with the stored bytes.
    ChecksumMismatch,
}

/// Number of slots a value of `len` bytes occupies (at least one).
#[must_use]
pub fn slots_for(len: usize) -> usize {
    len.div_ceil(PAYLOAD_LEN).max(1)
}

/// A contiguous run of slots staged for one operation.
///
/// The bufferlist tracks how many of its slots currently hold meaningful
/// bytes (`fetched`): `set` stores the number it laid out, a read operation
/// records the number it pulled. Validation never looks past that mark.
pub struct BufferList {
    buf: Vec<u8>,
    capacity: usize,
    fetched: usize,
}

impl BufferList {
    /// Creates a zeroed bufferlist of `capacity` slots.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "bufferlist capacity must be positive");
        Self {
            buf: vec![0u8; capacity * SLOT_LEN],
            capacity,
            fetched: 0,
        }
    }

    /// Capacity in slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Largest value this bufferlist can hold, in bytes.
    #[must_use]
    pub fn max_value_len(&self) -> usize {
        self.capacity * PAYLOAD_LEN
    }

    /// Number of slots holding meaningful bytes.
    #[must_use]
    pub fn fetched(&self) -> usize {
        self.fetched
    }

    /// Borrows the first `n` slots as one contiguous byte run and marks them
    /// fetched. Read operations fill this before validating.
    ///
    /// # Panics
    ///
    /// Panics if `n` is zero or exceeds the capacity.
    pub fn prepare_fetch(&mut self, n: usize) -> &mut [u8] {
        assert!(n > 0 && n <= self.capacity, "fetch of {n} slots");
        self.fetched = n;
        &mut self.buf[..n * SLOT_LEN]
    }

    /// The contiguous bytes of the fetched slots, for emission.
    #[must_use]
    pub fn fetched_bytes(&self) -> &[u8] {
        &self.buf[..self.fetched * SLOT_LEN]
    }

    /// Borrows slot `i`.
    #[must_use]
    pub fn slot(&self, i: usize) -> &[u8] {
        &self.buf[i * SLOT_LEN..(i + 1) * SLOT_LEN]
    }

    /// Borrows slot `i` mutably.
    pub fn slot_mut(&mut self, i: usize) -> &mut [u8] {
        &mut self.buf[i * SLOT_LEN..(i + 1) * SLOT_LEN]
    }

    /// Lays `value` out across `⌈len/segment⌉` slots under `key`.
    ///
    /// Every slot gets the key and an independent payload checksum; the head
    /// records the total length, continuation slots record zero. Returns the
    /// number of slots used.
    ///
    /// # Errors
    ///
    /// [`BufferListError::TooLarge`] if the value exceeds the capacity, and
    /// key/value shape errors from the slot codec.
    pub fn set(&mut self, key: &str, value: &[u8]) -> Result<usize, BufferListError> {
        if value.len() > self.max_value_len() {
            return Err(BufferListError::TooLarge(value.len()));
        }

        let nr = slots_for(value.len());
        for i in 0..nr {
            let seg = &value[i * PAYLOAD_LEN..value.len().min((i + 1) * PAYLOAD_LEN)];
            let s = self.slot_mut(i);
            slot::encode_into(s, key, seg)?;
            if i > 0 {
                slot::set_length(s, 0);
            }
        }
        slot::set_length(self.slot_mut(0), value.len() as u32);

        self.fetched = nr;
        Ok(nr)
    }

    /// Total value length reported by the head slot.
    #[must_use]
    pub fn value_len(&self) -> u32 {
        slot::length_of(self.slot(0))
    }

    /// Checks the fetched slots against `expected_key`.
    ///
    /// The head slot is judged first and its verdict wins; a value that
    /// claims to span further than what was fetched — or a head that turns
    /// out to be a continuation slot — comes back as `PartialRemote` so the
    /// caller can decide whether to fetch a wider span.
    #[must_use]
    pub fn validity(&self, expected_key: &str) -> BufferValidity {
        if self.fetched == 0 {
            return BufferValidity::Empty;
        }

        match slot::validate(self.slot(0), expected_key) {
            Validity::Ok => {}
            Validity::Empty => return BufferValidity::Empty,
            Validity::Locked => return BufferValidity::Locked,
            Validity::KeyMismatch => return BufferValidity::KeyMismatch,
            Validity::ChecksumMismatch => return BufferValidity::ChecksumMismatch,
        }

        let len = self.value_len() as usize;
        if len == 0 {
            // A committed head always records its length; zero means this is
            // a continuation slot of some larger value.
            return BufferValidity::PartialRemote;
        }
        if len > self.max_value_len() {
            return BufferValidity::TooLarge;
        }

        let span = slots_for(len);
        if span > self.fetched {
            return BufferValidity::PartialRemote;
        }
        for i in 1..span {
            if slot::validate(self.slot(i), expected_key) != Validity::Ok {
                return BufferValidity::PartialRemote;
            }
        }
        BufferValidity::Ok
    }

    /// Gathers `[offset, offset + len)` of the stored value into a fresh
    /// buffer.
    ///
    /// Each constituent slot is re-validated against the head's key before
    /// its bytes are trusted.
    ///
    /// # Errors
    ///
    /// [`BufferListError::OutOfRange`] if the range exceeds the stored value,
    /// [`BufferListError::InvalidSlot`] if any slot in the range fails
    /// validation.
    pub fn take(&self, offset: usize, len: usize) -> Result<Vec<u8>, BufferListError> {
        let head_key = slot::decode(self.slot(0))?.key.to_owned();

        let value_len = self.value_len() as usize;
        let end = offset
            .checked_add(len)
            .filter(|&e| e <= value_len && e <= self.fetched * PAYLOAD_LEN)
            .ok_or(BufferListError::OutOfRange { offset, len })?;

        let mut out = Vec::with_capacity(len);
        let mut pos = offset;
        while pos < end {
            let i = pos / PAYLOAD_LEN;
            if slot::validate(self.slot(i), &head_key) != Validity::Ok {
                return Err(BufferListError::InvalidSlot { index: i });
            }
            let in_slot = pos % PAYLOAD_LEN;
            let run = (PAYLOAD_LEN - in_slot).min(end - pos);
            out.extend_from_slice(&slot::payload_of(self.slot(i))[in_slot..in_slot + run]);
            pos += run;
        }
        Ok(out)
    }
}
