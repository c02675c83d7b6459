//! # Slot — on-medium record format
//!
//! The unit of storage in the headless hash table is a fixed-size **slot**: an
//! opaque payload segment followed by a 512-byte trailer. The table itself
//! keeps no metadata, so everything a client needs to judge a slot — key
//! identity, value length, integrity, lock state — lives inside the slot.
//!
//! ## Layout (little-endian)
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │ PAYLOAD SEGMENT (4096 bytes, value bytes + zero padding)       │
//! ├───────────────────────────────────────────────────────────────┤
//! │ TRAILER (512 bytes)                                            │
//! │                                                               │
//! │ +0    key (496 bytes, NUL-terminated; NUL at +0 = empty slot) │
//! │ +496  length (u32; value bytes for the head slot, 0 for a     │
//! │       continuation slot)                                      │
//! │ +500  data_crc (u32; CRC of the whole payload segment)        │
//! │ +504  atomic word (u64; see below)                            │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Atomic word
//!
//! ```text
//!  0              32              56      63
//! ┌───────────────┬───────────────┬─┬─────┬─┐
//! │ fingerprint   │ reserved = 0  │L│  0  │V│
//! └───────────────┴───────────────┴─┴─────┴─┘
//! ```
//!
//! `V` is the valid bit, `L` the lock bit. Both live in the trailing byte of
//! the slot: a single in-order write makes them visible *after* every payload
//! byte, so a reader can never observe a half-written payload behind a word
//! that claims the slot is committed. The fingerprint is a seeded CRC-32 of
//! the key, letting a writer claim a slot with one 8-byte compare-and-swap
//! instead of comparing 496 key bytes remotely.
//!
//! The payload checksum covers the *entire* payload segment (value plus zero
//! padding), so no length field participates in integrity checking. Unused
//! payload bytes must therefore be zeroed by the encoder.
//!
//! The layout is written with explicit little-endian accessors; it is a
//! storage format shared between co-architecture hosts, not a portable wire
//! format.

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

/// Bytes in the key field, including the mandatory NUL terminator.
pub const KEY_FIELD_LEN: usize = 496;
/// Longest encodable key in bytes.
pub const MAX_KEY_LEN: usize = KEY_FIELD_LEN - 1;
/// Bytes in the payload segment of one slot.
pub const PAYLOAD_LEN: usize = 4096;
/// Bytes in the trailer.
pub const TRAILER_LEN: usize = 512;
/// Total slot size. Must stay a multiple of 512.
pub const SLOT_LEN: usize = PAYLOAD_LEN + TRAILER_LEN;

/// Trailer field offsets, relative to the start of the slot.
pub const KEY_OFFSET: usize = PAYLOAD_LEN;
pub const LENGTH_OFFSET: usize = PAYLOAD_LEN + KEY_FIELD_LEN;
pub const DATA_CRC_OFFSET: usize = LENGTH_OFFSET + 4;
pub const WORD_OFFSET: usize = DATA_CRC_OFFSET + 4;

/// CRC-32 seed for key fingerprints. Non-zero so an all-zero word never
/// carries a plausible fingerprint.
pub const KEY_CRC_SEED: u32 = 0x0011_4514;
/// CRC-32 seed for payload checksums, distinct from the key seed.
pub const DATA_CRC_SEED: u32 = 0x0191_9810;

/// Lock bit: an exclusive writer is in progress.
pub const WORD_LOCK: u64 = 1 << 56;
/// Valid bit: the slot holds committed data.
pub const WORD_VALID: u64 = 1 << 63;
const WORD_FINGERPRINT_MASK: u64 = 0xffff_ffff;

const _: () = assert!(SLOT_LEN % 512 == 0);
const _: () = assert!(WORD_OFFSET + 8 == SLOT_LEN);
const _: () = assert!(WORD_OFFSET % 8 == 0);

/// Errors raised while encoding or decoding a slot.
#[derive(Debug, Error)]
pub enum SlotError {
    /// The key does not fit the 496-byte NUL-terminated key field.
    #[error("key too long: {0} bytes (max {MAX_KEY_LEN})")]
    KeyTooLong(usize),

    /// The key contains an interior NUL and cannot be stored as a C string.
    #[error("key contains a NUL byte")]
    KeyContainsNul,

    /// The value does not fit one payload segment.
    #[error("value too large for one slot: {0} bytes (max {PAYLOAD_LEN})")]
    ValueTooLarge(usize),

    /// The key field is not a NUL-terminated UTF-8 string.
    #[error("malformed key field")]
    MalformedKey,
}

/// Outcome of [`validate`], ordered by the check that failed first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validity {
    /// Committed, unlocked, checksums consistent.
    Ok,
    /// Unused slot: key field starts with NUL or the valid bit is clear.
    Empty,
    /// Committed but an exclusive writer is in progress.
    Locked,
    /// The stored key is not the expected key.
    KeyMismatch,
    /// Fingerprint or payload checksum disagrees with the stored bytes.
    ChecksumMismatch,
}

/// Coarse slot state, derived without an expected key. A checksum mismatch is
/// reported as `Corrupt`, which readers treat as "being overwritten".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Empty,
    Locked,
    Valid,
    Corrupt,
}

/// Decoded view over a slot's bytes.
#[derive(Debug)]
pub struct Decoded<'a> {
    pub key: &'a str,
    pub payload: &'a [u8],
    pub length: u32,
    pub state: SlotState,
}

fn crc32(seed: u32, bytes: &[u8]) -> u32 {
    let mut h = crc32fast::Hasher::new_with_initial(seed);
    h.update(bytes);
    h.finalize()
}

/// Seeded CRC-32 fingerprint of a key, excluding the trailing NUL.
#[must_use]
pub fn key_fingerprint(key: &str) -> u32 {
    key_fingerprint_bytes(key.as_bytes())
}

/// Fingerprint over raw key bytes (as stored in the key field, sans NUL).
#[must_use]
pub fn key_fingerprint_bytes(key: &[u8]) -> u32 {
    crc32(KEY_CRC_SEED, key)
}

/// Seeded CRC-32 of a full payload segment.
///
/// The checksum is only meaningful over the whole fixed segment; the encoder
/// zero-fills unused bytes so this holds.
#[must_use]
pub fn payload_checksum(segment: &[u8]) -> u32 {
    crc32(DATA_CRC_SEED, segment)
}

/// Builds an unlocked, valid atomic word for a key fingerprint.
#[must_use]
pub fn unlocked_word(fingerprint: u32) -> u64 {
    u64::from(fingerprint) | WORD_VALID
}

/// Same word with the lock bit set.
#[must_use]
pub fn locked_word(fingerprint: u32) -> u64 {
    unlocked_word(fingerprint) | WORD_LOCK
}

#[must_use]
pub fn word_fingerprint(word: u64) -> u32 {
    (word & WORD_FINGERPRINT_MASK) as u32
}

#[must_use]
pub fn word_is_valid(word: u64) -> bool {
    word & WORD_VALID != 0
}

#[must_use]
pub fn word_is_locked(word: u64) -> bool {
    word & WORD_LOCK != 0
}

/// Reads the atomic word from a slot's trailing 8 bytes.
///
/// This is a plain load over a local buffer; the remote CAS path goes through
/// the mapped region's atomic view instead.
#[must_use]
pub fn read_word(slot: &[u8]) -> u64 {
    LittleEndian::read_u64(&slot[WORD_OFFSET..WORD_OFFSET + 8])
}

/// Overwrites the atomic word in a local slot buffer.
pub fn write_word(slot: &mut [u8], word: u64) {
    LittleEndian::write_u64(&mut slot[WORD_OFFSET..WORD_OFFSET + 8], word);
}

/// The `length` trailer field.
#[must_use]
pub fn length_of(slot: &[u8]) -> u32 {
    LittleEndian::read_u32(&slot[LENGTH_OFFSET..LENGTH_OFFSET + 4])
}

/// Rewrites the `length` trailer field. Used by the bufferlist to zero the
/// length of continuation slots; the payload checksum does not cover it.
pub fn set_length(slot: &mut [u8], length: u32) {
    LittleEndian::write_u32(&mut slot[LENGTH_OFFSET..LENGTH_OFFSET + 4], length);
}

/// The stored payload checksum.
#[must_use]
pub fn data_crc_of(slot: &[u8]) -> u32 {
    LittleEndian::read_u32(&slot[DATA_CRC_OFFSET..DATA_CRC_OFFSET + 4])
}

/// The payload segment of a slot.
#[must_use]
pub fn payload_of(slot: &[u8]) -> &[u8] {
    &slot[..PAYLOAD_LEN]
}

/// The stored key bytes up to (excluding) the NUL terminator, or `None` if
/// the key field carries no terminator at all.
#[must_use]
pub fn key_bytes(slot: &[u8]) -> Option<&[u8]> {
    let field = &slot[KEY_OFFSET..KEY_OFFSET + KEY_FIELD_LEN];
    field.iter().position(|&b| b == 0).map(|n| &field[..n])
}

/// Encodes `(key, value)` into `slot`, producing a head slot: valid,
/// unlocked, `length = value.len()`, payload zero-padded, both checksums set.
///
/// # Panics
///
/// Panics if `slot` is not exactly [`SLOT_LEN`] bytes; that is a programming
/// error, not a data error.
///
/// # Errors
///
/// [`SlotError::KeyTooLong`] / [`SlotError::KeyContainsNul`] for keys the
/// field cannot carry, [`SlotError::ValueTooLarge`] for values that exceed
/// one payload segment (multi-slot layout is the bufferlist's job).
pub fn encode_into(slot: &mut [u8], key: &str, value: &[u8]) -> Result<(), SlotError> {
    assert_eq!(slot.len(), SLOT_LEN, "encode_into needs a full slot");

    let kb = key.as_bytes();
    if kb.len() > MAX_KEY_LEN {
        return Err(SlotError::KeyTooLong(kb.len()));
    }
    if kb.contains(&0) {
        return Err(SlotError::KeyContainsNul);
    }
    if value.len() > PAYLOAD_LEN {
        return Err(SlotError::ValueTooLarge(value.len()));
    }

    slot[..value.len()].copy_from_slice(value);
    slot[value.len()..PAYLOAD_LEN].fill(0);

    slot[KEY_OFFSET..KEY_OFFSET + kb.len()].copy_from_slice(kb);
    slot[KEY_OFFSET + kb.len()..KEY_OFFSET + KEY_FIELD_LEN].fill(0);

    set_length(slot, value.len() as u32);
    let crc = payload_checksum(&slot[..PAYLOAD_LEN]);
    LittleEndian::write_u32(&mut slot[DATA_CRC_OFFSET..DATA_CRC_OFFSET + 4], crc);

    // The valid bit lands with the word, after the data fields above.
    write_word(slot, unlocked_word(key_fingerprint_bytes(kb)));
    Ok(())
}

/// Decodes a slot into `{key, payload, length, state}`.
///
/// # Errors
///
/// [`SlotError::MalformedKey`] if the slot claims to be valid but its key
/// field is unterminated or not UTF-8.
pub fn decode(slot: &[u8]) -> Result<Decoded<'_>, SlotError> {
    assert_eq!(slot.len(), SLOT_LEN, "decode needs a full slot");

    let state = state_of(slot);
    if state == SlotState::Empty {
        return Ok(Decoded {
            key: "",
            payload: payload_of(slot),
            length: 0,
            state,
        });
    }

    let kb = key_bytes(slot).ok_or(SlotError::MalformedKey)?;
    let key = std::str::from_utf8(kb).map_err(|_| SlotError::MalformedKey)?;
    Ok(Decoded {
        key,
        payload: payload_of(slot),
        length: length_of(slot),
        state,
    })
}

/// Validates a slot against an expected key.
///
/// Checks run in a fixed order and the first failure wins: emptiness (key
/// field / valid bit), key identity, key fingerprint, lock bit, payload
/// checksum. Ordering matters — a locked slot must classify as `Locked` even
/// though its payload checksum is typically stale mid-overwrite.
#[must_use]
pub fn validate(slot: &[u8], expected_key: &str) -> Validity {
    assert_eq!(slot.len(), SLOT_LEN, "validate needs a full slot");

    let word = read_word(slot);
    if slot[KEY_OFFSET] == 0 || !word_is_valid(word) {
        return Validity::Empty;
    }
    let Some(kb) = key_bytes(slot) else {
        return Validity::ChecksumMismatch;
    };
    if kb != expected_key.as_bytes() {
        return Validity::KeyMismatch;
    }
    if key_fingerprint_bytes(kb) != word_fingerprint(word) {
        return Validity::ChecksumMismatch;
    }
    if word_is_locked(word) {
        return Validity::Locked;
    }
    if payload_checksum(&slot[..PAYLOAD_LEN]) != data_crc_of(slot) {
        return Validity::ChecksumMismatch;
    }
    Validity::Ok
}

/// Classifies a slot without an expected key.
#[must_use]
pub fn state_of(slot: &[u8]) -> SlotState {
    assert_eq!(slot.len(), SLOT_LEN, "state_of needs a full slot");

    let word = read_word(slot);
    if slot[KEY_OFFSET] == 0 || !word_is_valid(word) {
        return SlotState::Empty;
    }
    let Some(kb) = key_bytes(slot) else {
        return SlotState::Corrupt;
    };
    if key_fingerprint_bytes(kb) != word_fingerprint(word) {
        return SlotState::Corrupt;
    }
    if word_is_locked(word) {
        return SlotState::Locked;
    }
    if payload_checksum(&slot[..PAYLOAD_LEN]) != data_crc_of(slot) {
        return SlotState::Corrupt;
    }
    SlotState::Valid
}
