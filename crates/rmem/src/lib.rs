//! # rmem — one-sided remote-memory fabric
//!
//! The data plane of the store is a passive, byte-addressable region owned by
//! a server process. The server maps a persistent file-backed region
//! ([`RegionFile`]), registers it under a random region key, and publishes a
//! [`RegionDescriptor`]; from then on it never touches a slot on a client's
//! behalf. Clients attach the same region ([`MappedRegion`]) and perform
//! every operation one-sided: bulk reads and writes, 8-byte atomic loads,
//! stores and compare-and-swaps, and durable flushes.
//!
//! Addresses are the server's published virtual addresses, carried opaquely:
//! a client computes `base + slot_index * slot_len` and the mapping
//! translates back to its own view. The `(base, rkey)` pair is a borrowed
//! capability — clients never rewrite it, and every access presents the
//! `rkey` so a stale or foreign handle is rejected rather than honored.
//!
//! Ordering properties the rest of the store depends on:
//!
//! - [`MappedRegion::store_u64`] is a release store and
//!   [`MappedRegion::load_u64`] an acquire load: a writer that copies payload
//!   bytes and *then* stores the slot's trailing word publishes the payload
//!   to any reader that observes the word — the mapped-memory rendition of
//!   "the trailing byte of a write lands last".
//! - [`MappedRegion::cas_u64`] goes through a hardware atomic on the shared
//!   mapping and is totally ordered per address across all clients.
//! - [`MappedRegion::persist`] durably flushes a written range; a write
//!   followed by `persist` and a read-back is the fabric's persisted write.
//!
//! Operations complete synchronously, so this backend never reports a
//! completion timeout; the taxonomy slot for it lives with the operation
//! layer for queued transports.

use memmap2::{MmapMut, MmapOptions};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// A server's published region handle.
///
/// `path` names the backing file on the shared fabric, `base` is the
/// server-side virtual address the region is registered at, `rkey` is the
/// access capability. All four fields are opaque to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionDescriptor {
    pub path: String,
    pub base: u64,
    pub length: u64,
    pub rkey: u32,
}

#[derive(Debug, Error)]
pub enum RmemError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The access falls outside the registered region.
    #[error("access out of region bounds: addr {addr:#x}, len {len}")]
    OutOfBounds { addr: u64, len: usize },

    /// The presented region key does not match the registration.
    #[error("region key mismatch (presented {presented:#010x})")]
    BadKey { presented: u32 },

    /// Atomic access on a non-8-byte-aligned address.
    #[error("misaligned atomic access at {0:#x}")]
    Misaligned(u64),

    /// The backing file does not match the descriptor.
    #[error("region size mismatch: descriptor says {expected}, file has {actual}")]
    SizeMismatch { expected: u64, actual: u64 },
}

/// Server side: a mapped, registered region backed by a persistent file.
pub struct RegionFile {
    map: MmapMut,
    descriptor: RegionDescriptor,
}

impl RegionFile {
    /// Creates (or reopens) the backing file at `length` bytes, maps it, and
    /// registers it under `rkey`.
    ///
    /// Freshly extended bytes read as zero, i.e. as empty slots; existing
    /// bytes survive a reopen, which is what makes the region persistent
    /// across server restarts.
    pub fn create(path: &Path, length: u64, rkey: u32) -> Result<Self, RmemError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        file.set_len(length)?;
        let map = unsafe { MmapOptions::new().map_mut(&file)? };
        let descriptor = RegionDescriptor {
            path: path.display().to_string(),
            base: map.as_ptr() as u64,
            length,
            rkey,
        };
        Ok(Self { map, descriptor })
    }

    #[must_use]
    pub fn descriptor(&self) -> &RegionDescriptor {
        &self.descriptor
    }

    /// The raw region bytes. The server only ever uses this for formatting
    /// and diagnostics — never to serve client operations.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.map
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.map
    }

    /// Durably flushes the whole region.
    pub fn sync(&self) -> Result<(), RmemError> {
        self.map.flush()?;
        Ok(())
    }
}

/// Client side: an attached region plus one-sided access primitives.
pub struct MappedRegion {
    // Kept alive for the mapping; all access goes through `ptr`.
    map: MmapMut,
    ptr: *mut u8,
    base: u64,
    length: u64,
    rkey: u32,
}

impl MappedRegion {
    /// Attaches the region a descriptor names.
    ///
    /// # Errors
    ///
    /// [`RmemError::SizeMismatch`] if the backing file is smaller than the
    /// descriptor claims, I/O errors from mapping.
    pub fn attach(descriptor: &RegionDescriptor) -> Result<Self, RmemError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&descriptor.path)?;
        let actual = file.metadata()?.len();
        if actual < descriptor.length {
            return Err(RmemError::SizeMismatch {
                expected: descriptor.length,
                actual,
            });
        }
        let mut map = unsafe {
            MmapOptions::new()
                .len(descriptor.length as usize)
                .map_mut(&file)?
        };
        let ptr = map.as_mut_ptr();
        Ok(Self {
            map,
            ptr,
            base: descriptor.base,
            length: descriptor.length,
            rkey: descriptor.rkey,
        })
    }

    #[must_use]
    pub fn base(&self) -> u64 {
        self.base
    }

    #[must_use]
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Translates a remote address to a local offset, enforcing the
    /// capability and the region bounds.
    fn offset_of(&self, rkey: u32, addr: u64, len: usize) -> Result<usize, RmemError> {
        if rkey != self.rkey {
            return Err(RmemError::BadKey { presented: rkey });
        }
        let off = addr
            .checked_sub(self.base)
            .ok_or(RmemError::OutOfBounds { addr, len })?;
        match off.checked_add(len as u64) {
            Some(end) if end <= self.length => Ok(off as usize),
            _ => Err(RmemError::OutOfBounds { addr, len }),
        }
    }

    fn atomic_at(&self, rkey: u32, addr: u64) -> Result<&AtomicU64, RmemError> {
        let off = self.offset_of(rkey, addr, 8)?;
        if off % 8 != 0 {
            return Err(RmemError::Misaligned(addr));
        }
        // Alignment holds: the mapping is page-aligned and addr - base is a
        // multiple of 8.
        Ok(unsafe { &*(self.ptr.add(off) as *const AtomicU64) })
    }

    /// One-sided read of `out.len()` bytes at `addr`.
    pub fn read(&self, rkey: u32, addr: u64, out: &mut [u8]) -> Result<(), RmemError> {
        let off = self.offset_of(rkey, addr, out.len())?;
        unsafe {
            std::ptr::copy_nonoverlapping(self.ptr.add(off), out.as_mut_ptr(), out.len());
        }
        Ok(())
    }

    /// One-sided write of `data` at `addr`. Plain bytes only — the atomic
    /// word of a slot goes through [`store_u64`](Self::store_u64) so that it
    /// becomes visible after the data it covers.
    pub fn write(&self, rkey: u32, addr: u64, data: &[u8]) -> Result<(), RmemError> {
        let off = self.offset_of(rkey, addr, data.len())?;
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.ptr.add(off), data.len());
        }
        Ok(())
    }

    /// Acquire-load of the 8-byte word at `addr`.
    pub fn load_u64(&self, rkey: u32, addr: u64) -> Result<u64, RmemError> {
        Ok(self.atomic_at(rkey, addr)?.load(Ordering::Acquire))
    }

    /// Release-store of the 8-byte word at `addr`.
    pub fn store_u64(&self, rkey: u32, addr: u64, value: u64) -> Result<(), RmemError> {
        self.atomic_at(rkey, addr)?.store(value, Ordering::Release);
        Ok(())
    }

    /// 8-byte compare-and-swap at `addr`. Returns the prior word; the swap
    /// happened iff the prior word equals `expected`.
    pub fn cas_u64(
        &self,
        rkey: u32,
        addr: u64,
        expected: u64,
        new: u64,
    ) -> Result<u64, RmemError> {
        let atomic = self.atomic_at(rkey, addr)?;
        Ok(atomic
            .compare_exchange(expected, new, Ordering::SeqCst, Ordering::SeqCst)
            .unwrap_or_else(|prior| prior))
    }

    /// Durably flushes `[addr, addr + len)` to the persistence domain.
    pub fn persist(&self, rkey: u32, addr: u64, len: usize) -> Result<(), RmemError> {
        let off = self.offset_of(rkey, addr, len)?;
        self.map.flush_range(off, len)?;
        Ok(())
    }
}
