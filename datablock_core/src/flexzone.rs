//! The flex zone: a single typed region, readable without slot
//! acquisition (§4.F).
//!
//! Writers mutate it under the segment mutex; readers observe it with
//! acquire semantics via an optimistic version stamp, the same
//! even-is-stable technique used for the segment-version counter this
//! crate's layout code descends from, generalised from "the whole
//! segment" to just this one region.

use crate::checksum::{compute_digest, verify_digest};
use crate::error::{DataBlockError, DataBlockResult};
use std::cell::UnsafeCell;
use std::sync::atomic::{fence, AtomicU32, AtomicU64, Ordering};

/// Fixed header preceding the raw flex-zone bytes.
///
/// `checksum` is only ever mutated by the current writer, who holds the
/// segment mutex while doing so (§4.F); readers only observe it after a
/// `checksum_valid` `Acquire` load pairs with the `Release` store that
/// follows the write, so the `UnsafeCell` never sees a torn read.
#[repr(C)]
pub struct FlexZoneControl {
    /// Bumped after every write. Readers retry if it changes mid-copy.
    version: AtomicU64,
    checksum_valid: AtomicU32,
    _pad: u32,
    checksum: UnsafeCell<[u8; 32]>,
}

// SAFETY: `checksum` is single-writer (under the segment mutex) and
// readers only touch it after a `checksum_valid` Acquire/Release pair.
unsafe impl Sync for FlexZoneControl {}

impl FlexZoneControl {
    pub const fn new() -> Self {
        Self {
            version: AtomicU64::new(0),
            checksum_valid: AtomicU32::new(0),
            _pad: 0,
            checksum: UnsafeCell::new([0u8; 32]),
        }
    }
}

impl Default for FlexZoneControl {
    fn default() -> Self {
        Self::new()
    }
}

const MAX_OPTIMISTIC_RETRIES: u32 = 10;

/// A view over the flex zone's control block and raw byte region.
pub struct FlexZone<'a> {
    control: &'a FlexZoneControl,
    bytes: &'a mut [u8],
}

impl<'a> FlexZone<'a> {
    /// # Safety
    /// `control` and `bytes` must point into the same segment's flex
    /// zone region and must not alias any other live reference.
    pub unsafe fn new(control: &'a FlexZoneControl, bytes: &'a mut [u8]) -> Self {
        Self { control, bytes }
    }

    /// Overwrite the flex zone with `value`'s raw bytes. Caller must
    /// already hold the segment mutex (§4.F "writers mutate it under the
    /// segment mutex").
    pub fn write<T: bytemuck::Pod>(&mut self, value: &T, checksum_policy_enforced: bool) {
        let bytes = bytemuck::bytes_of(value);
        assert!(
            bytes.len() <= self.bytes.len(),
            "flex zone type does not fit the declared flex_zone_size"
        );
        self.bytes[..bytes.len()].copy_from_slice(bytes);
        if checksum_policy_enforced {
            self.update_checksum();
        }
        fence(Ordering::Release);
        self.control.version.fetch_add(1, Ordering::AcqRel);
    }

    /// Read a `T` out of the flex zone using an optimistic version
    /// retry loop (§4.F "readers observe it with acquire semantics").
    pub fn read<T: bytemuck::Pod>(&self) -> DataBlockResult<T> {
        let size = std::mem::size_of::<T>();
        assert!(size <= self.bytes.len(), "flex zone is smaller than T");
        for _ in 0..MAX_OPTIMISTIC_RETRIES {
            let before = self.control.version.load(Ordering::Acquire);
            let mut out = T::zeroed();
            let dst = bytemuck::bytes_of_mut(&mut out);
            dst.copy_from_slice(&self.bytes[..size]);
            let after = self.control.version.load(Ordering::Acquire);
            if before == after {
                return Ok(out);
            }
            std::thread::yield_now();
        }
        Err(DataBlockError::Timeout)
    }

    /// Explicitly (re)compute and store the checksum over the flex
    /// zone's declared bytes (`ChecksumPolicy::Manual` path).
    pub fn update_checksum(&mut self) {
        let digest = compute_digest(self.bytes);
        // SAFETY: caller holds the segment mutex; no other writer can
        // be touching `checksum` concurrently.
        unsafe {
            *self.control.checksum.get() = digest;
        }
        self.control.checksum_valid.store(1, Ordering::Release);
    }

    /// Verify the stored checksum against the current bytes.
    pub fn verify_checksum(&self) -> bool {
        if self.control.checksum_valid.load(Ordering::Acquire) == 0 {
            return false;
        }
        // SAFETY: the Acquire load above pairs with the Release store in
        // `update_checksum`, so the bytes read here happen-after that write.
        let digest = unsafe { *self.control.checksum.get() };
        verify_digest(self.bytes, &digest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytemuck::{Pod, Zeroable};

    #[repr(C)]
    #[derive(Clone, Copy, Pod, Zeroable, Default, PartialEq, Debug)]
    struct Meta {
        a: u64,
        b: u64,
    }

    #[test]
    fn write_then_read_round_trips() {
        let control = FlexZoneControl::new();
        let mut storage = vec![0u8; 64];
        let mut zone = unsafe { FlexZone::new(&control, &mut storage) };
        zone.write(&Meta { a: 1, b: 2 }, false);
        let back: Meta = zone.read().unwrap();
        assert_eq!(back, Meta { a: 1, b: 2 });
    }

    #[test]
    fn checksum_detects_corruption() {
        let control = FlexZoneControl::new();
        let mut storage = vec![0u8; 64];
        let mut zone = unsafe { FlexZone::new(&control, &mut storage) };
        zone.write(&Meta { a: 1, b: 2 }, true);
        assert!(zone.verify_checksum());
        zone.bytes[0] ^= 0xFF;
        assert!(!zone.verify_checksum());
    }
}
