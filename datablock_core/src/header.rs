//! Binary header & layout (§4.D).
//!
//! The header is the normative wire/storage layout: little-endian,
//! naturally aligned, bit-exact across every attacher. Everything after
//! `layout_checksum` in the field list below is covered by that
//! checksum; the mutable runtime counters that change on every
//! operation ([`RuntimeState`]) live in a separate, deliberately
//! un-checksummed block immediately after the header.

use crate::checksum::{compute_digest, ChecksumPolicy};
use crate::consts::{DEFAULT_RECLAIM_GRACE, LAYOUT_VERSION, MAGIC};
use crate::error::{DataBlockError, DataBlockResult};
use crate::mutex::SegmentMutexStorage;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use static_assertions::const_assert_eq;

/// How the engine routes committed slots to readers (§4.E).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConsumerSyncPolicy {
    /// Reader always sees the newest COMMITTED slot.
    LatestOnly = 0,
    /// Single subscribed reader, strict commit order, backpressure.
    SingleReader = 1,
    /// Multiple readers, read_index = min of all reader positions.
    SyncReader = 2,
}

impl ConsumerSyncPolicy {
    fn from_raw(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::LatestOnly),
            1 => Some(Self::SingleReader),
            2 => Some(Self::SyncReader),
            _ => None,
        }
    }
}

/// The ring discipline. Only `RingBuffer` exists today (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RingPolicy {
    RingBuffer = 0,
}

impl RingPolicy {
    fn from_raw(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::RingBuffer),
            _ => None,
        }
    }
}

/// The static, checksummed portion of the segment header (§4.D fields
/// 1-14).
#[repr(C)]
pub struct SegmentHeader {
    pub magic: u64,
    pub layout_version: u32,
    pub header_size: u32,
    pub page_size: u32,
    pub slot_size: u32,
    pub slot_buffer_size: u32,
    pub ring_capacity: u32,
    pub flex_zone_size: u32,
    pub flex_zone_offset: u32,
    pub rw_state_array_offset: u32,
    pub slot_buffer_array_offset: u32,
    pub heartbeat_table_offset: u32,
    pub consumer_sync_policy: u8,
    pub checksum_policy: u8,
    pub ring_policy: u8,
    _policy_pad: u8,
    pub shared_secret: u64,
    pub flex_zone_schema_hash: [u8; 32],
    pub slot_schema_hash: [u8; 32],
    pub segment_mutex_storage: SegmentMutexStorage,
    pub layout_checksum: [u8; 32],
}

/// Runtime counters that mutate on every operation. Deliberately not
/// covered by `layout_checksum` — see module docs.
#[repr(C)]
pub struct RuntimeState {
    pub next_sequence: AtomicU64,
    pub write_index: AtomicU32,
    pub active_consumer_count: AtomicU32,
    /// The creator's configured reclaim grace window (§9), in
    /// nanoseconds, published here so any attacher can read the canonical
    /// value without being told it out of band. `diagnostics::sweep`
    /// still accepts its own `grace` parameter for a caller that wants to
    /// sweep more (or less) aggressively than the configured default.
    reclaim_grace_ns: AtomicU64,
}

impl RuntimeState {
    pub const fn new(reclaim_grace: Duration) -> Self {
        Self {
            next_sequence: AtomicU64::new(1),
            write_index: AtomicU32::new(0),
            active_consumer_count: AtomicU32::new(0),
            reclaim_grace_ns: AtomicU64::new(reclaim_grace.as_nanos() as u64),
        }
    }

    /// The reclaim grace window this segment was created with (§9,
    /// "fixed at segment-creation time").
    pub fn reclaim_grace(&self) -> Duration {
        Duration::from_nanos(self.reclaim_grace_ns.load(Ordering::Acquire))
    }
}

impl Default for RuntimeState {
    fn default() -> Self {
        Self::new(DEFAULT_RECLAIM_GRACE)
    }
}

// Compile-time layout sanity: both structs are written into shared memory
// at a fixed offset (§4.D), and an accidental field addition or reordering
// that introduces compiler padding would silently shift every region
// after them. 184 = 8 (magic) + 44 (11 u32 fields) + 4 (4 u8 fields)
// + 8 (shared_secret) + 32 + 32 (schema hashes) + 24 (segment_mutex_storage)
// + 32 (layout_checksum); update this if a field is ever added.
const_assert_eq!(std::mem::size_of::<SegmentHeader>(), 184);
const_assert_eq!(std::mem::align_of::<SegmentHeader>(), 8);
const_assert_eq!(std::mem::size_of::<RuntimeState>(), 24);
const_assert_eq!(std::mem::align_of::<RuntimeState>(), 8);

/// Header region size, rounded up to `page_size` so the flex zone
/// starts on a page boundary.
fn header_region_size(page_size: u32) -> u32 {
    let needed = std::mem::size_of::<SegmentHeader>() + std::mem::size_of::<RuntimeState>();
    round_up(needed as u32, page_size)
}

fn round_up(value: u32, multiple: u32) -> u32 {
    let rem = value % multiple;
    if rem == 0 {
        value
    } else {
        value + (multiple - rem)
    }
}

/// Computed, validated region offsets for a new segment. Mirrors
/// exactly what gets written into [`SegmentHeader`]; kept as a separate
/// plain struct so creation-time validation can run before any bytes
/// are touched (§6 "never produce a partially-initialised segment").
pub struct LayoutPlan {
    pub page_size: u32,
    pub header_size: u32,
    pub slot_size: u32,
    pub slot_buffer_size: u32,
    pub ring_capacity: u32,
    pub flex_zone_size: u32,
    pub flex_zone_offset: u32,
    pub rw_state_array_offset: u32,
    pub rw_state_array_size: u32,
    pub slot_buffer_array_offset: u32,
    pub slot_buffer_array_size: u32,
    pub heartbeat_table_offset: u32,
    pub heartbeat_table_size: u32,
    pub total_size: usize,
}

impl LayoutPlan {
    pub fn compute(
        page_size: u32,
        declared_slot_size: u32,
        ring_capacity: u32,
        flex_zone_size: u32,
        checksum_policy: ChecksumPolicy,
        max_consumers: u32,
    ) -> DataBlockResult<LayoutPlan> {
        if ring_capacity == 0 {
            return Err(DataBlockError::ConfigInvalid {
                reason: "ring_capacity must be >= 1".into(),
            });
        }
        if page_size == 0 || !page_size.is_power_of_two() {
            return Err(DataBlockError::ConfigInvalid {
                reason: "physical_page_size must be a nonzero power of two".into(),
            });
        }
        if flex_zone_size == 0 || flex_zone_size % page_size != 0 {
            return Err(DataBlockError::ConfigInvalid {
                reason: "flex_zone_size must be a positive multiple of the page size".into(),
            });
        }

        let trailer = if checksum_policy.has_trailer() { 32u32 } else { 0 };
        let slot_buffer_size = round_up(declared_slot_size + trailer, 8);

        let header_size = header_region_size(page_size);
        let flex_zone_offset = header_size;
        let rw_state_array_offset = flex_zone_offset + flex_zone_size;
        let rw_state_entry = std::mem::size_of::<crate::rw_state::SlotRwState>() as u32;
        let rw_state_array_size = round_up(rw_state_entry * ring_capacity, page_size);

        let slot_buffer_array_offset = rw_state_array_offset + rw_state_array_size;
        let slot_buffer_array_size = round_up(slot_buffer_size * ring_capacity, page_size);

        let heartbeat_table_offset = slot_buffer_array_offset + slot_buffer_array_size;
        let heartbeat_entry = std::mem::size_of::<crate::heartbeat::HeartbeatEntry>() as u32;
        let heartbeat_table_size = round_up(heartbeat_entry * max_consumers, page_size);

        let total_size = (heartbeat_table_offset + heartbeat_table_size) as usize;

        Ok(LayoutPlan {
            page_size,
            header_size,
            slot_size: declared_slot_size,
            slot_buffer_size,
            ring_capacity,
            flex_zone_size,
            flex_zone_offset,
            rw_state_array_offset,
            rw_state_array_size,
            slot_buffer_array_offset,
            slot_buffer_array_size,
            heartbeat_table_offset,
            heartbeat_table_size,
            total_size,
        })
    }
}

impl SegmentHeader {
    /// Initialise a fresh header in place. Caller (the creator) is
    /// responsible for zeroing the rest of the segment separately.
    #[allow(clippy::too_many_arguments)]
    pub fn init_in_place(
        header: &mut SegmentHeader,
        plan: &LayoutPlan,
        shared_secret: u64,
        consumer_sync_policy: ConsumerSyncPolicy,
        checksum_policy: ChecksumPolicy,
        flex_zone_schema_hash: [u8; 32],
        slot_schema_hash: [u8; 32],
    ) {
        header.magic = MAGIC;
        header.layout_version = LAYOUT_VERSION;
        header.header_size = plan.header_size;
        header.page_size = plan.page_size;
        header.slot_size = plan.slot_size;
        header.slot_buffer_size = plan.slot_buffer_size;
        header.ring_capacity = plan.ring_capacity;
        header.flex_zone_size = plan.flex_zone_size;
        header.flex_zone_offset = plan.flex_zone_offset;
        header.rw_state_array_offset = plan.rw_state_array_offset;
        header.slot_buffer_array_offset = plan.slot_buffer_array_offset;
        header.heartbeat_table_offset = plan.heartbeat_table_offset;
        header.consumer_sync_policy = consumer_sync_policy as u8;
        header.checksum_policy = checksum_policy as u8;
        header.ring_policy = RingPolicy::RingBuffer as u8;
        header._policy_pad = 0;
        header.shared_secret = shared_secret;
        header.flex_zone_schema_hash = flex_zone_schema_hash;
        header.slot_schema_hash = slot_schema_hash;
        let _ = crate::mutex::SegmentMutex::init_in_place(&mut header.segment_mutex_storage);
        header.layout_checksum = [0u8; 32];
        header.layout_checksum = Self::compute_checksum(header);
    }

    /// Recompute the checksum over every header byte except
    /// `layout_checksum` itself.
    pub fn compute_checksum(header: &SegmentHeader) -> [u8; 32] {
        let full = std::mem::size_of::<SegmentHeader>();
        let checksummed_len = full - std::mem::size_of::<[u8; 32]>();
        let bytes = unsafe {
            std::slice::from_raw_parts(header as *const SegmentHeader as *const u8, checksummed_len)
        };
        compute_digest(bytes)
    }

    /// Validate magic, version, and layout checksum (§6 "attach fails").
    pub fn validate(header: &SegmentHeader) -> DataBlockResult<()> {
        if header.magic != MAGIC {
            return Err(DataBlockError::LayoutCorrupt {
                reason: "magic mismatch".into(),
            });
        }
        if header.layout_version != LAYOUT_VERSION {
            return Err(DataBlockError::LayoutCorrupt {
                reason: format!(
                    "unsupported layout_version {} (expected {})",
                    header.layout_version, LAYOUT_VERSION
                ),
            });
        }
        let recomputed = Self::compute_checksum(header);
        if recomputed != header.layout_checksum {
            return Err(DataBlockError::LayoutCorrupt {
                reason: "layout checksum mismatch (torn init or version skew)".into(),
            });
        }
        Ok(())
    }

    pub fn consumer_sync_policy(&self) -> ConsumerSyncPolicy {
        ConsumerSyncPolicy::from_raw(self.consumer_sync_policy)
            .expect("validated at attach time")
    }

    pub fn checksum_policy(&self) -> ChecksumPolicy {
        ChecksumPolicy::from_raw(self.checksum_policy).expect("validated at attach time")
    }

    pub fn ring_policy(&self) -> RingPolicy {
        RingPolicy::from_raw(self.ring_policy).expect("validated at attach time")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_plan_pages_every_region() {
        let plan = LayoutPlan::compute(4096, 64, 4, 4096, ChecksumPolicy::Enforced, 8).unwrap();
        assert_eq!(plan.flex_zone_offset % 4096, 0);
        assert_eq!(plan.rw_state_array_offset % 4096, 0);
        assert_eq!(plan.slot_buffer_array_offset % 4096, 0);
        assert_eq!(plan.heartbeat_table_offset % 4096, 0);
        assert!(plan.total_size > plan.heartbeat_table_offset as usize);
    }

    #[test]
    fn ring_capacity_zero_is_rejected() {
        assert!(LayoutPlan::compute(4096, 64, 0, 4096, ChecksumPolicy::None, 8).is_err());
    }

    #[test]
    fn flex_zone_must_be_page_multiple() {
        assert!(LayoutPlan::compute(4096, 64, 4, 100, ChecksumPolicy::None, 8).is_err());
    }

    #[test]
    fn checksum_policy_adds_a_trailer_to_slot_buffer_size() {
        let without = LayoutPlan::compute(4096, 64, 4, 4096, ChecksumPolicy::None, 8).unwrap();
        let with = LayoutPlan::compute(4096, 64, 4, 4096, ChecksumPolicy::Enforced, 8).unwrap();
        assert!(with.slot_buffer_size > without.slot_buffer_size);
    }
}
