//! The mapped segment: owns the `mmap` and carves it into the regions
//! described by §3/§4.D.
//!
//! [`Segment`] is the uniquely-owned creator handle (§9 "the segment is
//! a uniquely-owned resource by the creator"); [`AttachedSegment`] is
//! the shared, read/write view every other attacher holds. Both
//! ultimately hand out the same region accessors, since once attached
//! the binary layout is identical regardless of who created it.

use crate::checksum::ChecksumPolicy;
use crate::consts::{DEFAULT_RECLAIM_GRACE, MAX_CONSUMERS};
use crate::error::{DataBlockError, DataBlockResult};
use crate::flexzone::{FlexZone, FlexZoneControl};
use crate::header::{ConsumerSyncPolicy, LayoutPlan, RuntimeState, SegmentHeader};
use crate::heartbeat::HeartbeatTable;
use crate::mutex::SegmentMutex;
use crate::platform;
use crate::rw_state::SlotRwState;
use crate::schema::UNTYPED_SCHEMA_HASH;
use std::mem::size_of;
use std::time::Duration;

/// Options validated once, at creation time (§6 "Creation configuration").
pub struct CreationConfig {
    pub consumer_sync_policy: ConsumerSyncPolicy,
    pub checksum_policy: ChecksumPolicy,
    pub shared_secret: u64,
    pub ring_capacity: u32,
    pub physical_page_size: u32,
    pub flex_zone_size: u32,
    pub slot_size: u32,
    pub flex_zone_schema_hash: [u8; 32],
    pub slot_schema_hash: [u8; 32],
    /// If a stale segment from a dead creator already holds this name,
    /// overwrite it instead of failing (§6 "collisions with a stale
    /// segment ... trigger overwrite only if the caller passed an
    /// explicit `force` option").
    pub force: bool,
    /// How long a slot stuck in `WRITING`/`DRAINING` with a confirmed-dead
    /// writer must sit before [`crate::diagnostics::sweep`] may force-reclaim
    /// it (§9). Fixed at creation time and published into [`RuntimeState`]
    /// so any attacher can read the creator's configured value; must be
    /// strictly positive.
    pub reclaim_grace: Duration,
}

impl CreationConfig {
    pub fn new(ring_capacity: u32, slot_size: u32, flex_zone_size: u32) -> Self {
        Self {
            consumer_sync_policy: ConsumerSyncPolicy::SingleReader,
            checksum_policy: ChecksumPolicy::None,
            shared_secret: 0,
            ring_capacity,
            physical_page_size: 4096,
            flex_zone_size,
            slot_size,
            flex_zone_schema_hash: UNTYPED_SCHEMA_HASH,
            slot_schema_hash: UNTYPED_SCHEMA_HASH,
            force: false,
            reclaim_grace: DEFAULT_RECLAIM_GRACE,
        }
    }

    fn plan(&self) -> DataBlockResult<LayoutPlan> {
        LayoutPlan::compute(
            self.physical_page_size,
            self.slot_size,
            self.ring_capacity,
            self.flex_zone_size,
            self.checksum_policy,
            MAX_CONSUMERS as u32,
        )
    }
}

/// A live mapping, regardless of whether this process created it.
/// Carries raw region pointers computed once at attach time.
pub struct MappedRegions {
    mmap: memmap2::MmapMut,
    flex_zone_offset: usize,
    flex_zone_size: usize,
    rw_state_array_offset: usize,
    slot_buffer_array_offset: usize,
    slot_buffer_size: usize,
    heartbeat_table_offset: usize,
    ring_capacity: usize,
}

impl MappedRegions {
    fn base_ptr(&self) -> *mut u8 {
        self.mmap.as_ptr() as *mut u8
    }

    pub fn header(&self) -> &SegmentHeader {
        unsafe { &*(self.base_ptr() as *const SegmentHeader) }
    }

    #[allow(clippy::mut_from_ref)]
    fn header_mut(&self) -> &mut SegmentHeader {
        unsafe { &mut *(self.base_ptr() as *mut SegmentHeader) }
    }

    pub fn runtime_state(&self) -> &RuntimeState {
        unsafe { &*(self.base_ptr().add(size_of::<SegmentHeader>()) as *const RuntimeState) }
    }

    pub fn segment_mutex(&self) -> SegmentMutex<'_> {
        SegmentMutex::from_existing(&self.header().segment_mutex_storage)
    }

    pub fn flex_zone_control(&self) -> &FlexZoneControl {
        unsafe { &*(self.base_ptr().add(self.flex_zone_offset) as *const FlexZoneControl) }
    }

    #[allow(clippy::mut_from_ref)]
    pub fn flex_zone_bytes(&self) -> &mut [u8] {
        unsafe {
            let ptr = self
                .base_ptr()
                .add(self.flex_zone_offset + size_of::<FlexZoneControl>());
            std::slice::from_raw_parts_mut(ptr, self.flex_zone_size - size_of::<FlexZoneControl>())
        }
    }

    pub fn rw_state(&self, index: usize) -> &SlotRwState {
        assert!(index < self.ring_capacity);
        unsafe {
            let ptr = self
                .base_ptr()
                .add(self.rw_state_array_offset + index * size_of::<SlotRwState>())
                as *const SlotRwState;
            &*ptr
        }
    }

    #[allow(clippy::mut_from_ref)]
    pub fn slot_buffer(&self, index: usize) -> &mut [u8] {
        assert!(index < self.ring_capacity);
        unsafe {
            let ptr = self
                .base_ptr()
                .add(self.slot_buffer_array_offset + index * self.slot_buffer_size);
            std::slice::from_raw_parts_mut(ptr, self.slot_buffer_size)
        }
    }

    pub fn heartbeat_table(&self) -> &HeartbeatTable {
        unsafe { &*(self.base_ptr().add(self.heartbeat_table_offset) as *const HeartbeatTable) }
    }

    pub fn ring_capacity(&self) -> usize {
        self.ring_capacity
    }

    pub fn slot_buffer_size(&self) -> usize {
        self.slot_buffer_size
    }

    /// A typed view over the flex zone (§4.F), synchronized by its own
    /// optimistic version counter independent of the slot ring.
    pub fn flex_zone(&self) -> FlexZone<'_> {
        // SAFETY: `flex_zone_control` and `flex_zone_bytes` both point
        // into this mapping's flex zone region for its entire lifetime;
        // `FlexZone` itself enforces synchronization via the version
        // counter, so handing out multiple instances is safe as long as
        // none of them alias a `&mut` byte slice concurrently in a way
        // `write`/`read` don't already guard against.
        unsafe { FlexZone::new(self.flex_zone_control(), self.flex_zone_bytes()) }
    }
}

/// The creator's uniquely-owned handle. Dropping it unlinks the
/// segment name (§5 "the creator process exclusively owns unlink").
pub struct Segment {
    name: String,
    regions: MappedRegions,
}

impl Segment {
    /// Create and initialise a brand-new segment (§3 "Creator").
    pub fn create(name: &str, config: &CreationConfig) -> DataBlockResult<Segment> {
        validate_name(name)?;
        if config.reclaim_grace.is_zero() {
            return Err(DataBlockError::ConfigInvalid {
                reason: "reclaim_grace must be strictly positive".into(),
            });
        }
        let plan = config.plan()?;

        let mmap = match platform::shm_create(name, plan.total_size) {
            Ok(m) => m,
            Err(DataBlockError::PlatformIo { source })
                if config.force && source.kind() == std::io::ErrorKind::AlreadyExists =>
            {
                let _ = platform::shm_unlink(name);
                platform::shm_create(name, plan.total_size)?
            }
            Err(e) => return Err(e),
        };

        let regions = MappedRegions {
            mmap,
            flex_zone_offset: plan.flex_zone_offset as usize,
            flex_zone_size: plan.flex_zone_size as usize,
            rw_state_array_offset: plan.rw_state_array_offset as usize,
            slot_buffer_array_offset: plan.slot_buffer_array_offset as usize,
            slot_buffer_size: plan.slot_buffer_size as usize,
            heartbeat_table_offset: plan.heartbeat_table_offset as usize,
            ring_capacity: plan.ring_capacity as usize,
        };

        // SAFETY: we just created this mapping; nobody else can observe
        // it until we publish by returning from this function.
        unsafe {
            let header = regions.header_mut();
            SegmentHeader::init_in_place(
                header,
                &plan,
                config.shared_secret,
                config.consumer_sync_policy,
                config.checksum_policy,
                config.flex_zone_schema_hash,
                config.slot_schema_hash,
            );
            std::ptr::write(
                regions.base_ptr().add(size_of::<SegmentHeader>()) as *mut RuntimeState,
                RuntimeState::new(config.reclaim_grace),
            );
            std::ptr::write(
                regions.flex_zone_control() as *const FlexZoneControl as *mut FlexZoneControl,
                FlexZoneControl::new(),
            );
            for i in 0..regions.ring_capacity {
                let ptr = regions
                    .base_ptr()
                    .add(regions.rw_state_array_offset + i * size_of::<SlotRwState>())
                    as *mut SlotRwState;
                std::ptr::write(ptr, SlotRwState::new());
            }
            std::ptr::write(
                regions.heartbeat_table() as *const HeartbeatTable as *mut HeartbeatTable,
                HeartbeatTable::new(),
            );
        }

        tracing::info!(name, capacity = plan.ring_capacity, "segment created");
        Ok(Segment {
            name: name.to_string(),
            regions,
        })
    }

    pub fn regions(&self) -> &MappedRegions {
        &self.regions
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        if let Err(err) = platform::shm_unlink(&self.name) {
            tracing::error!(name = %self.name, %err, "failed to unlink segment on drop");
        }
    }
}

/// A shared, non-owning attach to an existing segment (§3
/// "WriteAttacher"/"Consumer"). Never unlinks.
pub struct AttachedSegment {
    regions: MappedRegions,
}

impl AttachedSegment {
    /// Attach to an existing segment, validating magic/version/layout
    /// checksum, the shared secret, and (if non-zero) the schema
    /// hashes (§3 invariants, §8 "Schema-gated attach").
    pub fn attach(
        name: &str,
        shared_secret: u64,
        expected_flex_schema_hash: Option<[u8; 32]>,
        expected_slot_schema_hash: Option<[u8; 32]>,
    ) -> DataBlockResult<AttachedSegment> {
        validate_name(name)?;

        // We don't know the true size up front; probe with the header
        // region, validate, then re-map at the declared total size.
        let probe = platform::shm_attach(name, size_of::<SegmentHeader>())?;
        let header = unsafe { &*(probe.as_ptr() as *const SegmentHeader) };
        SegmentHeader::validate(header)?;

        if header.shared_secret != shared_secret {
            return Err(DataBlockError::SecretMismatch);
        }
        if let Some(expected) = expected_flex_schema_hash {
            if header.flex_zone_schema_hash != UNTYPED_SCHEMA_HASH
                && header.flex_zone_schema_hash != expected
            {
                return Err(DataBlockError::SchemaMismatch { region: "flex zone" });
            }
        }
        if let Some(expected) = expected_slot_schema_hash {
            if header.slot_schema_hash != UNTYPED_SCHEMA_HASH && header.slot_schema_hash != expected
            {
                return Err(DataBlockError::SchemaMismatch { region: "slot" });
            }
        }

        let total_size =
            header.heartbeat_table_offset as usize + heartbeat_table_size(header.page_size);
        drop(probe);

        let mmap = platform::shm_attach(name, total_size)?;
        let regions = MappedRegions {
            mmap,
            flex_zone_offset: header.flex_zone_offset as usize,
            flex_zone_size: header.flex_zone_size as usize,
            rw_state_array_offset: header.rw_state_array_offset as usize,
            slot_buffer_array_offset: header.slot_buffer_array_offset as usize,
            slot_buffer_size: header.slot_buffer_size as usize,
            heartbeat_table_offset: header.heartbeat_table_offset as usize,
            ring_capacity: header.ring_capacity as usize,
        };
        // Re-validate against the freshly (and fully) mapped header, in
        // case the probe mapping and the full mapping somehow disagree.
        SegmentHeader::validate(regions.header())?;

        Ok(AttachedSegment { regions })
    }

    pub fn regions(&self) -> &MappedRegions {
        &self.regions
    }
}

fn heartbeat_table_size(page_size: u32) -> usize {
    let entry = size_of::<crate::heartbeat::HeartbeatEntry>() as u32;
    let needed = entry * MAX_CONSUMERS as u32;
    let rem = needed % page_size;
    (if rem == 0 { needed } else { needed + (page_size - rem) }) as usize
}

fn validate_name(name: &str) -> DataBlockResult<()> {
    if name.is_empty() || name.len() > datablock_common::consts::MAX_SEGMENT_NAME_LEN {
        return Err(DataBlockError::ConfigInvalid {
            reason: "segment name must be 1..=MAX_SEGMENT_NAME_LEN bytes".into(),
        });
    }
    if name.contains('/') {
        return Err(DataBlockError::ConfigInvalid {
            reason: "segment name must not contain '/'".into(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_name(tag: &str) -> String {
        format!(
            "dbtest_{tag}_{}_{}",
            platform::current_pid(),
            platform::monotonic_time_ns()
        )
    }

    #[test]
    fn create_then_attach_round_trip() {
        let name = unique_name("seg");
        let config = CreationConfig::new(4, 64, 4096);
        let segment = Segment::create(&name, &config).unwrap();
        assert_eq!(segment.regions().ring_capacity(), 4);

        let attached = AttachedSegment::attach(&name, 0, None, None).unwrap();
        assert_eq!(attached.regions().ring_capacity(), 4);
    }

    #[test]
    fn attach_rejects_wrong_secret() {
        let name = unique_name("secret");
        let mut config = CreationConfig::new(2, 32, 4096);
        config.shared_secret = 1234;
        let _segment = Segment::create(&name, &config).unwrap();

        let result = AttachedSegment::attach(&name, 9999, None, None);
        assert!(matches!(result, Err(DataBlockError::SecretMismatch)));
    }

    #[test]
    fn attach_rejects_schema_mismatch() {
        let name = unique_name("schema");
        let mut config = CreationConfig::new(2, 32, 4096);
        config.slot_schema_hash = [7u8; 32];
        let _segment = Segment::create(&name, &config).unwrap();

        let result = AttachedSegment::attach(&name, 0, None, Some([8u8; 32]));
        assert!(matches!(
            result,
            Err(DataBlockError::SchemaMismatch { region: "slot" })
        ));
    }
}
