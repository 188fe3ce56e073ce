//! Consumer side of the slot protocol (§4.E consumer algorithm).
//!
//! A [`Consumer`] registers a heartbeat row on attach so a dead reader
//! can be reaped by [`crate::diagnostics`], and tracks its own read
//! position according to the segment's [`ConsumerSyncPolicy`].

use crate::checksum::{verify_digest, ChecksumPolicy};
use crate::error::{DataBlockError, DataBlockResult};
use crate::header::ConsumerSyncPolicy;
use crate::heartbeat::HeartbeatHandle;
use crate::platform::{current_pid, monotonic_time_ns};
use crate::segment::MappedRegions;
use std::sync::atomic::Ordering;
use std::time::Duration;

/// A read-only view over a just-consumed slot's payload.
pub struct SlotView<'a> {
    bytes: &'a [u8],
    pub sequence: u64,
}

impl<'a> SlotView<'a> {
    pub fn bytes(&self) -> &[u8] {
        self.bytes
    }

    pub fn read<T: bytemuck::Pod>(&self) -> T {
        let size = std::mem::size_of::<T>();
        bytemuck::pod_read_unaligned(&self.bytes[..size])
    }
}

/// Consumer handle bound to one mapped segment, tracking its own
/// position in the ring per the segment's [`ConsumerSyncPolicy`].
pub struct Consumer<'a> {
    regions: &'a MappedRegions,
    read_index: u32,
    heartbeat: Option<HeartbeatHandle>,
}

impl<'a> Consumer<'a> {
    /// Attach, registering a heartbeat row. `None` if the heartbeat
    /// table is at capacity (§3 "bounded size").
    ///
    /// The row's published consumed-position (§4.C "the slowest reader's
    /// position") is seeded to the newest sequence already committed, so
    /// an ordered-policy writer never blocks waiting for this reader to
    /// "consume" slots that existed before it attached.
    pub fn attach(regions: &'a MappedRegions) -> Self {
        let write_index = regions.runtime_state().write_index.load(Ordering::Acquire);
        let initial_consumed = regions
            .runtime_state()
            .next_sequence
            .load(Ordering::Acquire)
            .saturating_sub(1);
        let heartbeat = regions
            .heartbeat_table()
            .register(current_pid(), initial_consumed);
        Self {
            regions,
            read_index: write_index,
            heartbeat,
        }
    }

    /// The mapped segment this consumer reads from, for callers building
    /// on top of this type (e.g. [`crate::transaction`]).
    pub(crate) fn regions(&self) -> &'a MappedRegions {
        self.regions
    }

    /// This consumer's own heartbeat row, if registered.
    pub(crate) fn heartbeat_handle(&self) -> Option<HeartbeatHandle> {
        self.heartbeat
    }

    pub fn is_registered(&self) -> bool {
        self.heartbeat.is_some()
    }

    /// Refresh this consumer's heartbeat pulse; call periodically so a
    /// slow-but-alive reader isn't reclaimed as dead (§5).
    pub fn pulse(&self) {
        if let Some(handle) = self.heartbeat {
            self.regions.heartbeat_table().pulse(handle);
        }
    }

    /// Consume the next available slot per the active sync policy.
    /// Blocks up to `deadline` for a slot to become available under
    /// `SingleReader`/`SyncReader`; `LatestOnly` never blocks on
    /// availability, only reads whatever is newest.
    pub fn consume(&mut self, deadline: Duration) -> DataBlockResult<SlotView<'a>> {
        let header = self.regions.header();
        match header.consumer_sync_policy() {
            ConsumerSyncPolicy::LatestOnly => self.consume_latest(),
            ConsumerSyncPolicy::SingleReader | ConsumerSyncPolicy::SyncReader => {
                self.consume_in_order(deadline)
            }
        }
    }

    fn consume_latest(&mut self) -> DataBlockResult<SlotView<'a>> {
        let write_index = self.regions.runtime_state().write_index.load(Ordering::Acquire);
        let capacity = self.regions.ring_capacity() as u32;
        let newest = (write_index + capacity - 1) % capacity;
        self.read_index = newest;
        self.read_slot(newest)
    }

    fn consume_in_order(&mut self, deadline: Duration) -> DataBlockResult<SlotView<'a>> {
        let deadline_ns = monotonic_time_ns().saturating_add(deadline.as_nanos() as u64);
        loop {
            let slot = self.regions.rw_state(self.read_index as usize);
            if slot.state() == crate::rw_state::SlotState::Committed {
                let view = self.read_slot(self.read_index)?;
                let capacity = self.regions.ring_capacity() as u32;
                self.read_index = (self.read_index + 1) % capacity;
                return Ok(view);
            }
            if deadline == Duration::ZERO {
                return Err(DataBlockError::WouldBlock);
            }
            if monotonic_time_ns() >= deadline_ns {
                return Err(DataBlockError::Timeout);
            }
            std::thread::yield_now();
        }
    }

    fn read_slot(&self, index: u32) -> DataBlockResult<SlotView<'a>> {
        let slot = self.regions.rw_state(index as usize);
        let sequence = slot.acquire_read().map_err(|_| DataBlockError::WouldBlock)?;

        let header = self.regions.header();
        let slot_size = header.slot_size as usize;
        let buf = self.regions.slot_buffer(index as usize);

        if header.checksum_policy() == ChecksumPolicy::Enforced && slot.checksum_valid() {
            let mut digest = [0u8; 32];
            digest.copy_from_slice(&buf[slot_size..slot_size + 32]);
            if !verify_digest(&buf[..slot_size], &digest) {
                let _ = slot.release_read();
                return Err(DataBlockError::ChecksumMismatch);
            }
        }

        // SAFETY: the payload bytes were published by the writer's
        // `Release` store in `commit`, observed here via the `Acquire`
        // load inside `acquire_read`; the slice is only handed out to
        // this reader for the lifetime of its `SlotView`, and the
        // writer cannot reclaim the slot until `release_read` runs.
        let bytes: &'a [u8] = unsafe { std::slice::from_raw_parts(buf.as_ptr(), slot_size) };

        Ok(SlotView { bytes, sequence })
    }

    /// Release a slot acquired through [`Self::consume`] back to the
    /// ring. Readers must call this exactly once per returned
    /// [`SlotView`]; forgetting to do so permanently pins the slot.
    ///
    /// Also publishes this consumer's new consumed-position to the
    /// heartbeat table (§4.C), which is what lets an ordered-policy
    /// writer know it is safe to reuse a slot this reader has passed.
    pub fn release(&self, view: SlotView<'a>) -> DataBlockResult<()> {
        let index = slot_index_of(self.regions, view.bytes);
        let sequence = view.sequence;
        release_slot(self.regions, index)?;
        if let Some(handle) = self.heartbeat {
            self.regions.heartbeat_table().advance_consumed(handle, sequence);
        }
        Ok(())
    }
}

/// Release the slot at `index` at the raw `rw_state` layer, surfacing an
/// out-of-turn release as [`DataBlockError::ProtocolViolation`]. Shared by
/// [`Consumer::release`] and [`crate::transaction`]'s scoped read guard,
/// since both hand a [`SlotView`] back to the ring the same way.
pub(crate) fn release_slot(regions: &MappedRegions, index: usize) -> DataBlockResult<()> {
    regions
        .rw_state(index)
        .release_read()
        .map(|_| ())
        .map_err(|_| DataBlockError::ProtocolViolation {
            reason: "release called on a slot this consumer is not reading".into(),
        })
}

/// Recover a slot's ring index from the raw pointer a [`SlotView`] was
/// built over.
pub(crate) fn slot_index_of(regions: &MappedRegions, bytes: &[u8]) -> usize {
    let base = regions.slot_buffer(0).as_ptr() as usize;
    let this = bytes.as_ptr() as usize;
    (this - base) / regions.slot_buffer_size()
}

impl Drop for Consumer<'_> {
    fn drop(&mut self) {
        if let Some(handle) = self.heartbeat {
            self.regions.heartbeat_table().deregister(handle);
        }
    }
}
