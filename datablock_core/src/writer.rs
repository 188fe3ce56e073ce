//! Producer side of the slot protocol (§4.E writer algorithm).
//!
//! A [`Writer`] cycles through the ring one slot at a time. Acquiring a
//! slot always happens under the segment mutex (so slot selection is
//! serialized against any other writer attached to the same segment);
//! the mutex is released the moment the slot has transitioned to
//! `WRITING`, so the payload copy itself happens lock-free.

use crate::checksum::{compute_digest, ChecksumPolicy};
use crate::error::{DataBlockError, DataBlockResult};
use crate::header::ConsumerSyncPolicy;
use crate::identity::OwnerIdentity;
use crate::platform::monotonic_time_ns;
use crate::segment::MappedRegions;
use std::sync::atomic::Ordering;
use std::time::Duration;

/// Producer handle bound to one mapped segment.
pub struct Writer<'a> {
    regions: &'a MappedRegions,
    identity: OwnerIdentity,
}

impl<'a> Writer<'a> {
    pub fn new(regions: &'a MappedRegions) -> Self {
        Self {
            regions,
            identity: OwnerIdentity::current_thread(),
        }
    }

    /// Acquire the next slot in ring order, blocking up to `deadline`
    /// for a lagging reader to release it (§4.E, §5 "Deadline 0 behaves
    /// as a non-blocking try").
    ///
    /// `LatestOnly` may skip ahead and reclaim a still-`Reading` slot via
    /// `DRAINING`; the ordered policies (`SingleReader`/`SyncReader`)
    /// never do — `DRAINING` is reachable only under `LatestOnly`
    /// (spec §4.C). Instead they check the slowest registered reader's
    /// published position (§4.C, [`crate::heartbeat::HeartbeatTable::min_consumed_sequence`])
    /// before reusing a `Committed` slot, and return [`DataBlockError::RingFull`]
    /// rather than overwriting data that reader hasn't consumed yet.
    pub fn begin_write(&self, deadline: Duration) -> DataBlockResult<WriteTransaction<'a>> {
        let header = self.regions.header();
        let policy = header.consumer_sync_policy();
        let deadline_ns = monotonic_time_ns().saturating_add(deadline.as_nanos() as u64);

        let (guard, _outcome) = self.regions.segment_mutex().guard(deadline)?;

        let index = match policy {
            ConsumerSyncPolicy::LatestOnly => self.select_latest_only(deadline_ns)?,
            ConsumerSyncPolicy::SingleReader | ConsumerSyncPolicy::SyncReader => {
                self.select_ordered(deadline_ns)?
            }
        };
        drop(guard);

        Ok(WriteTransaction {
            regions: self.regions,
            index: index as usize,
            committed: false,
        })
    }

    /// `LatestOnly` slot selection: scan forward for a `Free` or
    /// already-released `Committed` slot, and if none exists reclaim the
    /// target slot via `DRAINING`, waiting up to `deadline_ns` for the
    /// last reader to hand it off.
    fn select_latest_only(&self, deadline_ns: u64) -> DataBlockResult<u32> {
        let capacity = self.regions.ring_capacity() as u32;
        let start_index = self.regions.runtime_state().write_index.load(Ordering::Acquire);
        let mut index = start_index;
        let mut scanned = 0u32;
        loop {
            let slot = self.regions.rw_state(index as usize);
            let state = slot.state();
            let reader_count = slot.reader_count();

            if state == crate::rw_state::SlotState::Free {
                slot.acquire_write_from_free(self.identity)
                    .map_err(|_| DataBlockError::Inconsistent)?;
                return Ok(index);
            }
            if state == crate::rw_state::SlotState::Committed && reader_count == 0 {
                slot.acquire_write_from_committed(self.identity)
                    .map_err(|_| DataBlockError::Inconsistent)?;
                return Ok(index);
            }

            if scanned + 1 < capacity {
                index = (index + 1) % capacity;
                scanned += 1;
                continue;
            }

            // Every slot is still being read: reclaim this one, publishing
            // intent so the last reader's `release_read` hands it off.
            if state == crate::rw_state::SlotState::Reading {
                slot.acquire_write_draining(self.identity)
                    .map_err(|_| DataBlockError::Inconsistent)?;
            } else if state != crate::rw_state::SlotState::Draining {
                return Err(DataBlockError::RingFull);
            }

            loop {
                if slot.state() == crate::rw_state::SlotState::Writing {
                    return Ok(index);
                }
                if monotonic_time_ns() >= deadline_ns {
                    let _ = slot.writer_timeout();
                    return Err(DataBlockError::RingFull);
                }
                std::thread::yield_now();
            }
        }
    }

    /// Ordered-policy slot selection: always targets the current
    /// `write_index` slot, never skips ahead and never drains. A
    /// `Committed` slot may only be reused once the slowest registered
    /// reader has consumed past it; otherwise this polls until `deadline_ns`
    /// and returns `RingFull` — the back-pressure contract ordered
    /// policies are defined by (§4.C, Testable Property #4).
    fn select_ordered(&self, deadline_ns: u64) -> DataBlockResult<u32> {
        let index = self.regions.runtime_state().write_index.load(Ordering::Acquire);
        let slot = self.regions.rw_state(index as usize);
        loop {
            let state = slot.state();
            if state == crate::rw_state::SlotState::Free {
                slot.acquire_write_from_free(self.identity)
                    .map_err(|_| DataBlockError::Inconsistent)?;
                return Ok(index);
            }
            if state == crate::rw_state::SlotState::Committed {
                let reusable = match self.regions.heartbeat_table().min_consumed_sequence() {
                    Some(min_consumed) => slot.sequence() <= min_consumed,
                    // No consumer has ever registered: nothing has been
                    // lost yet, but nothing has confirmed it is safe to
                    // overwrite either, so the writer must not proceed.
                    None => false,
                };
                if reusable {
                    slot.acquire_write_from_committed(self.identity)
                        .map_err(|_| DataBlockError::Inconsistent)?;
                    return Ok(index);
                }
            }
            if monotonic_time_ns() >= deadline_ns {
                return Err(DataBlockError::RingFull);
            }
            std::thread::yield_now();
        }
    }
}

/// An in-flight write. Dropping without calling [`commit`](Self::commit)
/// aborts (§4.G "no exit path may hold a lock or leave a slot WRITING").
pub struct WriteTransaction<'a> {
    regions: &'a MappedRegions,
    index: usize,
    committed: bool,
}

impl<'a> WriteTransaction<'a> {
    /// Raw mutable view over the slot payload buffer (excluding any
    /// checksum trailer, which `commit` manages).
    pub fn payload_mut(&mut self) -> &mut [u8] {
        let header = self.regions.header();
        let slot_size = header.slot_size as usize;
        &mut self.regions.slot_buffer(self.index)[..slot_size]
    }

    /// Write a `T` into the payload region.
    pub fn write<T: bytemuck::Pod>(&mut self, value: &T) {
        let bytes = bytemuck::bytes_of(value);
        let dst = self.payload_mut();
        assert!(bytes.len() <= dst.len(), "payload does not fit slot_size");
        dst[..bytes.len()].copy_from_slice(bytes);
    }

    /// Publish the slot: assign the next global sequence number and, if
    /// the checksum policy requires it, compute and store the digest.
    pub fn commit(mut self) -> DataBlockResult<u64> {
        let header = self.regions.header();
        let checksum_policy = header.checksum_policy();
        let slot_size = header.slot_size as usize;
        let sequence = self
            .regions
            .runtime_state()
            .next_sequence
            .fetch_add(1, Ordering::AcqRel);

        let checksum_valid = match checksum_policy {
            ChecksumPolicy::None => false,
            ChecksumPolicy::Enforced => {
                let buf = self.regions.slot_buffer(self.index);
                let digest = compute_digest(&buf[..slot_size]);
                buf[slot_size..slot_size + 32].copy_from_slice(&digest);
                true
            }
            ChecksumPolicy::Manual => false,
        };

        self.regions
            .rw_state(self.index)
            .commit(sequence, checksum_valid);

        let capacity = self.regions.ring_capacity() as u32;
        self.regions
            .runtime_state()
            .write_index
            .store((self.index as u32 + 1) % capacity, Ordering::Release);

        self.committed = true;
        Ok(sequence)
    }

    /// Explicitly discard the slot without publishing it.
    pub fn abort(mut self) {
        self.committed = true; // suppress the Drop-time abort; we already aborted
        self.regions.rw_state(self.index).abort_write();
    }
}

impl Drop for WriteTransaction<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.regions.rw_state(self.index).abort_write();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::{CreationConfig, Segment};
    use bytemuck::{Pod, Zeroable};

    #[repr(C)]
    #[derive(Clone, Copy, Pod, Zeroable, Default, PartialEq, Debug)]
    struct Sample {
        value: u64,
    }

    fn unique_name(tag: &str) -> String {
        format!(
            "dbtest_writer_{tag}_{}_{}",
            crate::platform::current_pid(),
            crate::platform::monotonic_time_ns()
        )
    }

    #[test]
    fn write_commit_assigns_increasing_sequences() {
        let name = unique_name("seq");
        let config = CreationConfig::new(2, 64, 4096);
        let segment = Segment::create(&name, &config).unwrap();
        let writer = Writer::new(segment.regions());

        let mut tx = writer.begin_write(Duration::from_millis(100)).unwrap();
        tx.write(&Sample { value: 7 });
        let seq1 = tx.commit().unwrap();

        let mut tx2 = writer.begin_write(Duration::from_millis(100)).unwrap();
        tx2.write(&Sample { value: 8 });
        let seq2 = tx2.commit().unwrap();

        assert!(seq2 > seq1);
    }

    #[test]
    fn aborted_write_leaves_slot_free() {
        let name = unique_name("abort");
        let config = CreationConfig::new(2, 64, 4096);
        let segment = Segment::create(&name, &config).unwrap();
        let writer = Writer::new(segment.regions());

        let tx = writer.begin_write(Duration::from_millis(100)).unwrap();
        let index = tx.index;
        tx.abort();
        assert_eq!(
            segment.regions().rw_state(index).state(),
            crate::rw_state::SlotState::Free
        );
    }
}
