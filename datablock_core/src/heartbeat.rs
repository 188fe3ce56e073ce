//! Per-consumer heartbeat table (§3 region 5, §5 "Process death").
//!
//! A bounded array of `(pid, last_pulse)` pairs. Single-writer-per-entry
//! (only the owning consumer ever writes its own slot), wait-free reads
//! for everyone else, matching §5's "Shared-resource policy".

use crate::consts::MAX_CONSUMERS;
use crate::platform::{is_process_alive, monotonic_time_ns};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

/// One slot in the heartbeat table.
#[repr(C)]
pub struct HeartbeatEntry {
    pid: AtomicU32,
    last_pulse_ns: AtomicU64,
    /// Highest slot `sequence` this row's consumer has released, i.e. its
    /// published read position (§4.C "the slowest reader's position").
    /// Only meaningful for an ordered-policy consumer; a `LatestOnly`
    /// consumer never advances it, but nothing reads it in that case
    /// either, since ring-full is only checked for ordered policies.
    consumed_sequence: AtomicU64,
}

impl HeartbeatEntry {
    const fn new() -> Self {
        Self {
            pid: AtomicU32::new(0),
            last_pulse_ns: AtomicU64::new(0),
            consumed_sequence: AtomicU64::new(0),
        }
    }

    fn is_free(&self) -> bool {
        self.pid.load(Ordering::Acquire) == 0
    }

    fn pid(&self) -> u32 {
        self.pid.load(Ordering::Acquire)
    }

    fn pulse(&self, pid: u32) {
        self.pid.store(pid, Ordering::Release);
        self.last_pulse_ns.store(monotonic_time_ns(), Ordering::Release);
    }

    fn retire(&self) {
        self.last_pulse_ns.store(0, Ordering::Release);
        self.consumed_sequence.store(0, Ordering::Release);
        self.pid.store(0, Ordering::Release);
    }

    fn is_stale(&self, window: Duration) -> bool {
        let last = self.last_pulse_ns.load(Ordering::Acquire);
        if last == 0 {
            return false;
        }
        let now = monotonic_time_ns();
        now.saturating_sub(last) > window.as_nanos() as u64
    }
}

/// The fixed-capacity heartbeat table embedded in the segment.
#[repr(C)]
pub struct HeartbeatTable {
    entries: [HeartbeatEntry; MAX_CONSUMERS],
}

/// A handle a [`Consumer`](crate::consumer::Consumer) holds to its own
/// row, so it can refresh its pulse without scanning the table.
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatHandle {
    index: usize,
}

impl HeartbeatTable {
    pub const fn new() -> Self {
        const ENTRY: HeartbeatEntry = HeartbeatEntry::new();
        Self {
            entries: [ENTRY; MAX_CONSUMERS],
        }
    }

    /// Register a new consumer, claiming the first free row.
    ///
    /// `initial_consumed_sequence` seeds this reader's published position
    /// (typically the newest sequence already committed at attach time, so
    /// a writer never blocks waiting for a reader to "consume" slots that
    /// were written before it existed).
    pub fn register(&self, pid: u32, initial_consumed_sequence: u64) -> Option<HeartbeatHandle> {
        for (index, entry) in self.entries.iter().enumerate() {
            if entry.is_free()
                && entry
                    .pid
                    .compare_exchange(0, pid, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
            {
                entry.last_pulse_ns.store(monotonic_time_ns(), Ordering::Release);
                entry
                    .consumed_sequence
                    .store(initial_consumed_sequence, Ordering::Release);
                return Some(HeartbeatHandle { index });
            }
        }
        None
    }

    pub fn pulse(&self, handle: HeartbeatHandle) {
        self.entries[handle.index].pulse(self.entries[handle.index].pid());
    }

    pub fn deregister(&self, handle: HeartbeatHandle) {
        self.entries[handle.index].retire();
    }

    /// Publish `sequence` as a reader's newly-released position. Uses
    /// `fetch_max` so out-of-order calls (there shouldn't be any, but
    /// nothing enforces it at this layer) never move the position backward.
    pub fn advance_consumed(&self, handle: HeartbeatHandle, sequence: u64) {
        self.entries[handle.index]
            .consumed_sequence
            .fetch_max(sequence, Ordering::AcqRel);
    }

    /// The lowest `consumed_sequence` among every currently-registered row,
    /// i.e. "the slowest reader's position" an ordered-policy writer must
    /// not advance past (§4.C). `None` if no consumer is registered at all
    /// — callers must decide how to treat an as-yet-unobserved channel.
    pub fn min_consumed_sequence(&self) -> Option<u64> {
        self.entries
            .iter()
            .filter(|e| !e.is_free())
            .map(|e| e.consumed_sequence.load(Ordering::Acquire))
            .min()
    }

    /// Scan for entries whose pulse is older than `window` and whose
    /// pid is no longer alive; returns the pids reclaimed.
    pub fn reap_stale(&self, window: Duration) -> Vec<u32> {
        let mut reaped = Vec::new();
        for entry in &self.entries {
            if entry.is_free() {
                continue;
            }
            let pid = entry.pid();
            if entry.is_stale(window) && !is_process_alive(pid) {
                entry.retire();
                reaped.push(pid);
            }
        }
        reaped
    }

    pub fn registered_count(&self) -> usize {
        self.entries.iter().filter(|e| !e.is_free()).count()
    }
}

impl Default for HeartbeatTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_pulse_deregister_round_trip() {
        let table = HeartbeatTable::new();
        let handle = table.register(42, 0).unwrap();
        assert_eq!(table.registered_count(), 1);
        table.pulse(handle);
        table.deregister(handle);
        assert_eq!(table.registered_count(), 0);
    }

    #[test]
    fn table_rejects_registration_past_capacity() {
        let table = HeartbeatTable::new();
        let mut handles = Vec::new();
        for pid in 1..=MAX_CONSUMERS as u32 {
            handles.push(table.register(pid, 0).expect("capacity not yet exceeded"));
        }
        assert!(table.register(9999, 0).is_none());
    }

    #[test]
    fn stale_dead_entries_are_reaped() {
        let table = HeartbeatTable::new();
        // A pid that is essentially guaranteed not to be alive.
        let handle = table.register(u32::MAX - 1, 0).unwrap();
        // Force staleness by writing a pulse far in the past.
        table.entries[handle.index]
            .last_pulse_ns
            .store(1, Ordering::Release);
        let reaped = table.reap_stale(Duration::from_nanos(0));
        assert_eq!(reaped, vec![u32::MAX - 1]);
        assert_eq!(table.registered_count(), 0);
    }

    #[test]
    fn min_consumed_sequence_tracks_the_slowest_registered_reader() {
        let table = HeartbeatTable::new();
        assert_eq!(table.min_consumed_sequence(), None);

        let fast = table.register(1, 0).unwrap();
        let slow = table.register(2, 0).unwrap();
        table.advance_consumed(fast, 10);
        table.advance_consumed(slow, 3);
        assert_eq!(table.min_consumed_sequence(), Some(3));

        // fetch_max: an out-of-order call never moves the position back.
        table.advance_consumed(slow, 1);
        assert_eq!(table.min_consumed_sequence(), Some(3));

        table.deregister(slow);
        assert_eq!(table.min_consumed_sequence(), Some(10));
    }
}
