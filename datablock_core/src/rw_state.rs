//! Per-slot RW state machine (§4.C) — the central concurrency protocol.
//!
//! `(slot_state, reader_count)` is packed into one `AtomicU32` so every
//! transition in the automaton below is a single CAS; `sequence` and
//! `writer_identity` are separate atomics written before the CAS that
//! publishes a transition and read after observing it, so the
//! release/acquire pairing on the packed word is what establishes their
//! happens-before edge (§5 "Ordering guarantees").
//!
//! ```text
//! FREE       --acquire_write-->   WRITING        (writer only; under segment mutex)
//! WRITING    --commit--------->   COMMITTED      (writer only; publishes sequence)
//! WRITING    --abort---------->   FREE           (writer only; sequence unchanged)
//! COMMITTED  --acquire_read--->   READING        (reader++; CAS; rc 0→1 sets state)
//! READING    --acquire_read--->   READING        (reader++; CAS; rc ≥1)
//! READING    --release_read-->    COMMITTED      (reader--; rc→0 restores state)
//! COMMITTED  --acquire_write-->   WRITING        (writer; wraparound onto own prior slot, no readers)
//! COMMITTED  --acquire_write-->   DRAINING       (writer; wraparound with readers; publish intent)
//! DRAINING   --release_read-->    WRITING        (last reader release hands slot to writer)
//! DRAINING   --writer_timeout-->  COMMITTED      (writer gave up; readers keep reading)
//! ```

use crate::identity::{AtomicIdentitySlot, OwnerIdentity};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// The canonical slot state (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SlotState {
    Free = 0,
    Writing = 1,
    Committed = 2,
    Reading = 3,
    Draining = 4,
}

impl SlotState {
    fn from_raw(v: u8) -> SlotState {
        match v {
            0 => SlotState::Free,
            1 => SlotState::Writing,
            2 => SlotState::Committed,
            3 => SlotState::Reading,
            4 => SlotState::Draining,
            other => panic!("corrupt slot state byte {other}"),
        }
    }
}

const READER_COUNT_BITS: u32 = 24;
const READER_COUNT_MASK: u32 = (1 << READER_COUNT_BITS) - 1;

fn pack(state: SlotState, reader_count: u32) -> u32 {
    debug_assert!(reader_count <= READER_COUNT_MASK);
    ((state as u32) << READER_COUNT_BITS) | (reader_count & READER_COUNT_MASK)
}

fn unpack(word: u32) -> (SlotState, u32) {
    let state = SlotState::from_raw((word >> READER_COUNT_BITS) as u8);
    let reader_count = word & READER_COUNT_MASK;
    (state, reader_count)
}

/// Why an `acquire_write`/`acquire_read` attempt did not transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireRejected {
    /// The slot is not in a state that admits this transition right now.
    WrongState,
    /// CAS lost the race to a concurrent acquirer; caller should retry.
    Contended,
}

/// The per-slot RW state record, embedded directly in the slot RW state
/// array (§3 region 3).
#[repr(C)]
pub struct SlotRwState {
    word: AtomicU32,
    sequence: AtomicU64,
    writer_identity: AtomicIdentitySlot,
    checksum_valid: AtomicU32,
}

impl SlotRwState {
    pub const fn new() -> Self {
        Self {
            word: AtomicU32::new(0), // Free, reader_count 0
            sequence: AtomicU64::new(0),
            writer_identity: AtomicIdentitySlot::new(),
            checksum_valid: AtomicU32::new(0),
        }
    }

    pub fn state(&self) -> SlotState {
        unpack(self.word.load(Ordering::Acquire)).0
    }

    pub fn reader_count(&self) -> u32 {
        unpack(self.word.load(Ordering::Acquire)).1
    }

    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::Acquire)
    }

    pub fn writer_identity(&self) -> OwnerIdentity {
        self.writer_identity.current()
    }

    pub fn checksum_valid(&self) -> bool {
        self.checksum_valid.load(Ordering::Acquire) != 0
    }

    /// `FREE -> WRITING`. Caller must hold the segment mutex.
    pub fn acquire_write_from_free(&self, writer: OwnerIdentity) -> Result<(), AcquireRejected> {
        let expected = pack(SlotState::Free, 0);
        let desired = pack(SlotState::Writing, 0);
        self.word
            .compare_exchange(expected, desired, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| AcquireRejected::WrongState)?;
        self.writer_identity.force_clear();
        self.writer_identity.try_claim(writer);
        Ok(())
    }

    /// `COMMITTED -> WRITING`, wraparound onto the writer's own prior
    /// slot with no active readers. Caller must hold the segment mutex
    /// and must have already confirmed `reader_count == 0`.
    pub fn acquire_write_from_committed(
        &self,
        writer: OwnerIdentity,
    ) -> Result<(), AcquireRejected> {
        let expected = pack(SlotState::Committed, 0);
        let desired = pack(SlotState::Writing, 0);
        self.word
            .compare_exchange(expected, desired, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| AcquireRejected::WrongState)?;
        self.writer_identity.force_clear();
        self.writer_identity.try_claim(writer);
        Ok(())
    }

    /// `COMMITTED -> DRAINING`, wraparound while readers are still
    /// present. Reader count is preserved; it is decremented by
    /// `release_read` as readers finish.
    pub fn acquire_write_draining(&self, writer: OwnerIdentity) -> Result<(), AcquireRejected> {
        let current = self.word.load(Ordering::Acquire);
        let (state, rc) = unpack(current);
        if state != SlotState::Committed || rc == 0 {
            return Err(AcquireRejected::WrongState);
        }
        let desired = pack(SlotState::Draining, rc);
        self.word
            .compare_exchange(current, desired, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| AcquireRejected::Contended)?;
        self.writer_identity.force_clear();
        self.writer_identity.try_claim(writer);
        Ok(())
    }

    /// `WRITING -> COMMITTED`, publishing the next global sequence
    /// number. All payload writes must have completed before this call;
    /// the `Release` ordering on the final CAS is what makes them
    /// visible to a consumer's `Acquire` load of this same word.
    pub fn commit(&self, sequence: u64, checksum_valid: bool) {
        self.sequence.store(sequence, Ordering::Relaxed);
        self.checksum_valid
            .store(checksum_valid as u32, Ordering::Relaxed);
        let desired = pack(SlotState::Committed, 0);
        self.word.store(desired, Ordering::Release);
    }

    /// `WRITING -> FREE`. Sequence is left unchanged (still whatever it
    /// was before this write attempt).
    pub fn abort_write(&self) {
        self.writer_identity.force_clear();
        self.word.store(pack(SlotState::Free, 0), Ordering::Release);
    }

    /// `COMMITTED|READING -> READING`, incrementing `reader_count`.
    pub fn acquire_read(&self) -> Result<u64, AcquireRejected> {
        loop {
            let current = self.word.load(Ordering::Acquire);
            let (state, rc) = unpack(current);
            if state != SlotState::Committed && state != SlotState::Reading {
                return Err(AcquireRejected::WrongState);
            }
            let desired = pack(SlotState::Reading, rc + 1);
            if self
                .word
                .compare_exchange(current, desired, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Ok(self.sequence.load(Ordering::Acquire));
            }
            // lost the CAS race; retry with a fresh read
        }
    }

    /// `READING|DRAINING -> {COMMITTED,WRITING}` on the last reader's
    /// departure, otherwise just decrements `reader_count`.
    ///
    /// Returns `true` if this release handed the slot to the writer
    /// (i.e. the slot was DRAINING and this was the last reader).
    pub fn release_read(&self) -> Result<bool, AcquireRejected> {
        loop {
            let current = self.word.load(Ordering::Acquire);
            let (state, rc) = unpack(current);
            if rc == 0 || (state != SlotState::Reading && state != SlotState::Draining) {
                return Err(AcquireRejected::WrongState);
            }
            let new_rc = rc - 1;
            let new_state = if new_rc == 0 {
                match state {
                    SlotState::Draining => SlotState::Writing,
                    _ => SlotState::Committed,
                }
            } else {
                state
            };
            let desired = pack(new_state, new_rc);
            if self
                .word
                .compare_exchange(current, desired, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Ok(new_rc == 0 && state == SlotState::Draining);
            }
        }
    }

    /// `DRAINING -> COMMITTED`: the writer gave up waiting for the last
    /// reader to depart within its deadline. Readers already in flight
    /// keep reading; `reader_count` is untouched.
    pub fn writer_timeout(&self) -> Result<(), AcquireRejected> {
        let current = self.word.load(Ordering::Acquire);
        let (state, rc) = unpack(current);
        if state != SlotState::Draining {
            return Err(AcquireRejected::WrongState);
        }
        let desired = pack(SlotState::Committed, rc);
        self.word
            .compare_exchange(current, desired, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| AcquireRejected::Contended)
    }

    /// Zombie reclamation (§4.C): force-reset a `WRITING` slot abandoned
    /// by a dead writer back to `FREE`, or a `DRAINING` slot back to
    /// `COMMITTED` (preserving `reader_count` — the readers counted are
    /// still genuinely attached; only the writer died). Caller must hold
    /// the segment mutex and must have already verified the writer is
    /// dead and the grace window has elapsed.
    pub fn force_reclaim(&self) -> Option<OwnerIdentity> {
        let current = self.word.load(Ordering::Acquire);
        let (state, rc) = unpack(current);
        let desired = match state {
            SlotState::Writing => pack(SlotState::Free, 0),
            SlotState::Draining => pack(SlotState::Committed, rc),
            _ => return None,
        };
        if self
            .word
            .compare_exchange(current, desired, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }
        Some(self.writer_identity.force_clear())
    }

    /// Force-decrement `reader_count` for a consumer whose heartbeat has
    /// retired (§5 "Process death"). Does not change `slot_state` unless
    /// the decrement reaches zero while DRAINING, in which case the slot
    /// hands off to the writer exactly as in `release_read`.
    pub fn force_decrement_reader(&self) -> Result<bool, AcquireRejected> {
        self.release_read()
    }
}

impl Default for SlotRwState {
    fn default() -> Self {
        Self::new()
    }
}
