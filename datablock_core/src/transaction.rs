//! RAII transaction API (§4.G): the ergonomic wrapper most callers
//! should reach for instead of driving [`crate::writer::Writer`] or
//! [`crate::consumer::Consumer`] directly.
//!
//! Every scope closes its own slot on every exit path — normal return,
//! early `?`, or panic — by relying on `Drop`, exactly as
//! [`crate::mutex::SegmentMutexGuard`] already does for the segment
//! mutex one layer down.
//!
//! §4.G's `with_transaction<FlexZoneT, SlotT>(deadline, body)` names one
//! generic context shape; per §9's redesign note replacing inheritance
//! with "a small set of concrete types", this crate exposes it as two
//! concrete specializations — [`with_producer_transaction`] and
//! [`with_consumer_transaction`] — since a producer's slots and a
//! consumer's slots are acquired, filled/read, and closed by genuinely
//! different code. Both expose the same shape: `flex_zone()` plus a
//! lazy, non-terminating `slots(per_slot_deadline)` iterator.

use crate::consumer::{release_slot, slot_index_of, Consumer, SlotView};
use crate::error::{DataBlockError, DataBlockResult};
use crate::flexzone::FlexZone;
use crate::heartbeat::HeartbeatHandle;
use crate::platform::monotonic_time_ns;
use crate::segment::MappedRegions;
use crate::writer::{WriteTransaction, Writer};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Run `body` against a freshly-acquired write slot, committing on
/// `Ok` and aborting on `Err` or panic. Returns the body's value
/// alongside the sequence number the commit published.
pub fn with_write_transaction<R>(
    regions: &MappedRegions,
    deadline: Duration,
    body: impl FnOnce(&mut WriteTransaction<'_>) -> DataBlockResult<R>,
) -> DataBlockResult<(R, u64)> {
    let writer = Writer::new(regions);
    let mut tx = writer.begin_write(deadline)?;
    let result = body(&mut tx);
    match result {
        Ok(value) => {
            let sequence = tx.commit()?;
            Ok((value, sequence))
        }
        Err(err) => {
            tx.abort();
            Err(err)
        }
    }
}

/// Scoped read: consumes the next slot per the segment's sync policy,
/// hands it to `body`, and releases it afterward regardless of outcome.
pub fn with_read_transaction<R>(
    consumer: &mut Consumer<'_>,
    deadline: Duration,
    body: impl FnOnce(&SlotView<'_>) -> R,
) -> DataBlockResult<R> {
    let view = consumer.consume(deadline)?;
    let result = body(&view);
    consumer.release(view)?;
    Ok(result)
}

/// A flag a caller flips from its own `ChannelBroker::on_notification`
/// handler when it observes a [`crate::broker::BrokerNotification::ChannelClosing`]
/// for the channel a transaction is bound to (§4.G "Cancellation"). Every
/// `slots()` step checks it; once signalled, every subsequent step yields
/// `Err(DataBlockError::ChannelClosing)` (spec.md:326) instead of
/// terminating the iterator, so the body gets to observe the closure and
/// decide how to unwind rather than having the sequence end silently.
#[derive(Default)]
pub struct ClosingSignal(AtomicBool);

impl ClosingSignal {
    /// A signal that has not fired yet.
    pub fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    /// Mark the channel as closing. Idempotent.
    pub fn signal(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_signalled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// One acquired write slot inside a [`ProducerTransaction`]'s `slots()`
/// sequence. Commits on ordinary drop — including a `break` out of the
/// caller's loop — and aborts if dropped while unwinding (§4.G "a throw
/// always aborts").
pub struct WriteSlotGuard<'a> {
    inner: Option<WriteTransaction<'a>>,
}

impl<'a> WriteSlotGuard<'a> {
    /// Raw mutable view over the slot payload.
    pub fn payload_mut(&mut self) -> &mut [u8] {
        self.inner.as_mut().expect("slot guard already closed").payload_mut()
    }

    /// Write a `T` into the payload region.
    pub fn write<T: bytemuck::Pod>(&mut self, value: &T) {
        self.inner.as_mut().expect("slot guard already closed").write(value);
    }
}

impl Drop for WriteSlotGuard<'_> {
    fn drop(&mut self) {
        if let Some(tx) = self.inner.take() {
            if std::thread::panicking() {
                tx.abort();
            } else {
                let _ = tx.commit();
            }
        }
    }
}

/// One acquired read slot inside a [`ConsumerTransaction`]'s `slots()`
/// sequence. Always released on drop (§4.G "released (for read slots)").
pub struct ReadSlotGuard<'a> {
    regions: &'a MappedRegions,
    heartbeat: Option<HeartbeatHandle>,
    index: usize,
    view: Option<SlotView<'a>>,
}

impl<'a> ReadSlotGuard<'a> {
    /// The sequence number this slot was committed with.
    pub fn sequence(&self) -> u64 {
        self.view.as_ref().expect("slot guard already closed").sequence
    }

    /// Raw view over the slot payload.
    pub fn bytes(&self) -> &[u8] {
        self.view.as_ref().expect("slot guard already closed").bytes()
    }

    /// Read the payload as a `T`.
    pub fn read<T: bytemuck::Pod>(&self) -> T {
        self.view.as_ref().expect("slot guard already closed").read()
    }
}

impl Drop for ReadSlotGuard<'_> {
    fn drop(&mut self) {
        if let Some(view) = self.view.take() {
            let sequence = view.sequence;
            if release_slot(self.regions, self.index).is_ok() {
                if let Some(handle) = self.heartbeat {
                    self.regions.heartbeat_table().advance_consumed(handle, sequence);
                }
            }
        }
    }
}

/// The lazy, non-terminating sequence [`ProducerTransaction::slots`]
/// returns. Ends (`None`) once the enclosing transaction's own deadline
/// elapses; every step before that yields `Some`, including `Err`s for a
/// single slot's own timeout, a checksum failure, or channel closure.
pub struct WriteSlots<'a, 'ctx> {
    writer: &'ctx Writer<'a>,
    per_slot_deadline: Duration,
    transaction_deadline_ns: u64,
    closing: Option<&'ctx ClosingSignal>,
}

impl<'a> Iterator for WriteSlots<'a, '_> {
    type Item = DataBlockResult<WriteSlotGuard<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if monotonic_time_ns() >= self.transaction_deadline_ns {
            return None;
        }
        if let Some(flag) = self.closing {
            if flag.is_signalled() {
                return Some(Err(DataBlockError::ChannelClosing));
            }
        }
        Some(
            self.writer
                .begin_write(self.per_slot_deadline)
                .map(|tx| WriteSlotGuard { inner: Some(tx) }),
        )
    }
}

/// The producer-side transaction context (§4.G): one scope exposing the
/// flex zone and a lazy sequence of write slots, both bounded by one
/// outer deadline.
pub struct ProducerTransaction<'a> {
    regions: &'a MappedRegions,
    writer: Writer<'a>,
    deadline_ns: u64,
    closing: Option<&'a ClosingSignal>,
}

impl<'a> ProducerTransaction<'a> {
    fn new(regions: &'a MappedRegions, deadline: Duration, closing: Option<&'a ClosingSignal>) -> Self {
        Self {
            regions,
            writer: Writer::new(regions),
            deadline_ns: monotonic_time_ns().saturating_add(deadline.as_nanos() as u64),
            closing,
        }
    }

    /// Typed view over the flex zone (§4.F), independent of the slot ring.
    pub fn flex_zone(&self) -> FlexZone<'a> {
        self.regions.flex_zone()
    }

    /// A lazy sequence of write slots, each individually bounded by
    /// `per_slot_deadline`, until this transaction's own deadline elapses.
    pub fn slots(&self, per_slot_deadline: Duration) -> WriteSlots<'a, '_> {
        WriteSlots {
            writer: &self.writer,
            per_slot_deadline,
            transaction_deadline_ns: self.deadline_ns,
            closing: self.closing,
        }
    }
}

/// Run `body` inside a producer transaction scope bounded by `deadline`
/// (§4.G). `closing`, if given, is a [`ClosingSignal`] the caller flips
/// from its own `ChannelBroker` notification handler.
pub fn with_producer_transaction<R>(
    regions: &MappedRegions,
    deadline: Duration,
    closing: Option<&ClosingSignal>,
    body: impl FnOnce(&mut ProducerTransaction<'_>) -> R,
) -> R {
    let mut ctx = ProducerTransaction::new(regions, deadline, closing);
    body(&mut ctx)
}

/// The lazy, non-terminating sequence [`ConsumerTransaction::slots`]
/// returns. Mirrors [`WriteSlots`] on the read side.
pub struct ReadSlots<'a, 'ctx> {
    consumer: &'ctx mut Consumer<'a>,
    per_slot_deadline: Duration,
    transaction_deadline_ns: u64,
    closing: Option<&'ctx ClosingSignal>,
}

impl<'a> Iterator for ReadSlots<'a, '_> {
    type Item = DataBlockResult<ReadSlotGuard<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if monotonic_time_ns() >= self.transaction_deadline_ns {
            return None;
        }
        if let Some(flag) = self.closing {
            if flag.is_signalled() {
                return Some(Err(DataBlockError::ChannelClosing));
            }
        }
        let regions = self.consumer.regions();
        let heartbeat = self.consumer.heartbeat_handle();
        Some(self.consumer.consume(self.per_slot_deadline).map(|view| {
            let index = slot_index_of(regions, view.bytes());
            ReadSlotGuard {
                regions,
                heartbeat,
                index,
                view: Some(view),
            }
        }))
    }
}

/// The consumer-side transaction context (§4.G): one scope exposing the
/// flex zone and a lazy sequence of read slots, both bounded by one
/// outer deadline.
pub struct ConsumerTransaction<'a, 'c> {
    consumer: &'c mut Consumer<'a>,
    regions: &'a MappedRegions,
    deadline_ns: u64,
    closing: Option<&'a ClosingSignal>,
}

impl<'a, 'c> ConsumerTransaction<'a, 'c> {
    fn new(consumer: &'c mut Consumer<'a>, deadline: Duration, closing: Option<&'a ClosingSignal>) -> Self {
        let regions = consumer.regions();
        Self {
            consumer,
            regions,
            deadline_ns: monotonic_time_ns().saturating_add(deadline.as_nanos() as u64),
            closing,
        }
    }

    /// Typed view over the flex zone (§4.F), independent of the slot ring.
    pub fn flex_zone(&self) -> FlexZone<'a> {
        self.regions.flex_zone()
    }

    /// A lazy sequence of read slots, each individually bounded by
    /// `per_slot_deadline`, until this transaction's own deadline elapses.
    pub fn slots(&mut self, per_slot_deadline: Duration) -> ReadSlots<'a, '_> {
        ReadSlots {
            consumer: self.consumer,
            per_slot_deadline,
            transaction_deadline_ns: self.deadline_ns,
            closing: self.closing,
        }
    }
}

/// Run `body` inside a consumer transaction scope bounded by `deadline`
/// (§4.G). `closing`, if given, is a [`ClosingSignal`] the caller flips
/// from its own `ChannelBroker` notification handler.
pub fn with_consumer_transaction<'a, R>(
    consumer: &mut Consumer<'a>,
    deadline: Duration,
    closing: Option<&'a ClosingSignal>,
    body: impl FnOnce(&mut ConsumerTransaction<'a, '_>) -> R,
) -> R {
    let mut ctx = ConsumerTransaction::new(consumer, deadline, closing);
    body(&mut ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::{CreationConfig, Segment};
    use bytemuck::{Pod, Zeroable};

    #[repr(C)]
    #[derive(Clone, Copy, Pod, Zeroable, Default, PartialEq, Debug)]
    struct Reading {
        celsius: f32,
    }

    fn unique_name(tag: &str) -> String {
        format!(
            "dbtest_tx_{tag}_{}_{}",
            crate::platform::current_pid(),
            crate::platform::monotonic_time_ns()
        )
    }

    #[test]
    fn write_transaction_commits_on_ok_and_returns_the_sequence() {
        let name = unique_name("ok");
        let config = CreationConfig::new(2, 64, 4096);
        let segment = Segment::create(&name, &config).unwrap();

        let (_, sequence) =
            with_write_transaction(segment.regions(), Duration::from_millis(100), |tx| {
                tx.write(&Reading { celsius: 21.5 });
                Ok(())
            })
            .unwrap();
        assert!(sequence > 0);

        let mut consumer = Consumer::attach(segment.regions());
        let read = with_read_transaction(&mut consumer, Duration::from_millis(100), |view| {
            view.read::<Reading>()
        })
        .unwrap();
        assert_eq!(read, Reading { celsius: 21.5 });
    }

    #[test]
    fn write_transaction_aborts_on_err_leaving_slot_free() {
        let name = unique_name("err");
        let config = CreationConfig::new(2, 64, 4096);
        let segment = Segment::create(&name, &config).unwrap();

        let result: DataBlockResult<((), u64)> =
            with_write_transaction(segment.regions(), Duration::from_millis(100), |tx| {
                tx.write(&Reading { celsius: 99.0 });
                Err(crate::error::DataBlockError::ProtocolViolation {
                    reason: "caller decided to cancel".into(),
                })
            });
        assert!(result.is_err());
        assert_eq!(
            segment.regions().rw_state(0).state(),
            crate::rw_state::SlotState::Free
        );
    }

    #[test]
    fn producer_transaction_exposes_flex_zone_and_commits_each_slot() {
        let name = unique_name("producer");
        let config = CreationConfig::new(4, 64, 4096);
        let segment = Segment::create(&name, &config).unwrap();

        with_producer_transaction(segment.regions(), Duration::from_millis(200), None, |ctx| {
            ctx.flex_zone().write(&Reading { celsius: 1.0 }, false);
            let mut count = 0;
            for slot in ctx.slots(Duration::from_millis(100)) {
                let mut guard = slot.unwrap();
                guard.write(&Reading { celsius: count as f32 });
                count += 1;
                if count == 3 {
                    break;
                }
            }
        });

        for expected in 0..3 {
            assert_eq!(
                segment.regions().rw_state(expected).state(),
                crate::rw_state::SlotState::Committed
            );
        }
    }

    #[test]
    fn consumer_transaction_releases_every_slot_it_visits() {
        let name = unique_name("consumer");
        let config = CreationConfig::new(4, 64, 4096);
        let segment = Segment::create(&name, &config).unwrap();

        for i in 0..2 {
            with_write_transaction(segment.regions(), Duration::from_millis(100), |tx| {
                tx.write(&Reading { celsius: i as f32 });
                Ok(())
            })
            .unwrap();
        }

        let mut consumer = Consumer::attach(segment.regions());
        let mut seen = Vec::new();
        with_consumer_transaction(&mut consumer, Duration::from_millis(200), None, |ctx| {
            for slot in ctx.slots(Duration::from_millis(100)) {
                match slot {
                    Ok(guard) => seen.push(guard.read::<Reading>().celsius as i32),
                    Err(DataBlockError::Timeout) | Err(DataBlockError::WouldBlock) => break,
                    Err(e) => panic!("unexpected error: {e:?}"),
                }
            }
        });
        assert_eq!(seen, vec![0, 1]);
    }

    #[test]
    fn closing_signal_turns_every_subsequent_step_into_channel_closing() {
        let name = unique_name("closing");
        let config = CreationConfig::new(2, 64, 4096);
        let segment = Segment::create(&name, &config).unwrap();
        let closing = ClosingSignal::new();
        closing.signal();

        with_producer_transaction(
            segment.regions(),
            Duration::from_millis(100),
            Some(&closing),
            |ctx| {
                let mut slots = ctx.slots(Duration::from_millis(50));
                assert!(matches!(slots.next(), Some(Err(DataBlockError::ChannelClosing))));
                assert!(matches!(slots.next(), Some(Err(DataBlockError::ChannelClosing))));
            },
        );
    }
}
