//! # DataBlock: a shared-memory ring-buffer data exchange engine
//!
//! A single-writer, multi-reader shared memory channel built on named
//! POSIX shared memory objects. One process creates a segment and
//! writes fixed-size typed slots into a ring; any number of other
//! processes attach and consume them according to one of three
//! [`header::ConsumerSyncPolicy`] disciplines.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use datablock_core::segment::{CreationConfig, Segment};
//! use datablock_core::writer::Writer;
//! use datablock_core::consumer::Consumer;
//! use std::time::Duration;
//! use bytemuck::{Pod, Zeroable};
//!
//! #[repr(C)]
//! #[derive(Clone, Copy, Pod, Zeroable, Default)]
//! struct Reading {
//!     celsius: f32,
//! }
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CreationConfig::new(8, 64, 4096);
//! let segment = Segment::create("sensor_data", &config)?;
//! let writer = Writer::new(segment.regions());
//!
//! let mut tx = writer.begin_write(Duration::from_millis(100))?;
//! tx.write(&Reading { celsius: 21.5 });
//! tx.commit()?;
//!
//! let mut consumer = Consumer::attach(segment.regions());
//! let view = consumer.consume(Duration::from_millis(100))?;
//! let reading: Reading = view.read();
//! consumer.release(view)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Module map
//!
//! - [`platform`] — the four OS primitives everything else is built on.
//! - [`identity`], [`mutex`] — process-shared ownership and the robust
//!   segment mutex.
//! - [`rw_state`] — the per-slot concurrency state machine.
//! - [`header`], [`segment`] — the binary layout and the mapped handle.
//! - [`flexzone`], [`heartbeat`], [`checksum`], [`schema`] — the
//!   remaining segment regions.
//! - [`writer`], [`consumer`], [`transaction`] — the producer/consumer
//!   API, from lowest-level to the RAII wrapper most callers want.
//! - [`broker`] — the external channel-discovery interface this crate
//!   consumes but does not implement.
//! - [`diagnostics`] — zombie reclamation and integrity checks for a
//!   long-running process to call periodically.
//!
//! ## Error handling
//!
//! Every fallible operation returns [`error::DataBlockResult`]. See
//! [`error::DataBlockError`] for the full taxonomy.
//!
//! ## Platform support
//!
//! Linux only today ([`platform::linux`]); the primitives module is
//! structured so another POSIX host could be added behind the same
//! four free functions.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod broker;
pub mod checksum;
pub mod consts;
pub mod consumer;
pub mod diagnostics;
pub mod error;
pub mod flexzone;
pub mod header;
pub mod heartbeat;
pub mod identity;
pub mod mutex;
pub mod platform;
pub mod prelude;
pub mod rw_state;
pub mod schema;
pub mod segment;
pub mod transaction;
pub mod writer;

pub use broker::{BrokerNotification, ChannelBroker, NullBroker};
pub use consumer::{Consumer, SlotView};
pub use error::{DataBlockError, DataBlockResult};
pub use segment::{AttachedSegment, CreationConfig, Segment};
pub use transaction::{
    with_consumer_transaction, with_producer_transaction, with_read_transaction,
    with_write_transaction, ClosingSignal, ConsumerTransaction, ProducerTransaction,
    ReadSlotGuard, WriteSlotGuard,
};
pub use writer::{WriteTransaction, Writer};

/// Initialize tracing for the engine's structured logs.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}
