//! Common imports for consumers of this crate.
//!
//! ```rust
//! use datablock_core::prelude::*;
//! ```

pub use crate::broker::{BrokerNotification, ChannelBroker, NullBroker};
pub use crate::checksum::ChecksumPolicy;
pub use crate::consumer::{Consumer, SlotView};
pub use crate::error::{DataBlockError, DataBlockResult};
pub use crate::header::ConsumerSyncPolicy;
pub use crate::segment::{AttachedSegment, CreationConfig, Segment};
pub use crate::transaction::{
    with_consumer_transaction, with_producer_transaction, with_read_transaction,
    with_write_transaction, ClosingSignal,
};
pub use crate::writer::{WriteTransaction, Writer};
