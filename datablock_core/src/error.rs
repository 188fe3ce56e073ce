//! Error taxonomy for the DataBlock engine.

use thiserror::Error;

/// Every fallible operation in this crate returns `Result<T, DataBlockError>`.
#[derive(Error, Debug)]
pub enum DataBlockError {
    /// Creation options violate a precondition (bad capacity, size, enum).
    #[error("invalid configuration: {reason}")]
    ConfigInvalid {
        /// Human-readable reason.
        reason: String,
    },

    /// Attacher presented the wrong `shared_secret`.
    #[error("shared secret presented by attacher does not match segment")]
    SecretMismatch,

    /// Flex-zone or slot schema hash does not match the segment.
    #[error("schema hash mismatch for {region}")]
    SchemaMismatch {
        /// Which region mismatched ("flex zone" or "slot").
        region: &'static str,
    },

    /// Header magic/version/checksum invalid; attacher must refuse.
    #[error("segment layout is corrupt: {reason}")]
    LayoutCorrupt {
        /// Human-readable reason.
        reason: String,
    },

    /// Deadline elapsed during acquisition; no state change occurred.
    #[error("operation timed out")]
    Timeout,

    /// Non-blocking attempt found the resource contended.
    #[error("resource would block")]
    WouldBlock,

    /// The robust mutex reports a dead prior owner; invariants were restored.
    #[error("mutex was left in an inconsistent state by a dead owner")]
    Inconsistent,

    /// Stored digest does not match payload at read time.
    #[error("checksum mismatch on slot payload")]
    ChecksumMismatch,

    /// Broker notified that the peer side is going away.
    #[error("channel is closing")]
    ChannelClosing,

    /// Ordered-policy writer cannot advance past the slowest reader within the deadline.
    #[error("ring buffer is full")]
    RingFull,

    /// Host API failure (unlink permission, mmap, etc.).
    #[error("platform error: {source}")]
    PlatformIo {
        /// Underlying IO error.
        #[from]
        source: std::io::Error,
    },

    /// Host API failure surfaced through `nix`.
    #[error("platform error: {source}")]
    PlatformNix {
        /// Underlying nix error.
        #[from]
        source: nix::Error,
    },

    /// A user-code bug: double release, unlock by non-owner, releasing a
    /// foreign handle, out-of-bounds write/read. Always reported as a typed
    /// error, never undefined behaviour, with the slot left in a safe state.
    #[error("protocol violation: {reason}")]
    ProtocolViolation {
        /// Human-readable reason.
        reason: String,
    },
}

/// Result type used throughout the engine.
pub type DataBlockResult<T> = Result<T, DataBlockError>;
