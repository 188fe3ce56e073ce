//! Crate-wide constants for the binary layout (§4.D) and the recovery
//! façade.

/// Fixed magic identifying a DataBlock segment: the ASCII bytes
/// `"DBLKV001"` read little-endian.
pub const MAGIC: u64 = u64::from_le_bytes(*b"DBLKV001");

/// Current layout version. Bumped whenever the binary header shape
/// changes in a way that is not bit-compatible with older attachers.
pub const LAYOUT_VERSION: u32 = 1;

/// Bound on the number of simultaneously registered consumers per
/// segment (§3 "Per-consumer heartbeat table (bounded size)").
pub const MAX_CONSUMERS: usize = 64;

/// Default reclaim grace window (§9 open-question resolution): the
/// duration a slot must remain stuck in WRITING/DRAINING, with its
/// writer confirmed dead, before another thread may force-reclaim it.
pub const DEFAULT_RECLAIM_GRACE: std::time::Duration = std::time::Duration::from_secs(2);

/// Default consumer-liveness window: a heartbeat entry older than this
/// is treated as a dead reader (§5 "Process death").
pub const DEFAULT_CONSUMER_LIVENESS_WINDOW: std::time::Duration =
    std::time::Duration::from_secs(5);
