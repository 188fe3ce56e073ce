//! Prelude module for common re-exports.
//!
//! ```rust
//! use datablock_common::prelude::*;
//! ```

// ─── Logging & configuration ───────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, LogLevel, SharedConfig};

// ─── Sizing constants ───────────────────────────────────────────────
pub use crate::consts::{CACHE_LINE_SIZE, MAX_SEGMENT_NAME_LEN, SHM_MAX_SIZE, SHM_MIN_SIZE};
