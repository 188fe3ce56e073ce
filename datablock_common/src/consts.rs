//! Sizing constants shared by layout and platform code.
//!
//! Single source of truth for the numeric limits that bound a segment's
//! shape. Imported by `datablock_core` and by any binary that needs to
//! validate creation options before calling into it.

/// Smallest segment size the engine will create (one typical page).
pub const SHM_MIN_SIZE: usize = 4096;

/// Largest segment size the engine will create (1 GiB).
pub const SHM_MAX_SIZE: usize = 1_073_741_824;

/// Cache line size assumed for padding hot atomics apart.
pub const CACHE_LINE_SIZE: usize = 64;

/// Maximum length, in bytes, of a segment name (excluding any host-side
/// `/dev/shm/` prefix).
pub const MAX_SEGMENT_NAME_LEN: usize = 200;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_are_consistent() {
        assert!(SHM_MIN_SIZE > 0);
        assert!(SHM_MAX_SIZE > SHM_MIN_SIZE);
        assert!(CACHE_LINE_SIZE.is_power_of_two());
        assert!(MAX_SEGMENT_NAME_LEN > 0);
    }
}
