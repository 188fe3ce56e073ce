//! Checksum policy and digest computation (§4.F).

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};

type Blake2b256 = Blake2b<U32>;

/// When the engine computes and verifies per-slot/flex-zone digests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChecksumPolicy {
    /// No digest trailer; no computation occurs.
    None = 0,
    /// `release_write_slot`/`release_consume_slot` compute and verify
    /// automatically.
    Enforced = 1,
    /// The caller must explicitly request update/verify.
    Manual = 2,
}

impl ChecksumPolicy {
    pub fn from_raw(v: u8) -> Option<ChecksumPolicy> {
        match v {
            0 => Some(ChecksumPolicy::None),
            1 => Some(ChecksumPolicy::Enforced),
            2 => Some(ChecksumPolicy::Manual),
            _ => None,
        }
    }

    /// Whether the binary layout reserves a 32-byte digest trailer after
    /// the slot payload.
    pub fn has_trailer(self) -> bool {
        !matches!(self, ChecksumPolicy::None)
    }
}

/// Compute the 32-byte BLAKE2b-256 digest over exactly `bytes` (the
/// committed byte range; §4.F "the digest must be collision-resistant").
pub fn compute_digest(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Blake2b256::new();
    hasher.update(bytes);
    let out = hasher.finalize();
    let mut digest = [0u8; 32];
    digest.copy_from_slice(&out);
    digest
}

/// Verify `bytes` against a previously stored `digest`.
pub fn verify_digest(bytes: &[u8], digest: &[u8; 32]) -> bool {
    compute_digest(bytes) == *digest
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_range_has_a_stable_digest() {
        let d1 = compute_digest(&[]);
        let d2 = compute_digest(&[]);
        assert_eq!(d1, d2);
    }

    #[test]
    fn verify_detects_single_byte_flip() {
        let payload = [1u8, 2, 3, 4, 5];
        let digest = compute_digest(&payload);
        assert!(verify_digest(&payload, &digest));

        let mut corrupted = payload;
        corrupted[2] ^= 0x01;
        assert!(!verify_digest(&corrupted, &digest));
    }

    #[test]
    fn checksum_idempotence() {
        let payload = b"hello datablock";
        let d1 = compute_digest(payload);
        let d2 = compute_digest(payload);
        assert_eq!(d1, d2);
    }

    #[test]
    fn policy_trailer_presence() {
        assert!(!ChecksumPolicy::None.has_trailer());
        assert!(ChecksumPolicy::Enforced.has_trailer());
        assert!(ChecksumPolicy::Manual.has_trailer());
    }
}
