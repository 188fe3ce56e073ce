//! Schema identity (§4.D, §4.G): a 32-byte cryptographic digest of a
//! type's declared structural layout, used to gate attach.
//!
//! Types that want typed schema validation implement [`SchemaDescribed`]
//! by hand, returning a canonical "Basic Layout Description String"
//! (BLDS): `MEMBER (";" MEMBER)*` where `MEMBER := NAME ":" TYPE_ID
//! ["@" OFFSET ":" SIZE]`. The engine never inspects the type
//! reflectively at runtime — it only ever hashes this string and
//! compares 32-byte digests (§9 "Generic schema macros").

use blake2::{Blake2b, Digest};
use blake2::digest::consts::U32;

type Blake2b256 = Blake2b<U32>;

/// A type that can describe its own binary layout as a BLDS string.
///
/// # Safety
///
/// Implementors must be `bytemuck::Pod + bytemuck::Zeroable` — i.e.
/// layout-trivially-copyable with no padding-dependent invalid bit
/// patterns — since the engine copies their raw bytes into and out of
/// shared memory without further validation.
pub trait SchemaDescribed: bytemuck::Pod + bytemuck::Zeroable {
    /// The canonical structural description string for this type.
    fn schema_descriptor() -> &'static str;
}

/// Hash a BLDS descriptor string with BLAKE2b-256, the schema hash
/// stored in the header (§4.D fields 11/12).
pub fn schema_hash(descriptor: &str) -> [u8; 32] {
    let mut hasher = Blake2b256::new();
    hasher.update(descriptor.as_bytes());
    let out = hasher.finalize();
    let mut digest = [0u8; 32];
    digest.copy_from_slice(&out);
    digest
}

/// The schema hash for `T`, computed from its [`SchemaDescribed`] impl.
pub fn schema_hash_of<T: SchemaDescribed>() -> [u8; 32] {
    schema_hash(T::schema_descriptor())
}

/// Marker hash meaning "untyped attach, skip schema validation" (§4.D:
/// "the impl-level API may accept zero hashes for untyped attach").
pub const UNTYPED_SCHEMA_HASH: [u8; 32] = [0u8; 32];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        let a = schema_hash("timestamp_ns:u64;temperature:f32");
        let b = schema_hash("timestamp_ns:u64;temperature:f32");
        assert_eq!(a, b);
    }

    #[test]
    fn different_descriptors_hash_differently() {
        let a = schema_hash("x:u32");
        let b = schema_hash("x:u32;y:u32");
        assert_ne!(a, b);
    }

    #[test]
    fn untyped_hash_is_all_zero() {
        assert_eq!(UNTYPED_SCHEMA_HASH, [0u8; 32]);
    }
}
