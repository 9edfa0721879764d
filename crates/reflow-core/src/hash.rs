//! Hashing used for element keys and dependency fingerprints.
//!
//! The default hasher is `ahash`; the `std-hash` feature swaps in the
//! standard library's `DefaultHasher` for builds that must avoid the
//! dependency. Fingerprints are only ever compared against fingerprints
//! made by the same build, so the choice never changes observable behavior.

use std::hash::{Hash, Hasher};

#[cfg(feature = "std-hash")]
type DefaultHasher = std::collections::hash_map::DefaultHasher;

#[cfg(not(feature = "std-hash"))]
type DefaultHasher = ahash::AHasher;

/// Hashes one value with the active default hasher.
#[inline]
pub fn hash_one<T: Hash>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::default();
    value.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_values_hash_equal() {
        assert_eq!(hash_one(&("a", 1u32)), hash_one(&("a", 1u32)));
    }

    #[test]
    fn distinct_values_hash_distinct() {
        assert_ne!(hash_one(&"left"), hash_one(&"right"));
    }
}
