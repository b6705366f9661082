//! Constant-time secret comparison.
//!
//! Capability signatures, the sweep secret, and the metrics token are all
//! compared against attacker-supplied strings; a plain `==` would leak how
//! many leading bytes matched. Inputs are hashed to fixed-width digests
//! first so the comparison leaks nothing about their length either.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Compare two byte strings without leaking content or length through
/// timing.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let ha = Sha256::digest(a);
    let hb = Sha256::digest(b);
    ha.ct_eq(&hb).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_equal_bytes() {
        assert!(constant_time_eq(b"s3cret", b"s3cret"));
        assert!(constant_time_eq(b"", b""));
    }

    #[test]
    fn rejects_unequal_bytes() {
        assert!(!constant_time_eq(b"s3cret", b"s3cren"));
        assert!(!constant_time_eq(b"s3cret", b"s3cret-and-more"));
        assert!(!constant_time_eq(b"", b"x"));
    }
}
