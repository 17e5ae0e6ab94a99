//! Big-integer view of digests.
//!
//! Proof-of-work compares a block hash against a target, and targets are
//! scaled by rational factors. Both need exact arithmetic wider than any
//! native integer, so digests are reinterpreted as big-endian `BigInt`s.

use crate::utils::{Digest, DIGEST_LEN};
use num_bigint::{BigInt, Sign};
use once_cell::sync::Lazy;

/// Easiest allowed target: two leading zero bytes, everything else set.
pub static MAX_HASH: Lazy<Digest> = Lazy::new(|| {
    let mut bytes = [0xffu8; DIGEST_LEN];
    bytes[0] = 0;
    bytes[1] = 0;
    Digest(bytes)
});

static MAX_TARGET: Lazy<BigInt> = Lazy::new(|| to_bigint(&MAX_HASH));

const EASING_NUMERATOR: u32 = 257;
const EASING_DENOMINATOR: u32 = 256;

pub fn to_bigint(digest: &Digest) -> BigInt {
    BigInt::from_bytes_be(Sign::Plus, digest.as_bytes())
}

/// Converts back to a digest, saturating at the digest width.
pub fn from_bigint(value: &BigInt) -> Digest {
    let (sign, bytes) = value.to_bytes_be();
    if sign == Sign::Minus {
        return Digest::zero();
    }
    if bytes.len() > DIGEST_LEN {
        return Digest([0xff; DIGEST_LEN]);
    }
    let mut out = [0u8; DIGEST_LEN];
    out[DIGEST_LEN - bytes.len()..].copy_from_slice(&bytes);
    Digest(out)
}

pub fn bit_length(value: &BigInt) -> u32 {
    value.bits() as u32
}

/// `min(target * 257 / 256, MAX_HASH)`
pub fn scale_target(target: &Digest) -> Digest {
    let scaled = to_bigint(target) * BigInt::from(EASING_NUMERATOR) / BigInt::from(EASING_DENOMINATOR);
    if scaled > *MAX_TARGET {
        *MAX_HASH
    } else {
        from_bigint(&scaled)
    }
}

pub fn meets_target(hash: &Digest, target: &Digest) -> bool {
    to_bigint(hash) <= to_bigint(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bigint_round_trip() {
        let digest = crate::utils::hash(b"target");
        assert_eq!(from_bigint(&to_bigint(&digest)), digest);
    }

    #[test]
    fn test_max_hash_bit_length() {
        assert_eq!(bit_length(&to_bigint(&MAX_HASH)), 240);
        assert_eq!(bit_length(&to_bigint(&Digest::zero())), 0);
    }

    #[test]
    fn test_scale_target_caps_at_max() {
        assert_eq!(scale_target(&MAX_HASH), *MAX_HASH);

        let mut bytes = [0u8; DIGEST_LEN];
        bytes[4] = 0x01;
        let small = Digest(bytes);
        let scaled = scale_target(&small);
        assert!(scaled > small);
        assert_eq!(
            to_bigint(&scaled),
            to_bigint(&small) * BigInt::from(257) / BigInt::from(256)
        );
    }

    #[test]
    fn test_from_bigint_saturates() {
        let huge = BigInt::from(1) << 300;
        assert_eq!(from_bigint(&huge), Digest([0xff; DIGEST_LEN]));
        assert_eq!(from_bigint(&BigInt::from(-5)), Digest::zero());
    }

    #[test]
    fn test_meets_target() {
        let mut bytes = [0u8; DIGEST_LEN];
        bytes[2] = 0x10;
        let hash = Digest(bytes);
        assert!(meets_target(&hash, &MAX_HASH));
        assert!(meets_target(&hash, &hash));
        assert!(!meets_target(&MAX_HASH, &hash));
    }
}
