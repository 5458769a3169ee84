use sha2::{Digest, Sha256};

use crate::errors::{FleetError, FleetResult};

pub const DIGEST_BITS: u32 = 256;

/// Rejects difficulties no 256 bit digest can ever satisfy.
pub fn check_difficulty(difficulty: u32) -> FleetResult<()> {
    if difficulty > DIGEST_BITS {
        return Err(FleetError::InvalidDifficulty(difficulty));
    }
    Ok(())
}

/// Double SHA-256 of the block `payload ‖ decimal(nonce)`. The second pass
/// hashes the lowercase hex rendering of the first digest.
pub fn digest(payload: &str, nonce: u64) -> [u8; 32] {
    let block = format!("{payload}{nonce}");
    let first = Sha256::digest(block.as_bytes());
    let second = Sha256::digest(hex::encode(first).as_bytes());
    second.into()
}

/// Leading zero bits over the full 256 bit width. Counting is byte-wise, so
/// high zero bits are never lost to a shortened representation.
pub fn leading_zeros(digest: &[u8; 32]) -> u32 {
    let mut count = 0;
    for byte in digest {
        if *byte == 0 {
            count += 8;
        } else {
            count += byte.leading_zeros();
            break;
        }
    }
    count
}

/// Threshold comparison: a digest qualifying at difficulty `d` also
/// qualifies at every difficulty below `d`.
pub fn meets_difficulty(digest: &[u8; 32], difficulty: u32) -> bool {
    leading_zeros(digest) >= difficulty
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_deterministic() {
        let a = digest("blockdata", 42);
        let b = digest("blockdata", 42);
        assert_eq!(a, b);
        assert_ne!(digest("blockdata", 43), a);
        assert_ne!(digest("otherdata", 42), a);
    }

    #[test]
    fn zero_difficulty_accepts_any_nonce() {
        let d = digest("blockdata", 0);
        assert!(meets_difficulty(&d, 0));
    }

    #[test]
    fn counts_zero_bits_across_byte_boundaries() {
        let mut d = [0xffu8; 32];
        assert_eq!(leading_zeros(&d), 0);

        d[0] = 0x00;
        d[1] = 0x1f;
        assert_eq!(leading_zeros(&d), 11);

        let all_zero = [0u8; 32];
        assert_eq!(leading_zeros(&all_zero), DIGEST_BITS);
    }

    #[test]
    fn threshold_is_monotonic() {
        let d = digest("blockdata", 7);
        let zeros = leading_zeros(&d);
        for difficulty in 0..=zeros {
            assert!(meets_difficulty(&d, difficulty));
        }
        assert!(!meets_difficulty(&d, zeros + 1));
    }

    #[test]
    fn difficulty_bounds() {
        assert!(check_difficulty(0).is_ok());
        assert!(check_difficulty(DIGEST_BITS).is_ok());
        assert!(check_difficulty(DIGEST_BITS + 1).is_err());
    }
}
